use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_core::session::best_face;
use rollcall_core::{Config, Detection, IdentityGallery, Matcher, ThresholdMatcher, Verdict};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall biometric attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the most confident face from a detections file
    Enroll {
        /// Name to record attendance under
        #[arg(short, long)]
        name: String,
        /// JSON array of detections from one enrollment frame
        detections: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove every enrolled identity
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
    /// Match a single embedding against the gallery
    Identify {
        /// JSON array of floats
        embedding: PathBuf,
    },
    /// Show attendance recorded for a day
    Attendance {
        /// Day to report (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;

    match cli.command {
        Commands::Enroll { name, detections } => enroll(&config, &name, &detections),
        Commands::List => list(&config),
        Commands::Reset { yes } => reset(&config, yes),
        Commands::Identify { embedding } => identify(&config, &embedding),
        Commands::Attendance { date } => attendance(&config, date),
    }
}

fn open_gallery(config: &Config) -> Result<IdentityGallery> {
    IdentityGallery::open(config.gallery_paths(), config.embedding_dim).context("opening gallery")
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn enroll(config: &Config, name: &str, detections: &Path) -> Result<()> {
    let detections: Vec<Detection> = read_json(detections)?;
    let Some(face) = best_face(&detections) else {
        bail!("no face in enrollment frame; nothing enrolled");
    };

    tracing::debug!(name, candidates = detections.len(), "enrolling best face");
    let mut gallery = open_gallery(config)?;
    let id = gallery
        .enroll_durable(name, &face.embedding)
        .context("enrolling identity")?;
    tracing::info!(id = id.0, name, total = gallery.len(), "identity enrolled");

    println!("Enrolled {name} as id {id} (confidence {:.2})", face.bbox.confidence);
    println!("{} identities in gallery", gallery.len());
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let gallery = open_gallery(config)?;
    let enrolled = gallery.enrolled();
    let orphaned = gallery.orphaned();

    if !orphaned.is_empty() {
        tracing::warn!(
            orphaned = orphaned.len(),
            "some identities lost their vectors; re-enroll them"
        );
    }
    if enrolled.is_empty() && orphaned.is_empty() {
        println!("No identities enrolled");
        return Ok(());
    }
    for (id, name) in enrolled {
        println!("{:>5}  {name}", id.0);
    }
    for (id, name) in orphaned {
        println!("{:>5}  {name}  (vector lost, re-enroll)", id.0);
    }
    Ok(())
}

fn reset(config: &Config, yes: bool) -> Result<()> {
    if !yes {
        bail!("refusing to reset the gallery without --yes");
    }
    let mut gallery = open_gallery(config)?;
    let removed = gallery.identity_map().len();
    gallery.reset();
    gallery.persist().context("saving gallery")?;
    tracing::info!(removed, "gallery reset");
    println!("Gallery reset ({removed} identities removed)");
    Ok(())
}

fn identify(config: &Config, embedding: &Path) -> Result<()> {
    let probe: Vec<f32> = read_json(embedding)?;
    let gallery = open_gallery(config)?;
    let verdict = ThresholdMatcher::new(config.match_threshold).identify(&gallery, &probe)?;
    tracing::debug!(score = verdict.score(), matched = verdict.is_match(), "identify");

    match verdict {
        Verdict::Matched { id, name, score } => {
            println!("MATCH {name} (id {id}, score {score:.3})")
        }
        Verdict::Unmatched { score } => println!("UNKNOWN (score {score:.3})"),
    }
    Ok(())
}

fn attendance(config: &Config, date: Option<NaiveDate>) -> Result<()> {
    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let path = config.ledger_path();
    let events: Vec<_> = rollcall_core::ledger::read_events(&path)?
        .into_iter()
        .filter(|e| e.date == date)
        .collect();

    if events.is_empty() {
        println!("No attendance recorded for {date}");
        return Ok(());
    }
    for e in &events {
        println!("{}  {}  {}", e.date, e.time.format("%H:%M:%S"), e.name);
    }
    println!("{} present", events.len());
    Ok(())
}
