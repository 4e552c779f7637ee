use anyhow::{Context, Result};
use rollcall_core::{AttendanceSession, Config};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

mod engine;
mod protocol;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries protocol responses; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load().context("loading configuration")?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        embedding_dim = config.embedding_dim,
        match_threshold = config.match_threshold,
        ear_threshold = config.ear_threshold,
        "configuration loaded"
    );

    let session = AttendanceSession::open(&config).context("opening attendance session")?;
    let engine = engine::spawn_engine(session)?;

    tracing::info!("rollcalld ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        };
        let Some(line) = line else {
            tracing::info!("input closed");
            break;
        };

        let Some(response) = protocol::handle_line(&engine, &line).await? else {
            continue;
        };
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    tracing::info!("rollcalld shutting down");
    Ok(())
}
