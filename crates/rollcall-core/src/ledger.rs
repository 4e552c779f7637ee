//! Append-only attendance log with once-per-day-per-name marking.
//!
//! The CSV file is the source of truth. The in-memory "marked today" set is
//! rebuilt from it on open, using the date at construction time. That date
//! is never re-evaluated, so a session running past midnight keeps using
//! the day it started on.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const HEADER: &str = "name,date,time";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Source of wall-clock time.
pub trait Clock: Send {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// One recorded attendance row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceEvent {
    pub name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// Owner of the attendance file.
pub struct AttendanceLedger {
    path: PathBuf,
    today: NaiveDate,
    marked_today: HashSet<String>,
    clock: Box<dyn Clock>,
}

impl AttendanceLedger {
    /// Open (or create) the ledger at `path` using local time.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        Self::open_with_clock(path, Box::new(SystemClock))
    }

    pub fn open_with_clock(
        path: impl Into<PathBuf>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, LedgerError> {
        let path = path.into();
        let today = clock.now().date();
        let io_err = |source| LedgerError::Io {
            path: path.clone(),
            source,
        };

        let mut marked_today = HashSet::new();
        if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(io_err)?;
            if contents.is_empty() {
                std::fs::write(&path, format!("{HEADER}\n")).map_err(io_err)?;
                tracing::warn!(path = %path.display(), "empty attendance ledger; wrote header");
            } else if !contents.ends_with('\n') {
                // Keep the next appended row off the unterminated last line.
                append(&path, "\n").map_err(io_err)?;
                tracing::warn!(path = %path.display(), "terminated last ledger row");
            }

            let today_str = today.format(DATE_FORMAT).to_string();
            for fields in rows(&contents) {
                if fields.len() >= 2 && fields[1] == today_str {
                    marked_today.insert(fields[0].clone());
                }
            }
            tracing::info!(
                path = %path.display(),
                %today,
                marked = marked_today.len(),
                "attendance ledger loaded"
            );
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
            std::fs::write(&path, format!("{HEADER}\n")).map_err(io_err)?;
            tracing::info!(path = %path.display(), "created attendance ledger");
        }

        Ok(Self {
            path,
            today,
            marked_today,
            clock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The day fixed at construction.
    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn is_marked(&self, name: &str) -> bool {
        self.marked_today.contains(name)
    }

    /// Names already marked today, sorted.
    pub fn marked_today(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.marked_today.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Record attendance for `name` unless already marked today.
    ///
    /// Returns true if a row was appended. A repeat call does no I/O.
    /// On write failure the name stays unmarked.
    pub fn mark(&mut self, name: &str) -> Result<bool, LedgerError> {
        if self.marked_today.contains(name) {
            return Ok(false);
        }

        let now = self.clock.now();
        let date = now.format(DATE_FORMAT).to_string();
        let time = now.format(TIME_FORMAT).to_string();
        let line = format!("{},{},{}\n", escape_csv_field(name), date, time);

        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        append(&self.path, &line).map_err(io_err)?;

        self.marked_today.insert(name.to_string());
        tracing::info!(name, %date, %time, "attendance marked");
        Ok(true)
    }
}

/// Every well-formed event in the ledger file, in file order.
///
/// Rows with fewer than three fields or unparseable dates are skipped.
pub fn read_events(path: &Path) -> Result<Vec<AttendanceEvent>, LedgerError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(LedgerError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let events = rows(&contents)
        .into_iter()
        .filter_map(|fields| {
            if fields.len() < 3 {
                return None;
            }
            let date = NaiveDate::parse_from_str(&fields[1], DATE_FORMAT).ok()?;
            let time = NaiveTime::parse_from_str(&fields[2], TIME_FORMAT).ok()?;
            Some(AttendanceEvent {
                name: fields[0].clone(),
                date,
                time,
            })
        })
        .collect();
    Ok(events)
}

fn escape_csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn append(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    file.write_all(text.as_bytes())
}

/// Data records of a ledger file, without the header row if present.
fn rows(contents: &str) -> Vec<Vec<String>> {
    let mut records = parse_csv(contents);
    if records.first().is_some_and(|r| r.join(",") == HEADER) {
        records.remove(0);
    }
    records
}

/// Split CSV text into records. Double-quoted fields may contain commas,
/// doubled quotes and line breaks. Blank lines produce no record.
fn parse_csv(contents: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut chars = contents.chars().peekable();

    loop {
        let c = chars.next();
        match (c, in_quotes) {
            (Some('"'), true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            (Some('"'), true) => in_quotes = false,
            (Some('"'), false) if field.is_empty() => {
                in_quotes = true;
                quoted = true;
            }
            (Some(','), false) => {
                record.push(std::mem::take(&mut field));
                quoted = false;
            }
            (Some('\r'), false) if matches!(chars.peek(), Some('\n') | None) => {}
            (Some('\n'), false) | (None, _) => {
                if !record.is_empty() || !field.is_empty() || quoted {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                quoted = false;
                if c.is_none() {
                    break;
                }
            }
            (Some(c), _) => field.push(c),
        }
    }
    records
}
