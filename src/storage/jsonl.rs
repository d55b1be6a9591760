//! Append-only JSON Lines sink.
//!
//! One record per line, tagged with `"kind"`. The most recent opportunity
//! ids in the file are loaded on open so a restarted scanner never writes
//! a duplicate of a retried record.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{OpportunitySink, RecentIds, SinkError, DEDUPE_WINDOW};
use crate::types::{Opportunity, RoundReport};

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    Opportunity(&'a Opportunity),
    Round(&'a RoundReport),
}

struct Inner {
    file: File,
    seen: RecentIds,
}

pub struct JsonlSink {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonlSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        Self::open_with_window(path, DEDUPE_WINDOW).await
    }

    /// Like `open`, remembering at most `window` opportunity ids.
    pub async fn open_with_window(path: impl AsRef<Path>, window: usize) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let (seen, torn_tail) = load_ids(&path, window).await?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        if torn_tail {
            file.write_all(b"\n").await?;
        }
        info!(path = %path.display(), known = seen.len(), "JSONL sink opened");
        Ok(Self {
            path,
            inner: Mutex::new(Inner { file, seen }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(inner: &mut Inner, record: &Record<'_>) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        inner.file.write_all(&line).await?;
        inner.file.flush().await?;
        Ok(())
    }
}

/// The last `window` ids on disk, and whether the file ends mid-line.
/// Reads line by line so the history never has to fit in memory.
async fn load_ids(path: &Path, window: usize) -> Result<(RecentIds, bool), SinkError> {
    let mut ids = RecentIds::new(window);
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((ids, false)),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut lineno = 0usize;
    let mut torn_tail = false;
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        lineno += 1;
        torn_tail = !line.ends_with('\n');
        let record = line.trim();
        if record.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(record) {
            Ok(value) if value["kind"] == "opportunity" => {
                if let Some(id) = value["id"].as_str() {
                    ids.insert(id.to_string());
                }
            }
            Ok(_) => {}
            // A torn final line from a crash is expected; skip it.
            Err(e) => warn!(path = %path.display(), line = lineno, error = %e, "Skipping unreadable JSONL line"),
        }
    }
    Ok((ids, torn_tail))
}

#[async_trait]
impl OpportunitySink for JsonlSink {
    async fn publish(&self, opportunity: &Opportunity) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().await;
        if inner.seen.contains(&opportunity.id) {
            debug!(id = %opportunity.id, "Opportunity already written, skipping");
            return Ok(());
        }
        Self::append(&mut inner, &Record::Opportunity(opportunity)).await?;
        inner.seen.insert(opportunity.id.clone());
        Ok(())
    }

    async fn record_round(&self, report: &RoundReport) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().await;
        Self::append(&mut inner, &Record::Round(report)).await
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}
