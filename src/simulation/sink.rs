//! Persistence sinks for per-tick records.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::TickRecord;

/// Receives one record per tick. Failures are logged by the caller and never
/// stop the simulation loop.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, record: &TickRecord) -> Result<()>;
}

/// Discards every record
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl TelemetrySink for NullSink {
    async fn record(&self, _record: &TickRecord) -> Result<()> {
        Ok(())
    }
}

/// Appends each record as one JSON document per line
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TelemetrySink for JsonLinesSink {
    async fn record(&self, record: &TickRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::NetworkTopology;
    use crate::simulation::SimulationContext;

    #[tokio::test]
    async fn test_json_lines_appends_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("ticks.jsonl");

        let mut cfg = Config::default();
        cfg.simulation.random_seed = Some(6);
        let mut ctx =
            SimulationContext::new(NetworkTopology::minimal(), &cfg, chrono::Utc::now()).unwrap();

        let sink = JsonLinesSink::open(&path).await.unwrap();
        for _ in 0..3 {
            sink.record(&ctx.tick()).await.unwrap();
        }

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 3);
        let last: TickRecord = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last.tick, 3);
        assert_eq!(last.run_id, ctx.run_id());
    }
}
