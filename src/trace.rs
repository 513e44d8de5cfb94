//! Sinks receiving one trace record per completed incident.

use crate::dispatch::RunRecord;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait TraceSink: Send + Sync {
    fn record(&self, record: &RunRecord) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn record(&self, _record: &RunRecord) -> Result<()> {
        Ok(())
    }
}

/// Keeps records in memory, mostly for tests and embedding callers.
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    records: Mutex<Vec<RunRecord>>,
}

impl MemoryTraceSink {
    pub fn records(&self) -> Vec<RunRecord> {
        self.records
            .lock()
            .expect("memory trace sink mutex poisoned")
            .clone()
    }
}

impl TraceSink for MemoryTraceSink {
    fn record(&self, record: &RunRecord) -> Result<()> {
        self.records
            .lock()
            .expect("memory trace sink mutex poisoned")
            .push(record.clone());
        Ok(())
    }
}

/// Appends one JSON document per line.
#[derive(Debug)]
pub struct JsonlTraceSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlTraceSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create trace directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open trace file {}", path.display()))?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, record: &RunRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("failed to serialise trace record")?;
        let mut writer = self.writer.lock().expect("trace writer mutex poisoned");
        writeln!(writer, "{line}")
            .and_then(|_| writer.flush())
            .with_context(|| format!("failed to append to {}", self.path.display()))
    }
}
