use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use core_types::SignalStore;
use csv::{ReaderBuilder, WriterBuilder};

/// File-backed canonical log: positional CSV rows, two header rows, no
/// quoting assumptions. Row addressing is absolute 0-based, matching the
/// `SignalStore` contract. Bulk rewrites go through a temp file + rename
/// so a crash never leaves a half-written log.
#[derive(Debug, Clone)]
pub struct CsvSignalStore {
    path: PathBuf,
}

impl CsvSignalStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Create the log with its two header rows when it does not exist yet.
    pub async fn ensure_initialized(&self) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            if path.exists() {
                return Ok(());
            }
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).context("create log dir")?;
                }
            }
            write_rows(
                &path,
                &[
                    vec!["SIGNALS".to_string()],
                    ["date", "time", "asset", "direction", "outcome", "gale"]
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                ],
            )
        })
        .await
        .context("join ensure_initialized")?
    }
}

#[async_trait]
impl SignalStore for CsvSignalStore {
    async fn read_all(&self) -> Result<Vec<Vec<String>>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_rows(&path))
            .await
            .context("join read_all")?
    }

    async fn update_row(&self, row_index: usize, row: Vec<String>) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut rows = read_rows(&path)?;
            if row_index >= rows.len() {
                bail!(
                    "update_row out of bounds: index {row_index}, log has {} rows",
                    rows.len()
                );
            }
            rows[row_index] = row;
            write_rows(&path, &rows)
        })
        .await
        .context("join update_row")?
    }

    async fn append_rows(&self, rows: Vec<Vec<String>>) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open log for append: {}", path.display()))?;
            let mut writer = WriterBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_writer(file);
            for row in &rows {
                writer.write_record(row).context("append log row")?;
            }
            writer.flush().context("flush appended rows")?;
            Ok(())
        })
        .await
        .context("join append_rows")?
    }

    async fn replace_all(&self, rows: Vec<Vec<String>>) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_rows(&path, &rows))
            .await
            .context("join replace_all")?
    }
}

fn read_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open log: {}", path.display()))?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("read log row")?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

fn write_rows(path: &Path, rows: &[Vec<String>]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&tmp)
            .with_context(|| format!("open temp log: {}", tmp.display()))?;
        for row in rows {
            writer.write_record(row).context("write log row")?;
        }
        writer.flush().context("flush rewritten log")?;
    }
    fs::rename(&tmp, path).context("swap rewritten log into place")?;
    Ok(())
}
