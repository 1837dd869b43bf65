use core_types::{EngineError, PruneReport, SignalStore, HEADER_ROWS};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    /// Leading rows kept verbatim through every rewrite.
    pub header_rows: usize,
    /// Cap on data rows below the headers.
    pub data_rows: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            header_rows: HEADER_ROWS,
            data_rows: 500,
        }
    }
}

impl RetentionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.data_rows == 0 {
            return Err("retention data_rows must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Caps the canonical log after a reconciliation pass. Over the cap, the
/// headers plus the most recent `data_rows` rows (by log order) survive a
/// single atomic rewrite; below it, nothing happens.
#[derive(Debug, Clone)]
pub struct RetentionPruner {
    cfg: RetentionConfig,
}

impl RetentionPruner {
    pub fn new(cfg: RetentionConfig) -> Self {
        Self { cfg }
    }

    pub async fn prune(&self, store: &dyn SignalStore) -> Result<PruneReport, EngineError> {
        let rows = store.read_all().await?;
        let cap = self.cfg.header_rows + self.cfg.data_rows;
        if rows.len() <= cap {
            let kept = rows.len().saturating_sub(self.cfg.header_rows);
            tracing::debug!(rows = rows.len(), cap, "log within retention cap");
            return Ok(PruneReport { kept, dropped: 0 });
        }

        let dropped = rows.len() - cap;
        let mut replacement = rows[..self.cfg.header_rows].to_vec();
        replacement.extend_from_slice(&rows[rows.len() - self.cfg.data_rows..]);
        store.replace_all(replacement).await?;
        tracing::info!(kept = self.cfg.data_rows, dropped, "pruned canonical log");
        Ok(PruneReport {
            kept: self.cfg.data_rows,
            dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    struct MemStore {
        rows: Mutex<Vec<Vec<String>>>,
        replace_calls: Mutex<usize>,
    }

    impl MemStore {
        fn with_rows(rows: Vec<Vec<String>>) -> Self {
            Self {
                rows: Mutex::new(rows),
                replace_calls: Mutex::new(0),
            }
        }

        fn rows(&self) -> Vec<Vec<String>> {
            self.rows.lock().expect("lock").clone()
        }

        fn replace_calls(&self) -> usize {
            *self.replace_calls.lock().expect("lock")
        }
    }

    #[async_trait]
    impl SignalStore for MemStore {
        async fn read_all(&self) -> Result<Vec<Vec<String>>> {
            Ok(self.rows())
        }

        async fn update_row(&self, row_index: usize, row: Vec<String>) -> Result<()> {
            self.rows.lock().expect("lock")[row_index] = row;
            Ok(())
        }

        async fn append_rows(&self, new_rows: Vec<Vec<String>>) -> Result<()> {
            self.rows.lock().expect("lock").extend(new_rows);
            Ok(())
        }

        async fn replace_all(&self, rows: Vec<Vec<String>>) -> Result<()> {
            *self.replace_calls.lock().expect("lock") += 1;
            *self.rows.lock().expect("lock") = rows;
            Ok(())
        }
    }

    fn log_with_data_rows(n: usize) -> Vec<Vec<String>> {
        let mut rows = vec![
            vec!["SIGNALS".to_string()],
            vec!["date".to_string(), "time".to_string()],
        ];
        for i in 0..n {
            rows.push(vec![format!("row-{i}")]);
        }
        rows
    }

    #[tokio::test]
    async fn over_cap_keeps_headers_and_most_recent_rows() {
        let store = MemStore::with_rows(log_with_data_rows(510));
        let pruner = RetentionPruner::new(RetentionConfig::default());

        let report = pruner.prune(&store).await.expect("prune");
        assert_eq!(report, PruneReport { kept: 500, dropped: 10 });

        let rows = store.rows();
        assert_eq!(rows.len(), 502);
        assert_eq!(rows[0], vec!["SIGNALS".to_string()]);
        assert_eq!(rows[1], vec!["date".to_string(), "time".to_string()]);
        // Oldest ten data rows are gone; order of the rest is unchanged.
        assert_eq!(rows[2], vec!["row-10".to_string()]);
        assert_eq!(rows[501], vec!["row-509".to_string()]);
    }

    #[tokio::test]
    async fn at_or_below_cap_is_a_noop() {
        let store = MemStore::with_rows(log_with_data_rows(500));
        let pruner = RetentionPruner::new(RetentionConfig::default());

        let report = pruner.prune(&store).await.expect("prune");
        assert_eq!(report, PruneReport { kept: 500, dropped: 0 });
        assert_eq!(store.replace_calls(), 0);
        assert_eq!(store.rows().len(), 502);
    }

    #[tokio::test]
    async fn custom_cap() {
        let store = MemStore::with_rows(log_with_data_rows(7));
        let pruner = RetentionPruner::new(RetentionConfig {
            header_rows: 2,
            data_rows: 5,
        });

        let report = pruner.prune(&store).await.expect("prune");
        assert_eq!(report, PruneReport { kept: 5, dropped: 2 });
        let rows = store.rows();
        assert_eq!(rows[2], vec!["row-2".to_string()]);
        assert_eq!(store.replace_calls(), 1);
    }
}
