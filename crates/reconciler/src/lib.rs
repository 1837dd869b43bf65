use std::collections::{HashMap, HashSet};
use std::time::Duration;

use core_types::{
    parse_row_key, EngineError, Outcome, PassReport, Signal, SignalKey, SignalStore, HEADER_ROWS,
};
use serde::{Deserialize, Serialize};

mod retention;

pub use retention::{RetentionConfig, RetentionPruner};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Appends are flushed in batches of this many rows.
    pub write_batch_size: usize,
    /// Pause between append batches, to respect the store's write-rate
    /// limits.
    pub inter_batch_delay_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            write_batch_size: 100,
            inter_batch_delay_ms: 500,
        }
    }
}

impl ReconcilerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.write_batch_size == 0 {
            return Err("write_batch_size must be at least 1".to_string());
        }
        Ok(())
    }
}

/// In-place resolution of one pending row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowUpdate {
    /// Absolute 0-based index into the log snapshot, headers included.
    pub row_index: usize,
    pub signal: Signal,
}

/// The minimal set of writes for one batch of candidates, computed from
/// a single consistent read of the canonical log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReconcilePlan {
    pub updates: Vec<RowUpdate>,
    pub appends: Vec<Signal>,
    pub skipped: usize,
    pub candidates: usize,
    pub deduped: usize,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.appends.is_empty()
    }
}

/// Decides insert/update/skip per candidate and applies the writes.
/// Passes must be externally serialized: the plan assumes nothing else
/// mutates the log between the snapshot read and the writes.
#[derive(Debug, Clone)]
pub struct SignalReconciler {
    cfg: ReconcilerConfig,
}

impl SignalReconciler {
    pub fn new(cfg: ReconcilerConfig) -> Self {
        Self { cfg }
    }

    /// Pure planning step.
    ///
    /// Candidates are deduplicated by key keeping the first occurrence
    /// (batch order is the caller's; a newest-first batch therefore keeps
    /// the most recent sighting). Against the log: no match appends, a
    /// pending row with a resolved candidate updates in place, anything
    /// else skips, which makes a retried pass a no-op.
    pub fn plan(&self, candidates: &[Signal], log_rows: &[Vec<String>]) -> ReconcilePlan {
        let mut seen: HashSet<SignalKey> = HashSet::new();
        let mut deduped: Vec<&Signal> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if seen.insert(candidate.key()) {
                deduped.push(candidate);
            }
        }

        let mut by_key: HashMap<SignalKey, (usize, Option<Outcome>)> = HashMap::new();
        for (row_index, row) in log_rows.iter().enumerate().skip(HEADER_ROWS) {
            let Some(key) = parse_row_key(row) else {
                tracing::warn!(row_index, "log row without a readable key; leaving it alone");
                continue;
            };
            let outcome = row.get(4).and_then(|cell| Outcome::parse(cell));
            by_key.entry(key).or_insert((row_index, outcome));
        }

        let mut plan = ReconcilePlan {
            candidates: candidates.len(),
            deduped: deduped.len(),
            ..ReconcilePlan::default()
        };
        for candidate in deduped {
            match by_key.get(&candidate.key()) {
                None => plan.appends.push(candidate.clone()),
                Some((row_index, Some(Outcome::Pending))) if candidate.outcome.is_resolved() => {
                    plan.updates.push(RowUpdate {
                        row_index: *row_index,
                        signal: candidate.clone(),
                    });
                }
                Some(_) => plan.skipped += 1,
            }
        }
        plan
    }

    /// Applies a plan: updates row by row, then appends in fixed-size
    /// batches with a pause in between, strictly sequential. A write
    /// error aborts the remaining batches; committed writes stand (the
    /// dedup key makes a retried pass idempotent), and the error carries
    /// the applied-vs-pending counts.
    pub async fn apply(
        &self,
        plan: &ReconcilePlan,
        store: &dyn SignalStore,
    ) -> Result<PassReport, EngineError> {
        let mut updates_applied = 0usize;
        for update in &plan.updates {
            store
                .update_row(update.row_index, update.signal.to_row())
                .await
                .map_err(|cause| EngineError::WriteAborted {
                    updates_applied,
                    appends_applied: 0,
                    appends_pending: plan.appends.len(),
                    cause,
                })?;
            updates_applied += 1;
            tracing::info!(
                row_index = update.row_index,
                outcome = %update.signal.outcome,
                "resolved pending signal in place"
            );
        }

        let total_appends = plan.appends.len();
        let mut appends_applied = 0usize;
        for (batch_no, batch) in plan.appends.chunks(self.cfg.write_batch_size).enumerate() {
            if batch_no > 0 && self.cfg.inter_batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.cfg.inter_batch_delay_ms)).await;
            }
            let rows = batch.iter().map(Signal::to_row).collect::<Vec<_>>();
            store
                .append_rows(rows)
                .await
                .map_err(|cause| EngineError::WriteAborted {
                    updates_applied,
                    appends_applied,
                    appends_pending: total_appends - appends_applied,
                    cause,
                })?;
            appends_applied += batch.len();
            tracing::info!(
                batch = batch_no + 1,
                rows = batch.len(),
                "appended signal batch"
            );
        }

        Ok(PassReport {
            candidates: plan.candidates,
            deduped: plan.deduped,
            updates_applied,
            appended: appends_applied,
            skipped: plan.skipped,
        })
    }
}
