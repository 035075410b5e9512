use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::domain::mismatch::MismatchSet;
use crate::domain::value_objects::PrimaryKey;

/// What caused an incremental pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IncrementalTrigger {
    /// The row copier finished a batch.
    BatchCopied,
    /// The change-stream reader applied replicated events.
    RowsChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "trigger", rename_all = "snake_case")]
pub enum RunScope {
    Incremental(IncrementalTrigger),
    Cutover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    /// Mismatches were found but recorded for the cutover pass instead of
    /// halting the migration.
    Deferred,
}

/// One verification pass, sealed once complete.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationRun {
    pub id: String,
    pub scope: RunScope,
    pub tables_examined: BTreeSet<String>,
    /// Keyed by qualified table name; only tables with mismatches appear.
    pub mismatches: BTreeMap<String, MismatchSet>,
    pub rows_compared: usize,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// A run in progress. Sealing consumes it, so a sealed run cannot be
/// extended afterwards.
#[derive(Debug)]
pub struct RunBuilder {
    id: String,
    scope: RunScope,
    tables_examined: BTreeSet<String>,
    mismatches: BTreeMap<String, MismatchSet>,
    rows_compared: usize,
    started_at: DateTime<Utc>,
}

impl RunBuilder {
    pub fn start(scope: RunScope) -> Self {
        Self {
            id: format!("vr_{}", Uuid::new_v4().simple()),
            scope,
            tables_examined: BTreeSet::new(),
            mismatches: BTreeMap::new(),
            rows_compared: 0,
            started_at: Utc::now(),
        }
    }

    pub fn record(&mut self, qualified_table: &str, compared: usize, set: MismatchSet) {
        self.tables_examined.insert(qualified_table.to_string());
        self.rows_compared += compared;
        if set.is_empty() {
            return;
        }
        match self.mismatches.get_mut(qualified_table) {
            Some(existing) => existing.merge(set),
            None => {
                self.mismatches.insert(qualified_table.to_string(), set);
            }
        }
    }

    pub fn has_mismatches(&self) -> bool {
        !self.mismatches.is_empty()
    }

    /// Seal with the outcome the mismatches imply, or `Deferred` when the
    /// caller postpones the verdict.
    pub fn seal(self, defer: bool) -> VerificationRun {
        let outcome = match (self.mismatches.is_empty(), defer) {
            (true, _) => Outcome::Pass,
            (false, true) => Outcome::Deferred,
            (false, false) => Outcome::Fail,
        };
        VerificationRun {
            id: self.id,
            scope: self.scope,
            tables_examined: self.tables_examined,
            mismatches: self.mismatches,
            rows_compared: self.rows_compared,
            outcome,
            started_at: self.started_at,
            completed_at: Utc::now(),
        }
    }
}

impl VerificationRun {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }

    /// Tables with at least one mismatch, sorted, each listed once.
    pub fn failing_tables(&self) -> Vec<String> {
        self.mismatches.keys().cloned().collect()
    }

    /// Machine-readable table → primary keys listing.
    pub fn mismatched_pks(&self) -> BTreeMap<String, Vec<PrimaryKey>> {
        self.mismatches
            .iter()
            .map(|(table, set)| (table.clone(), set.pks()))
            .collect()
    }
}
