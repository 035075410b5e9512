use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::{
    mismatch::MismatchReason,
    ports::OutputWriter,
    value_objects::PrimaryKey,
    verification::{Outcome, RunScope, VerificationRun},
};

// ─── Serialisation view types ─────────────────────────────────────────────────
//
// Presentation-only: mismatch keys become JSON-friendly lists and the report
// gains a top-level verdict. The domain types are never modified.

#[derive(Serialize)]
struct JsonReport<'a> {
    verdict: &'static str,
    runs: Vec<JsonRun<'a>>,
}

#[derive(Serialize)]
struct JsonRun<'a> {
    id: &'a str,
    #[serde(flatten)]
    scope: &'a RunScope,
    outcome: &'a Outcome,
    started_at: String,
    completed_at: String,
    rows_compared: usize,
    tables_examined: Vec<&'a str>,
    mismatches: BTreeMap<&'a str, Vec<JsonMismatch<'a>>>,
}

#[derive(Serialize)]
struct JsonMismatch<'a> {
    pk: PrimaryKey,
    #[serde(flatten)]
    reason: &'a MismatchReason,
}

fn build_run(run: &VerificationRun) -> JsonRun<'_> {
    JsonRun {
        id: &run.id,
        scope: &run.scope,
        outcome: &run.outcome,
        started_at: run.started_at.to_rfc3339(),
        completed_at: run.completed_at.to_rfc3339(),
        rows_compared: run.rows_compared,
        tables_examined: run.tables_examined.iter().map(String::as_str).collect(),
        mismatches: run
            .mismatches
            .iter()
            .map(|(table, set)| {
                let entries = set
                    .mismatches
                    .iter()
                    .map(|(pk, reason)| JsonMismatch { pk: *pk, reason })
                    .collect();
                (table.as_str(), entries)
            })
            .collect(),
    }
}

/// The last run decides: a migration is judged by its latest pass.
fn verdict(runs: &[VerificationRun]) -> &'static str {
    match runs.last().map(|r| r.outcome) {
        None => "not_run",
        Some(Outcome::Pass) => "pass",
        Some(Outcome::Deferred) => "deferred",
        Some(Outcome::Fail) => "fail",
    }
}

// ─── Writer ───────────────────────────────────────────────────────────────────

pub struct JsonWriter;

impl OutputWriter for JsonWriter {
    fn format(&self, runs: &[VerificationRun]) -> Result<String> {
        let view = JsonReport {
            verdict: verdict(runs),
            runs: runs.iter().map(build_run).collect(),
        };
        Ok(serde_json::to_string_pretty(&view)?)
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}
