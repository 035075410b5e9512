use crate::application::monitoring::PerfReport;
use crate::domain::mismatch::MismatchReason;
use crate::domain::verification::{Outcome, RunScope, VerificationRun};
use colored::*;
use tabled::settings::{object::Columns, Alignment, Modify, Style};
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct TableRow {
    table: String,
    mismatches: String,
}

#[derive(Tabled)]
struct MismatchRow {
    table: String,
    pk: String,
    reason: String,
}

fn describe(reason: &MismatchReason) -> String {
    match reason {
        MismatchReason::DigestDiffers => "fingerprint differs".to_string(),
        MismatchReason::MissingOnTarget => "missing on target".to_string(),
        MismatchReason::MissingOnSource => "missing on source".to_string(),
        MismatchReason::Undecodable { column, reason } => {
            format!("undecodable {}: {}", column, reason)
        }
    }
}

/// Print the verdict of one run, its tables, and every mismatched key.
pub fn print_run_summary(run: &VerificationRun) {
    println!();

    let title = match run.scope {
        RunScope::Cutover => "CUTOVER VERIFICATION".to_string(),
        RunScope::Incremental(trigger) => format!("INCREMENTAL VERIFICATION ({:?})", trigger),
    };
    println!("{}", title.bold().cyan());
    println!("Run: {}", run.id.bright_yellow());

    let verdict = match run.outcome {
        Outcome::Pass => "✓ Source and target match.".bold().green(),
        Outcome::Deferred => "⚠ Mismatches deferred to cutover.".bold().yellow(),
        Outcome::Fail => "✗ Source and target differ.".bold().red(),
    };
    println!("{}", verdict);
    println!();

    let rows: Vec<TableRow> = run
        .tables_examined
        .iter()
        .map(|t| {
            let mismatched = run.mismatches.get(t).map_or(0, |s| s.len());
            TableRow {
                table: t.bold().to_string(),
                mismatches: if mismatched == 0 {
                    "0".green().to_string()
                } else {
                    mismatched.to_string().red().to_string()
                },
            }
        })
        .collect();

    if !rows.is_empty() {
        let table = Table::new(rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(1..=1)).with(Alignment::right()))
            .to_string();
        println!("{table}");
        println!(
            "  Total: {} row(s) compared across {} table(s)",
            run.rows_compared.to_string().bold(),
            run.tables_examined.len()
        );
        println!();
    }

    if run.mismatches.is_empty() {
        return;
    }

    let rows: Vec<MismatchRow> = run
        .mismatches
        .iter()
        .flat_map(|(table, set)| {
            set.mismatches.iter().map(move |(pk, reason)| MismatchRow {
                table: table.bold().to_string(),
                pk: pk.to_string().yellow().to_string(),
                reason: describe(reason),
            })
        })
        .collect();

    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..=1)).with(Alignment::right()))
        .to_string();
    println!("{}", "MISMATCHED ROWS".bold().red());
    println!("{table}");
    println!();
}

// ─── Performance summary ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct PerfRow {
    operation: String,
    table: String,
    calls: String,
    #[tabled(rename = "rows")]
    rows: String,
    #[tabled(rename = "time (ms)")]
    duration_ms: String,
}

/// Print a performance timing table to stdout.
pub fn print_perf_summary(report: &PerfReport) {
    if report.timings.is_empty() {
        return;
    }

    println!("{}", "PERFORMANCE".bold().cyan());

    let rows: Vec<PerfRow> = report
        .timings
        .iter()
        .map(|t| PerfRow {
            operation: t.operation.dimmed().to_string(),
            table: t.table.bold().to_string(),
            calls: t.calls.to_string(),
            rows: t.rows.to_string(),
            duration_ms: format_duration(t.duration_ms),
        })
        .collect();

    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..=4)).with(Alignment::right()))
        .to_string();

    println!("{table}");

    println!(
        "  Total: {} row(s) fetched  ·  {} row(s) compared  ·  {} ms elapsed",
        report.total_rows_fetched.to_string().bold(),
        report.total_rows_compared.to_string().bold(),
        format_duration(report.total_ms),
    );
    println!();
}

fn format_duration(ms: u128) -> String {
    if ms >= 1_000 {
        format!("{:.1}s", ms as f64 / 1_000.0).yellow().to_string()
    } else if ms >= 100 {
        ms.to_string().yellow().to_string()
    } else {
        ms.to_string().green().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_read_as_plain_text() {
        assert_eq!(describe(&MismatchReason::MissingOnTarget), "missing on target");
        assert_eq!(
            describe(&MismatchReason::Undecodable {
                column: "data".into(),
                reason: "bad block".into()
            }),
            "undecodable data: bad block"
        );
    }
}
