//! # cutover-verifier — library usage example
//!
//! Shows two ways of embedding the verifier in a migration tool:
//!
//! 1. **From a config file**: connect to both databases and run the cutover
//!    pass, as the CLI does
//! 2. **Signal-driven**: feed copy / change / freeze signals through a
//!    channel, here against in-memory tables with one corrupted row
//!
//! Run with a config file:
//!   cargo run --example verify_as_lib -- verifier.toml
//!
//! Run the in-memory walkthrough:
//!   cargo run --example verify_as_lib

use std::sync::Arc;

use anyhow::Result;
use cutover_verifier::{
    build_verifier, build_verifier_with, drive, AppConfig, Collation, ColumnSpec, ColumnValue,
    Endpoints, MemoryRowRepository, PrimaryKey, Row, Schema, StatusEvent, StatusPublisher,
    TableConfig, TableName, VerifierConfig, VerifierSignal,
};
use tokio::sync::{mpsc, oneshot};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some(path) => from_config_file(path).await,
        None => signal_driven().await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pattern 1: load config from a TOML file and verify frozen databases
// ─────────────────────────────────────────────────────────────────────────────
async fn from_config_file(path: &str) -> Result<()> {
    println!("=== Pattern 1: from config file ({path}) ===\n");

    let cfg = AppConfig::load(path)?;
    let (verifier, _perf) = build_verifier(&cfg, StatusPublisher::default()).await?;

    match verifier.verify_before_cutover().await {
        Ok(Some(run)) => println!("verified {} rows, safe to cut over", run.rows_compared),
        Ok(None) => println!("verification disabled"),
        Err(e) => println!("do not cut over: {e}"),
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Pattern 2: drive the verifier with signals, as a migration's copier and
// change-stream reader would.
// ─────────────────────────────────────────────────────────────────────────────
async fn signal_driven() -> Result<()> {
    println!("=== Pattern 2: signal-driven, in memory ===\n");

    let table = TableName("test_table_1".into());
    let collation = Collation::parse("utf8mb4_unicode_ci")?;
    let source = Arc::new(MemoryRowRepository::new());
    let target = Arc::new(MemoryRowRepository::new());
    for repo in [&source, &target] {
        repo.create_table(
            &table,
            vec![ColumnSpec::binary("id"), ColumnSpec::text("data", collation.clone())],
        );
    }

    let endpoints = Endpoints {
        source: source.clone(),
        target: target.clone(),
        source_schema: Schema("gftest".into()),
        target_schema: Schema("gftest".into()),
    };
    let (verifier, _perf) = build_verifier_with(
        endpoints,
        &VerifierConfig::default(),
        &[TableConfig::new("test_table_1")],
        StatusPublisher::default(),
    );

    let mut acks = verifier.subscribe();
    let mut events = verifier.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                StatusEvent::Fatal(fatal) => println!("[event] fatal: {}", fatal.message),
                other => println!("[event] {other:?}"),
            }
        }
    });

    let (tx, rx) = mpsc::channel(16);
    let driver = tokio::spawn(drive(verifier, rx));

    // Copy ten rows in two batches.
    for batch in [1u64..=5, 6..=10] {
        let pks: Vec<PrimaryKey> = batch.map(PrimaryKey).collect();
        for pk in &pks {
            let row = Row::new(table.clone(), *pk).with(
                "data",
                ColumnValue::text(&format!("row {pk}"), collation.charset()),
            );
            source.upsert(row.clone());
            target.upsert(row);
        }
        tx.send(VerifierSignal::BatchCopied {
            table: table.clone(),
            pks,
        })
        .await?;
    }
    tx.send(VerifierSignal::RowCopyCompleted).await?;
    while acks.recv().await? != StatusEvent::RowCopyCompleted {}

    // Something outside the migration scribbles over a target row.
    target.upsert(
        Row::new(table.clone(), PrimaryKey(5))
            .with("data", ColumnValue::text("corrupted", collation.charset())),
    );

    let (reply, verdict) = oneshot::channel();
    tx.send(VerifierSignal::WritesFrozen { reply }).await?;

    match verdict.await? {
        Ok(_) => println!("cutover verified"),
        Err(e) => println!("cutover blocked: {e}"),
    }
    driver.await??;
    Ok(())
}
