use anyhow::Result;
use std::sync::{Arc, Mutex};

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod presentation;

// ─── Log level ────────────────────────────────────────────────────────────────

/// Controls the verbosity of the verifier's internal tracing output.
///
/// Pass to [`init_tracing`] before calling any async entry point.
///
/// | Variant | `tracing` level | When to use                          |
/// |---------|-----------------|--------------------------------------|
/// | `Error` | `error`         | `--quiet` / CI scripting             |
/// | `Info`  | `info`          | Default: pass verdicts and timings   |
/// | `Debug` | `debug`         | `--verbose`: SQL and per-batch spans |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Info,
    Debug,
}

/// Initialise the global `tracing` subscriber.
///
/// Respects `RUST_LOG` when set, falling back to `level` otherwise. Call
/// this **once** at startup. Library consumers who manage their own
/// subscriber should skip it.
///
/// Only available when the `cli` feature is enabled (pulls in
/// `tracing-subscriber`).
#[cfg(feature = "cli")]
pub fn init_tracing(level: LogLevel) {
    use tracing_subscriber::fmt::format::FmtSpan;

    let default_filter = match level {
        LogLevel::Error => "cutover_verifier=error",
        LogLevel::Info => "cutover_verifier=info",
        LogLevel::Debug => "cutover_verifier=debug",
    };

    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

// ─── Public API Facade ───

pub use application::detector::MismatchDetector;
pub use application::fetcher::DualSourceFetcher;
pub use application::monitoring::PerfReport;
pub use application::orchestrator::{InlineVerifier, VerifierState};
pub use application::reporter::{LogReporter, StatusPublisher};
pub use application::verifier::{drive, NoVerifier, Verifier, VerifierSignal};
pub use domain::canonical::{canonicalize, CanonicalValue};
pub use domain::encoding::{Charset, Collation, ColumnEncoding, Compression};
pub use domain::events::{FatalError, StatusEvent};
pub use domain::fingerprint::{fingerprint, ColumnOrder, RowFingerprint};
pub use domain::mismatch::{MismatchReason, MismatchSet};
pub use domain::ports::{Detector, RowRepository};
pub use domain::row::{ColumnSpec, ColumnValue, Row};
pub use domain::value_objects::{ColumnName, ExcludedColumns, Fingerprint, PrimaryKey, Schema, TableName};
pub use domain::verification::{IncrementalTrigger, Outcome, RunScope, VerificationRun};
pub use error::{DecompressionError, VerifierError};
pub use infrastructure::config::{
    AppConfig, CheckScope, DbConfig, OutputConfig, ReplicationMismatchPolicy, TableConfig,
    VerifierConfig, VerifierKind,
};
pub use infrastructure::db::memory::MemoryRowRepository;

use crate::application::monitoring::{MonitoringDetector, MonitoringRowRepository};
use crate::infrastructure::db::client::connect;

/// Both sides of a migration, already connected.
pub struct Endpoints {
    pub source: Arc<dyn RowRepository>,
    pub target: Arc<dyn RowRepository>,
    pub source_schema: Schema,
    pub target_schema: Schema,
}

// ─── Public entry points ───

/// Build the verifier `verifier.kind` selects over already-connected
/// repositories.
///
/// Reads and comparisons are wrapped in the monitoring decorators; the
/// returned [`PerfReport`] accumulates their timings across every pass.
pub fn build_verifier_with(
    endpoints: Endpoints,
    verifier: &VerifierConfig,
    tables: &[TableConfig],
    publisher: StatusPublisher,
) -> (Verifier, Arc<Mutex<PerfReport>>) {
    let report = PerfReport::new();

    let built = match verifier.kind {
        VerifierKind::None => Verifier::Disabled(NoVerifier::new(publisher)),
        VerifierKind::Inline => {
            let source: Arc<dyn RowRepository> = Arc::new(MonitoringRowRepository::new(
                endpoints.source,
                Arc::clone(&report),
            ));
            let target: Arc<dyn RowRepository> = Arc::new(MonitoringRowRepository::new(
                endpoints.target,
                Arc::clone(&report),
            ));
            let detector = Arc::new(MonitoringDetector::new(
                Arc::new(MismatchDetector::new()),
                Arc::clone(&report),
            ));
            let fetcher = DualSourceFetcher::new(
                source,
                target,
                endpoints.source_schema,
                endpoints.target_schema,
                verifier.batch_size,
            );
            Verifier::Inline(InlineVerifier::new(
                fetcher,
                detector,
                tables.to_vec(),
                verifier.clone(),
                publisher,
            ))
        }
    };

    (built, report)
}

/// Connect to both databases in `cfg` and build the configured verifier.
pub async fn build_verifier(
    cfg: &AppConfig,
    publisher: StatusPublisher,
) -> Result<(Verifier, Arc<Mutex<PerfReport>>)> {
    let source = Arc::new(connect(&cfg.source).await?);
    let target = Arc::new(connect(&cfg.target).await?);
    let endpoints = Endpoints {
        source,
        target,
        source_schema: cfg.source.schema(),
        target_schema: cfg.target.schema(),
    };
    Ok(build_verifier_with(endpoints, &cfg.verifier, &cfg.tables, publisher))
}
