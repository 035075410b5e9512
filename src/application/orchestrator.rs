use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::application::fetcher::DualSourceFetcher;
use crate::application::reporter::StatusPublisher;
use crate::domain::events::{FatalError, StatusEvent};
use crate::domain::fingerprint::ColumnOrder;
use crate::domain::mismatch::MismatchSet;
use crate::domain::ports::Detector;
use crate::domain::value_objects::{PrimaryKey, TableName};
use crate::domain::verification::{IncrementalTrigger, RunBuilder, RunScope, VerificationRun};
use crate::error::{Result, VerifierError};
use crate::infrastructure::config::{CheckScope, ReplicationMismatchPolicy, TableConfig, VerifierConfig};

/// Externally visible lifecycle of the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifierState {
    Idle,
    IncrementalVerifying,
    CutoverVerifying,
    Verified,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Copying,
    Cutover,
    Verified,
    Failed,
    Aborted,
}

type KeySets = BTreeMap<TableName, BTreeSet<PrimaryKey>>;

/// How far a full-table incremental pass may look into a table.
///
/// The copier walks each table in ascending key order, so while bulk copy
/// runs, keys above the last copied one are expected to be missing on the
/// target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyFrontier {
    Unbounded,
    Through(PrimaryKey),
    NotStarted,
}

impl CopyFrontier {
    fn admits(self, pk: PrimaryKey) -> bool {
        match self {
            CopyFrontier::Unbounded => true,
            CopyFrontier::Through(last) => pk <= last,
            CopyFrontier::NotStarted => false,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    phase: Phase,
    /// Incremental passes started and not yet finished, per table.
    outstanding: BTreeMap<TableName, usize>,
    /// Of those, the ones triggered by copied batches.
    outstanding_batches: usize,
    copy_completed: bool,
    /// Highest key the copier has reported per table.
    copied_through: BTreeMap<TableName, PrimaryKey>,
    /// Signalled keys. Only kept when the cutover pass re-checks them.
    touched: KeySets,
    deferred: KeySets,
    runs: Vec<VerificationRun>,
    fatal: Option<FatalError>,
}

impl Shared {
    fn gate(&self, request: &str) -> Result<()> {
        match self.phase {
            Phase::Copying => Ok(()),
            Phase::Failed => Err(VerifierError::Halted),
            Phase::Aborted => Err(VerifierError::Cancelled),
            Phase::Cutover | Phase::Verified => Err(VerifierError::OrchestratorMisuse(format!(
                "{} after cutover verification began",
                request
            ))),
        }
    }
}

/// Result of checking one key set of one table.
struct TableCheck {
    qualified: String,
    compared: usize,
    set: MismatchSet,
}

struct Inner {
    fetcher: DualSourceFetcher,
    detector: Arc<dyn Detector>,
    tables: BTreeMap<TableName, TableConfig>,
    config: VerifierConfig,
    publisher: StatusPublisher,
    shared: Mutex<Shared>,
    table_locks: BTreeMap<TableName, Arc<AsyncMutex<()>>>,
    abort_tx: watch::Sender<bool>,
}

/// Decrements the outstanding counters when an incremental pass ends,
/// however it ends.
struct OutstandingPass<'a> {
    inner: &'a Inner,
    table: TableName,
    trigger: IncrementalTrigger,
}

impl Drop for OutstandingPass<'_> {
    fn drop(&mut self) {
        let mut s = self.inner.shared();
        let remaining = match s.outstanding.get_mut(&self.table) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            s.outstanding.remove(&self.table);
        }
        if self.trigger == IncrementalTrigger::BatchCopied {
            s.outstanding_batches = s.outstanding_batches.saturating_sub(1);
        }
    }
}

/// The inline verifier: incremental passes while data moves, one exhaustive
/// pass while writes are frozen.
///
/// Cloning is cheap and every clone drives the same verifier, so passes can
/// be spawned onto tasks.
#[derive(Clone)]
pub struct InlineVerifier {
    inner: Arc<Inner>,
}

impl InlineVerifier {
    pub fn new(
        fetcher: DualSourceFetcher,
        detector: Arc<dyn Detector>,
        tables: Vec<TableConfig>,
        config: VerifierConfig,
        publisher: StatusPublisher,
    ) -> Self {
        let tables: BTreeMap<TableName, TableConfig> =
            tables.into_iter().map(|t| (t.table_name(), t)).collect();
        let table_locks: BTreeMap<TableName, Arc<AsyncMutex<()>>> =
            tables.keys().map(|t| (t.clone(), Arc::default())).collect();
        let (abort_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                fetcher,
                detector,
                tables,
                config,
                publisher,
                shared: Mutex::new(Shared::default()),
                table_locks,
                abort_tx,
            }),
        }
    }

    /// Re-check `pks` of `table` after the copier or the change-stream
    /// reader wrote them.
    ///
    /// A mismatch on a copied batch halts the migration. A mismatch on
    /// replicated rows halts it or is deferred to cutover, depending on
    /// `replication_mismatch`.
    ///
    /// With a full-table scope, a pass before row copy completes only looks
    /// at keys up to the highest one the copier has reported for `table`.
    #[instrument(skip_all, fields(trigger = ?trigger, table = %table, keys = pks.len()))]
    pub async fn verify_incremental(
        &self,
        trigger: IncrementalTrigger,
        table: &TableName,
        pks: &[PrimaryKey],
    ) -> Result<VerificationRun> {
        let inner = &*self.inner;
        let table_cfg = inner.table(table)?.clone();
        let _pass = inner.begin_incremental(trigger, table, pks)?;
        let builder = RunBuilder::start(RunScope::Incremental(trigger));

        let seeded: BTreeSet<PrimaryKey> = pks.iter().copied().collect();
        let check = inner
            .cancellable(async {
                let lock = inner.lock_for(table);
                let _held = lock.lock().await;
                let frontier = inner.frontier(table);
                let keys = inner
                    .keys_for(inner.config.incremental_scope, &table_cfg, seeded, frontier)
                    .await?;
                inner.check_table(&table_cfg, keys).await
            })
            .await;

        inner.finish_incremental(trigger, table, builder, check)
    }

    pub async fn on_batch_copied(&self, table: &TableName, pks: &[PrimaryKey]) -> Result<VerificationRun> {
        self.verify_incremental(IncrementalTrigger::BatchCopied, table, pks)
            .await
    }

    pub async fn on_rows_changed(&self, table: &TableName, pks: &[PrimaryKey]) -> Result<VerificationRun> {
        self.verify_incremental(IncrementalTrigger::RowsChanged, table, pks)
            .await
    }

    /// Acknowledge the end of bulk copy. Every copied batch must have
    /// finished verifying; later `BatchCopied` signals are rejected.
    pub fn row_copy_completed(&self) -> Result<()> {
        {
            let mut s = self.inner.shared();
            s.gate("row copy completion")?;
            if s.copy_completed {
                return Err(VerifierError::OrchestratorMisuse(
                    "row copy already completed".to_string(),
                ));
            }
            if s.outstanding_batches > 0 {
                return Err(VerifierError::OrchestratorMisuse(format!(
                    "row copy completed with {} batch verifications in flight",
                    s.outstanding_batches
                )));
            }
            s.copy_completed = true;
        }
        info!("row copy completed; all copied batches verified");
        self.inner.publisher.emit(StatusEvent::RowCopyCompleted);
        Ok(())
    }

    /// The exhaustive pass run while writes are frozen.
    ///
    /// It covers every configured table, so an incremental pass still
    /// outstanding on any of them is a sequencing error: the verifier fails
    /// with `OrchestratorMisuse` naming those tables.
    ///
    /// Emits exactly one `Verified` event. On mismatch it also emits one
    /// `Fatal` event and returns `MismatchDetected` carrying the cutover
    /// failure record.
    #[instrument(skip(self))]
    pub async fn verify_before_cutover(&self) -> Result<VerificationRun> {
        let inner = &*self.inner;
        let (touched, deferred) = inner.begin_cutover()?;
        let builder = RunBuilder::start(RunScope::Cutover);
        info!(
            tables = inner.tables.len(),
            scope = ?inner.config.cutover_scope,
            deferred = deferred.values().map(BTreeSet::len).sum::<usize>(),
            "starting cutover verification"
        );

        let checks = inner
            .cancellable(self.check_all_tables(touched, deferred))
            .await;
        inner.finish_cutover(builder, checks)
    }

    async fn check_all_tables(&self, touched: KeySets, deferred: KeySets) -> Result<Vec<TableCheck>> {
        let mut tasks = JoinSet::new();
        for table_cfg in self.inner.tables.values() {
            let name = table_cfg.table_name();
            let mut seeded = deferred.get(&name).cloned().unwrap_or_default();
            if self.inner.config.cutover_scope == CheckScope::TouchedRows {
                seeded.extend(touched.get(&name).into_iter().flatten().copied());
            }

            let inner = Arc::clone(&self.inner);
            let table_cfg = table_cfg.clone();
            tasks.spawn(async move {
                let lock = inner.lock_for(&table_cfg.table_name());
                let _held = lock.lock().await;
                let keys = inner
                    .keys_for(inner.config.cutover_scope, &table_cfg, seeded, CopyFrontier::Unbounded)
                    .await?;
                inner.check_table(&table_cfg, keys).await
            });
        }

        // Dropping the set on an early return aborts the remaining tables.
        let mut checks = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            checks.push(joined??);
        }
        Ok(checks)
    }

    /// Compare every row of `table` without touching verifier state.
    /// Running it twice over unchanged data gives the same set.
    pub async fn inspect_table(&self, table: &TableName) -> Result<MismatchSet> {
        let inner = &*self.inner;
        let table_cfg = inner.table(table)?.clone();
        inner
            .cancellable(async {
                let lock = inner.lock_for(table);
                let _held = lock.lock().await;
                let keys = inner
                    .keys_for(
                        CheckScope::FullTable,
                        &table_cfg,
                        BTreeSet::new(),
                        CopyFrontier::Unbounded,
                    )
                    .await?;
                inner.check_table(&table_cfg, keys).await
            })
            .await
            .map(|check| check.set)
    }

    /// Abandon in-flight passes and refuse further work. Runs already
    /// recorded are kept; a terminal verdict is left untouched.
    pub fn abort(&self) {
        let aborted = {
            let mut s = self.inner.shared();
            match s.phase {
                Phase::Verified | Phase::Failed | Phase::Aborted => false,
                Phase::Copying | Phase::Cutover => {
                    s.phase = Phase::Aborted;
                    true
                }
            }
        };
        if aborted {
            warn!("verification aborted");
            self.inner.abort_tx.send_replace(true);
        }
    }

    /// Fail the migration on an error raised around the passes rather than
    /// by one, e.g. a signal naming a table that is not configured.
    /// Cancellation and already terminal verifiers are left alone.
    pub fn halt(&self, error: &VerifierError) {
        if !matches!(error, VerifierError::Cancelled) {
            self.inner.fail(FatalError::message(error.to_string()));
        }
    }

    pub fn state(&self) -> VerifierState {
        let s = self.inner.shared();
        match s.phase {
            Phase::Copying if !s.outstanding.is_empty() => VerifierState::IncrementalVerifying,
            Phase::Copying => VerifierState::Idle,
            Phase::Cutover => VerifierState::CutoverVerifying,
            Phase::Verified => VerifierState::Verified,
            Phase::Failed => VerifierState::Failed,
            Phase::Aborted => VerifierState::Aborted,
        }
    }

    /// Every sealed run, in completion order.
    pub fn runs(&self) -> Vec<VerificationRun> {
        self.inner.shared().runs.clone()
    }

    /// Keys whose mismatch was deferred to cutover, by qualified table.
    pub fn deferred(&self) -> BTreeMap<String, Vec<PrimaryKey>> {
        self.inner
            .shared()
            .deferred
            .iter()
            .map(|(t, pks)| (self.inner.fetcher.qualified(t), pks.iter().copied().collect()))
            .collect()
    }

    /// The record that moved the verifier into `Failed`, if it did.
    pub fn fatal(&self) -> Option<FatalError> {
        self.inner.shared().fatal.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.publisher.subscribe()
    }

    pub fn tables(&self) -> Vec<TableName> {
        self.inner.tables.keys().cloned().collect()
    }
}

impl Inner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn table(&self, table: &TableName) -> Result<&TableConfig> {
        self.tables.get(table).ok_or_else(|| {
            VerifierError::Config(format!("table {} is not configured for verification", table))
        })
    }

    fn lock_for(&self, table: &TableName) -> Arc<AsyncMutex<()>> {
        self.table_locks.get(table).cloned().unwrap_or_default()
    }

    fn frontier(&self, table: &TableName) -> CopyFrontier {
        let s = self.shared();
        if s.copy_completed {
            return CopyFrontier::Unbounded;
        }
        match s.copied_through.get(table) {
            Some(last) => CopyFrontier::Through(*last),
            None => CopyFrontier::NotStarted,
        }
    }

    /// Run `work` unless the verifier is aborted first.
    async fn cancellable<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        let mut aborted = self.abort_tx.subscribe();
        let already = *aborted.borrow();
        if already {
            return Err(VerifierError::Cancelled);
        }
        tokio::select! {
            result = work => result,
            _ = aborted.wait_for(|a| *a) => Err(VerifierError::Cancelled),
        }
    }

    /// Move into `Failed` and publish the record, once.
    fn fail(&self, fatal: FatalError) {
        let transitioned = {
            let mut s = self.shared();
            match s.phase {
                Phase::Failed | Phase::Aborted => false,
                _ => {
                    s.phase = Phase::Failed;
                    s.fatal = Some(fatal.clone());
                    true
                }
            }
        };
        if transitioned {
            self.publisher.emit(StatusEvent::Fatal(fatal));
        }
    }

    fn begin_incremental(
        &self,
        trigger: IncrementalTrigger,
        table: &TableName,
        pks: &[PrimaryKey],
    ) -> Result<OutstandingPass<'_>> {
        let mut s = self.shared();
        s.gate("incremental verification")?;
        if trigger == IncrementalTrigger::BatchCopied && s.copy_completed {
            return Err(VerifierError::OrchestratorMisuse(
                "batch copied after row copy completed".to_string(),
            ));
        }
        *s.outstanding.entry(table.clone()).or_default() += 1;
        if trigger == IncrementalTrigger::BatchCopied {
            s.outstanding_batches += 1;
            if let Some(last) = pks.iter().max().copied() {
                let through = s.copied_through.entry(table.clone()).or_insert(last);
                *through = (*through).max(last);
            }
        }
        if self.config.cutover_scope == CheckScope::TouchedRows {
            s.touched
                .entry(table.clone())
                .or_default()
                .extend(pks.iter().copied());
        }
        Ok(OutstandingPass {
            inner: self,
            table: table.clone(),
            trigger,
        })
    }

    fn finish_incremental(
        &self,
        trigger: IncrementalTrigger,
        table: &TableName,
        mut builder: RunBuilder,
        check: Result<TableCheck>,
    ) -> Result<VerificationRun> {
        let check = match check {
            Ok(check) => check,
            Err(VerifierError::Cancelled) => return Err(VerifierError::Cancelled),
            Err(e) => {
                self.fail(FatalError::message(e.to_string()));
                return Err(e);
            }
        };

        let mismatched = check.set.pks();
        let qualified = check.qualified.clone();
        builder.record(&check.qualified, check.compared, check.set);

        let hard_stop = trigger == IncrementalTrigger::BatchCopied
            || self.config.replication_mismatch == ReplicationMismatchPolicy::HardStop;
        let defer = !mismatched.is_empty() && !hard_stop;
        let run = builder.seal(defer);

        {
            let mut s = self.shared();
            if s.phase == Phase::Aborted {
                return Err(VerifierError::Cancelled);
            }
            s.runs.push(run.clone());
            if defer {
                s.deferred
                    .entry(table.clone())
                    .or_default()
                    .extend(mismatched.iter().copied());
            }
        }

        if mismatched.is_empty() {
            debug!(table = %qualified, rows = run.rows_compared, "incremental verification passed");
            return Ok(run);
        }
        if defer {
            warn!(table = %qualified, pks = ?mismatched, "replicated rows differ; re-checking at cutover");
            return Ok(run);
        }

        let fatal = FatalError::incremental(&qualified, mismatched);
        self.fail(fatal.clone());
        Err(VerifierError::MismatchDetected(fatal))
    }

    /// Enter cutover and snapshot the touched and deferred keys.
    fn begin_cutover(&self) -> Result<(KeySets, KeySets)> {
        let misuse = {
            let mut s = self.shared();
            match s.phase {
                Phase::Failed => return Err(VerifierError::Halted),
                Phase::Aborted => return Err(VerifierError::Cancelled),
                Phase::Cutover | Phase::Verified => {
                    return Err(VerifierError::OrchestratorMisuse(
                        "cutover verification already ran".to_string(),
                    ))
                }
                Phase::Copying if !s.outstanding.is_empty() => format!(
                    "cutover requested while incremental verification is outstanding for: {}",
                    s.outstanding
                        .keys()
                        .map(|t| self.fetcher.qualified(t))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                Phase::Copying => {
                    s.phase = Phase::Cutover;
                    return Ok((s.touched.clone(), s.deferred.clone()));
                }
            }
        };
        self.fail(FatalError::message(misuse.clone()));
        Err(VerifierError::OrchestratorMisuse(misuse))
    }

    fn finish_cutover(
        &self,
        mut builder: RunBuilder,
        checks: Result<Vec<TableCheck>>,
    ) -> Result<VerificationRun> {
        let checks = match checks {
            Ok(checks) => checks,
            Err(VerifierError::Cancelled) => return Err(VerifierError::Cancelled),
            Err(e) => {
                self.fail(FatalError::message(format!("cutover verification failed: {}", e)));
                return Err(e);
            }
        };

        for check in checks {
            builder.record(&check.qualified, check.compared, check.set);
        }
        let run = builder.seal(false);
        let failing = run.failing_tables();

        {
            let mut s = self.shared();
            if s.phase == Phase::Aborted {
                return Err(VerifierError::Cancelled);
            }
            s.runs.push(run.clone());
            if failing.is_empty() {
                s.phase = Phase::Verified;
            }
        }

        self.publisher.emit(StatusEvent::Verified {
            tables: run.tables_examined.iter().cloned().collect(),
            failing: failing.clone(),
        });

        if failing.is_empty() {
            info!(
                tables = run.tables_examined.len(),
                rows = run.rows_compared,
                "cutover verification passed"
            );
            return Ok(run);
        }

        let fatal = FatalError::cutover(run.mismatched_pks());
        self.fail(fatal.clone());
        Err(VerifierError::MismatchDetected(fatal))
    }

    /// Keys a pass checks: the seeded keys, plus every key on either side
    /// within `frontier` for a full-table scope.
    async fn keys_for(
        &self,
        scope: CheckScope,
        table: &TableConfig,
        seeded: BTreeSet<PrimaryKey>,
        frontier: CopyFrontier,
    ) -> Result<Vec<PrimaryKey>> {
        match scope {
            CheckScope::TouchedRows => Ok(seeded.into_iter().collect()),
            CheckScope::FullTable => {
                let mut all: BTreeSet<PrimaryKey> = self
                    .fetcher
                    .all_primary_keys(&table.table_name(), &table.pk_column())
                    .await?
                    .into_iter()
                    .filter(|pk| frontier.admits(*pk))
                    .collect();
                all.extend(seeded);
                Ok(all.into_iter().collect())
            }
        }
    }

    /// Column order is re-derived per pass so it follows the target schema
    /// as it is when the pass runs.
    async fn column_order(&self, table: &TableConfig) -> Result<ColumnOrder> {
        let columns = self.fetcher.describe_target(&table.table_name()).await?;
        let decompress = self.config.decompress;
        Ok(ColumnOrder::from_target(
            table.table_name(),
            table.pk_column(),
            &columns,
            &table.excluded_columns,
            |column| {
                if decompress {
                    table.compressed_columns.get(column).copied()
                } else {
                    None
                }
            },
        ))
    }

    #[instrument(skip_all, fields(table = %table.name, keys = keys.len()))]
    async fn check_table(&self, table: &TableConfig, keys: Vec<PrimaryKey>) -> Result<TableCheck> {
        let name = table.table_name();
        let qualified = self.fetcher.qualified(&name);
        let mut set = MismatchSet::new(name.clone());
        let mut compared = 0;

        if keys.is_empty() {
            return Ok(TableCheck {
                qualified,
                compared,
                set,
            });
        }

        let order = self.column_order(table).await?;
        for batch in keys.chunks(self.fetcher.batch_size()) {
            let (source, target) = self.fetcher.fetch(&name, &order.primary_key, batch).await?;
            compared += source.len().max(target.len());
            set.merge(self.detector.compare(&source, &target, &order));
        }

        Ok(TableCheck {
            qualified,
            compared,
            set,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::detector::MismatchDetector;
    use crate::domain::row::{ColumnSpec, ColumnValue, Row};
    use crate::domain::value_objects::Schema;
    use crate::infrastructure::db::memory::MemoryRowRepository;

    struct Fixture {
        source: Arc<MemoryRowRepository>,
        target: Arc<MemoryRowRepository>,
        verifier: InlineVerifier,
    }

    fn table() -> TableName {
        TableName("test_table_1".into())
    }

    fn fixture(config: VerifierConfig) -> Fixture {
        let source = Arc::new(MemoryRowRepository::new());
        let target = Arc::new(MemoryRowRepository::new());
        for repo in [&source, &target] {
            repo.create_table(&table(), vec![ColumnSpec::binary("id"), ColumnSpec::binary("data")]);
            for pk in 1..=3 {
                repo.upsert(Row::new(table(), PrimaryKey(pk)).with("data", ColumnValue::bytes("x")));
            }
        }
        let fetcher = DualSourceFetcher::new(
            source.clone(),
            target.clone(),
            Schema("gftest".into()),
            Schema("gftest".into()),
            config.batch_size,
        );
        let verifier = InlineVerifier::new(
            fetcher,
            Arc::new(MismatchDetector::new()),
            vec![TableConfig::new("test_table_1")],
            config,
            StatusPublisher::default(),
        );
        Fixture {
            source,
            target,
            verifier,
        }
    }

    #[tokio::test]
    async fn starts_idle_and_returns_to_idle_after_a_pass() {
        let f = fixture(VerifierConfig::default());
        assert_eq!(f.verifier.state(), VerifierState::Idle);
        let run = f
            .verifier
            .on_batch_copied(&table(), &[PrimaryKey(1), PrimaryKey(2)])
            .await
            .unwrap();
        assert!(run.passed());
        assert_eq!(run.rows_compared, 2);
        assert_eq!(f.verifier.state(), VerifierState::Idle);
    }

    #[tokio::test]
    async fn cutover_with_outstanding_pass_is_fatal_misuse() {
        let f = fixture(VerifierConfig::default());
        let lock = f.verifier.inner.lock_for(&table());
        let held = lock.lock().await;

        let v = f.verifier.clone();
        let pass = tokio::spawn(async move { v.on_batch_copied(&table(), &[PrimaryKey(1)]).await });
        while f.verifier.state() != VerifierState::IncrementalVerifying {
            tokio::task::yield_now().await;
        }

        let err = f.verifier.verify_before_cutover().await.unwrap_err();
        assert!(matches!(err, VerifierError::OrchestratorMisuse(_)));
        assert_eq!(f.verifier.state(), VerifierState::Failed);

        drop(held);
        let _ = pass.await.unwrap();
        let fatal = f.verifier.fatal().unwrap();
        assert!(fatal.message.contains("outstanding"));
        assert!(fatal.message.contains("gftest.test_table_1"));
    }

    #[tokio::test]
    async fn abort_cancels_a_waiting_pass_and_keeps_recorded_runs() {
        let f = fixture(VerifierConfig::default());
        f.verifier.on_batch_copied(&table(), &[PrimaryKey(1)]).await.unwrap();

        let lock = f.verifier.inner.lock_for(&table());
        let held = lock.lock().await;
        let v = f.verifier.clone();
        let pass = tokio::spawn(async move { v.on_rows_changed(&table(), &[PrimaryKey(2)]).await });
        while f.verifier.state() != VerifierState::IncrementalVerifying {
            tokio::task::yield_now().await;
        }

        f.verifier.abort();
        assert!(matches!(pass.await.unwrap(), Err(VerifierError::Cancelled)));
        drop(held);

        assert_eq!(f.verifier.state(), VerifierState::Aborted);
        assert_eq!(f.verifier.runs().len(), 1);
        assert!(matches!(
            f.verifier.verify_before_cutover().await,
            Err(VerifierError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn unknown_table_is_a_config_error() {
        let f = fixture(VerifierConfig::default());
        let err = f
            .verifier
            .on_batch_copied(&TableName("nope".into()), &[PrimaryKey(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::Config(_)));
        assert_eq!(f.verifier.state(), VerifierState::Idle);
    }

    #[tokio::test]
    async fn deleted_row_on_target_fails_cutover() {
        let f = fixture(VerifierConfig::default());
        f.target.delete(&table(), PrimaryKey(2));
        let err = f.verifier.verify_before_cutover().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "cutover verification failed for: gftest.test_table_1 [pks: 2 ] "
        );
        assert!(f.source.row(&table(), PrimaryKey(2)).is_some());
    }

    #[tokio::test]
    async fn touched_keys_are_only_kept_when_cutover_rechecks_them() {
        let f = fixture(VerifierConfig::default());
        f.verifier.on_batch_copied(&table(), &[PrimaryKey(1), PrimaryKey(2)]).await.unwrap();
        f.verifier.on_rows_changed(&table(), &[PrimaryKey(3)]).await.unwrap();
        assert!(f.verifier.inner.shared().touched.is_empty());

        let f = fixture(VerifierConfig {
            cutover_scope: CheckScope::TouchedRows,
            ..VerifierConfig::default()
        });
        f.verifier.on_batch_copied(&table(), &[PrimaryKey(1), PrimaryKey(2)]).await.unwrap();
        assert_eq!(f.verifier.inner.shared().touched[&table()].len(), 2);
    }

    #[test]
    fn frontier_follows_the_highest_copied_key() {
        assert!(CopyFrontier::Unbounded.admits(PrimaryKey(u64::MAX)));
        assert!(CopyFrontier::Through(PrimaryKey(5)).admits(PrimaryKey(5)));
        assert!(!CopyFrontier::Through(PrimaryKey(5)).admits(PrimaryKey(6)));
        assert!(!CopyFrontier::NotStarted.admits(PrimaryKey(1)));
    }

    #[tokio::test]
    async fn halt_publishes_one_fatal_record() {
        let f = fixture(VerifierConfig::default());
        let mut events = f.verifier.subscribe();
        let err = VerifierError::Config("table nope is not configured for verification".into());

        f.verifier.halt(&err);
        f.verifier.halt(&err);
        f.verifier.halt(&VerifierError::Cancelled);

        assert_eq!(f.verifier.state(), VerifierState::Failed);
        assert!(matches!(events.recv().await.unwrap(), StatusEvent::Fatal(_)));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn row_copy_completion_blocks_later_batches() {
        let f = fixture(VerifierConfig::default());
        let mut events = f.verifier.subscribe();
        f.verifier.row_copy_completed().unwrap();
        assert_eq!(events.recv().await.unwrap(), StatusEvent::RowCopyCompleted);

        let err = f
            .verifier
            .on_batch_copied(&table(), &[PrimaryKey(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::OrchestratorMisuse(_)));
        // Replicated changes keep flowing after bulk copy.
        assert!(f.verifier.on_rows_changed(&table(), &[PrimaryKey(1)]).await.is_ok());
    }
}
