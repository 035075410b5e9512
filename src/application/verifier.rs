use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::application::orchestrator::{InlineVerifier, VerifierState};
use crate::application::reporter::StatusPublisher;
use crate::domain::events::StatusEvent;
use crate::domain::value_objects::{PrimaryKey, TableName};
use crate::domain::verification::{IncrementalTrigger, VerificationRun};
use crate::error::{Result, VerifierError};

/// What the migration tells the verifier.
#[derive(Debug)]
pub enum VerifierSignal {
    /// The copier wrote a batch of rows.
    BatchCopied { table: TableName, pks: Vec<PrimaryKey> },
    /// The change-stream reader applied replicated events.
    RowsChanged { table: TableName, pks: Vec<PrimaryKey> },
    /// Bulk copy finished.
    RowCopyCompleted,
    /// Writes are frozen; the reply carries the cutover verdict. `None`
    /// means no verification ran.
    WritesFrozen {
        reply: oneshot::Sender<Result<Option<VerificationRun>>>,
    },
    /// The migration is being torn down.
    Abort,
}

/// Verifier that checks nothing and lets cutover proceed.
#[derive(Debug, Clone, Default)]
pub struct NoVerifier {
    publisher: StatusPublisher,
}

impl NoVerifier {
    pub fn new(publisher: StatusPublisher) -> Self {
        Self { publisher }
    }

    pub fn row_copy_completed(&self) {
        self.publisher.emit(StatusEvent::RowCopyCompleted);
    }
}

/// The verifier selected by `verifier.kind`.
#[derive(Clone)]
pub enum Verifier {
    Inline(InlineVerifier),
    Disabled(NoVerifier),
}

impl Verifier {
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        match self {
            Verifier::Inline(v) => v.subscribe(),
            Verifier::Disabled(v) => v.publisher.subscribe(),
        }
    }

    pub fn state(&self) -> VerifierState {
        match self {
            Verifier::Inline(v) => v.state(),
            Verifier::Disabled(_) => VerifierState::Idle,
        }
    }

    pub fn runs(&self) -> Vec<VerificationRun> {
        match self {
            Verifier::Inline(v) => v.runs(),
            Verifier::Disabled(_) => Vec::new(),
        }
    }

    /// Run the cutover check directly, outside the signal loop.
    pub async fn verify_before_cutover(&self) -> Result<Option<VerificationRun>> {
        match self {
            Verifier::Inline(v) => v.verify_before_cutover().await.map(Some),
            Verifier::Disabled(_) => Ok(None),
        }
    }
}

/// Consume signals until the channel closes, cutover is answered, or the
/// migration is aborted.
///
/// Incremental passes run concurrently on a `JoinSet`. Row copy completion
/// and cutover both wait for every in-flight pass first. Once cutover has
/// been answered the driver returns `Ok`; the verdict itself travels through
/// the signal's reply.
///
/// Any other error halts the verifier, so it is published as a `Fatal`
/// event. The driver then keeps listening: a later `WritesFrozen` is
/// answered with that error, and the error is returned when the channel
/// closes or the migration is aborted.
pub async fn drive(verifier: Verifier, signals: mpsc::Receiver<VerifierSignal>) -> Result<()> {
    match verifier {
        Verifier::Inline(v) => drive_inline(v, signals).await,
        Verifier::Disabled(v) => drive_disabled(v, signals).await,
    }
}

async fn drive_inline(verifier: InlineVerifier, mut signals: mpsc::Receiver<VerifierSignal>) -> Result<()> {
    let mut in_flight: JoinSet<Result<VerificationRun>> = JoinSet::new();

    let halted = loop {
        let step = tokio::select! {
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                joined.map_err(VerifierError::from).and_then(|pass| pass.map(drop))
            }
            signal = signals.recv() => {
                let Some(signal) = signal else {
                    debug!("signal channel closed; draining in-flight verification");
                    match drain(&mut in_flight).await {
                        Ok(()) => return Ok(()),
                        Err(e) => break e,
                    }
                };
                match signal {
                    VerifierSignal::BatchCopied { table, pks } => {
                        spawn_pass(&mut in_flight, &verifier, IncrementalTrigger::BatchCopied, table, pks);
                        Ok(())
                    }
                    VerifierSignal::RowsChanged { table, pks } => {
                        spawn_pass(&mut in_flight, &verifier, IncrementalTrigger::RowsChanged, table, pks);
                        Ok(())
                    }
                    VerifierSignal::RowCopyCompleted => match drain(&mut in_flight).await {
                        Ok(()) => verifier.row_copy_completed(),
                        Err(e) => Err(e),
                    },
                    VerifierSignal::WritesFrozen { reply } => {
                        let verdict = match drain(&mut in_flight).await {
                            Ok(()) => verifier.verify_before_cutover().await.map(Some),
                            Err(e) => {
                                verifier.halt(&e);
                                Err(e)
                            }
                        };
                        answer(reply, verdict);
                        return Ok(());
                    }
                    VerifierSignal::Abort => {
                        verifier.abort();
                        in_flight.shutdown().await;
                        return Err(VerifierError::Cancelled);
                    }
                }
            }
        };
        if let Err(e) = step {
            break e;
        }
    };

    verifier.halt(&halted);
    in_flight.shutdown().await;
    warn!(error = %halted, "verification halted; waiting for cutover to collect the verdict");

    while let Some(signal) = signals.recv().await {
        match signal {
            VerifierSignal::WritesFrozen { reply } => {
                answer(reply, Err(halted));
                return Ok(());
            }
            VerifierSignal::Abort => break,
            _ => {}
        }
    }
    Err(halted)
}

fn answer(reply: oneshot::Sender<Result<Option<VerificationRun>>>, verdict: Result<Option<VerificationRun>>) {
    if reply.send(verdict).is_err() {
        warn!("cutover verdict dropped: nobody is waiting for it");
    }
}

async fn drive_disabled(verifier: NoVerifier, mut signals: mpsc::Receiver<VerifierSignal>) -> Result<()> {
    info!("verification disabled; cutover will not be checked");
    while let Some(signal) = signals.recv().await {
        match signal {
            VerifierSignal::BatchCopied { .. } | VerifierSignal::RowsChanged { .. } => {}
            VerifierSignal::RowCopyCompleted => verifier.row_copy_completed(),
            VerifierSignal::WritesFrozen { reply } => {
                let _ = reply.send(Ok(None));
                return Ok(());
            }
            VerifierSignal::Abort => return Err(VerifierError::Cancelled),
        }
    }
    Ok(())
}

fn spawn_pass(
    in_flight: &mut JoinSet<Result<VerificationRun>>,
    verifier: &InlineVerifier,
    trigger: IncrementalTrigger,
    table: TableName,
    pks: Vec<PrimaryKey>,
) {
    let verifier = verifier.clone();
    in_flight.spawn(async move { verifier.verify_incremental(trigger, &table, &pks).await });
}

async fn drain(in_flight: &mut JoinSet<Result<VerificationRun>>) -> Result<()> {
    while let Some(joined) = in_flight.join_next().await {
        joined??;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_verifier_lets_cutover_proceed() {
        let verifier = Verifier::Disabled(NoVerifier::default());
        let mut events = verifier.subscribe();
        let (tx, rx) = mpsc::channel(8);
        let driver = tokio::spawn(drive(verifier, rx));

        tx.send(VerifierSignal::BatchCopied {
            table: TableName("t".into()),
            pks: vec![PrimaryKey(1)],
        })
        .await
        .unwrap();
        tx.send(VerifierSignal::RowCopyCompleted).await.unwrap();
        let (reply, verdict) = oneshot::channel();
        tx.send(VerifierSignal::WritesFrozen { reply }).await.unwrap();

        assert!(verdict.await.unwrap().unwrap().is_none());
        driver.await.unwrap().unwrap();
        assert_eq!(events.recv().await.unwrap(), StatusEvent::RowCopyCompleted);
    }

    #[tokio::test]
    async fn disabled_verifier_stops_on_abort() {
        let (tx, rx) = mpsc::channel(1);
        let driver = tokio::spawn(drive(Verifier::Disabled(NoVerifier::default()), rx));
        tx.send(VerifierSignal::Abort).await.unwrap();
        assert!(matches!(driver.await.unwrap(), Err(VerifierError::Cancelled)));
    }
}
