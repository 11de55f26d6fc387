//! # Pipeline Worker
//!
//! Body of one detached orchestration run. The worker derives its starting
//! stage from the persisted snapshot, then walks
//! Upload → Unpack → ScanTrigger → ScanPoll → ReportTrigger → ReportPoll
//! strictly in order. Every wait goes through [`poll_with_retry`]; any stage
//! failure halts the chain and leaves the snapshot as last observed, so a later
//! run resumes instead of restarting.
//!
//! A run records the generation it works on once Upload is settled. Before
//! every trigger call the snapshot is re-read and the run stops with
//! [`StageFailure::Superseded`] when the process was invalidated or restarted
//! underneath it. A handler write rejected by the store for the same reason
//! ends the run the same way.

use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::client::{ExternalToolClient, JobStatus, RequestStatus};
use crate::config::PollingConfig;
use crate::database::SharedSnapshotStore;
use crate::error::{StageFailure, StoreError, ToolError};
use crate::logging::log_stage_transition;
use crate::models::ProcessSnapshot;
use crate::registry::ResourceLease;
use crate::resilience::{poll_with_retry, Attempt, PollOutcome, PollPolicy};
use crate::state_machine::{PipelineStage, StepName, StepState};

/// Observation of one trigger attempt
#[derive(Debug)]
enum Advance {
    Reached(ProcessSnapshot),
    /// The process can no longer reach the target step
    Blocked,
    Superseded { found: Option<u64> },
    Pending,
}

/// One accepted run of a resource's pipeline
pub(crate) struct PipelineRun {
    pub run_id: Uuid,
    pub resource_id: String,
    pub payload_size_bytes: u64,
    pub force_outdated: bool,
    pub note: Option<String>,
    pub client: Arc<dyn ExternalToolClient>,
    pub store: SharedSnapshotStore,
    pub polling: PollingConfig,
    pub report_download: bool,
}

impl PipelineRun {
    /// Drive the run to its end, log how it ended and release the lease
    #[instrument(skip_all, fields(resource_id = %self.resource_id, run_id = %self.run_id))]
    pub async fn execute(self, lease: ResourceLease) {
        match self.run().await {
            Ok(()) => {
                info!("✅ PIPELINE: Run completed");
            }
            Err(failure) => self.report_failure(&failure),
        }

        debug!(
            held_since = %lease.acquired_at(),
            "Releasing resource lock"
        );
        lease.release();
    }

    fn report_failure(&self, failure: &StageFailure) {
        match failure {
            StageFailure::Superseded { .. }
            | StageFailure::RetriesExhausted { .. }
            | StageFailure::ToolReportedFailure { .. } => {
                warn!(error = %failure, "⚠️ PIPELINE: Run halted");
            }
            StageFailure::Invalidation(_) | StageFailure::Tool { .. } | StageFailure::Store(_) => {
                error!(error = %failure, "❌ PIPELINE: Run aborted");
            }
        }
    }

    pub async fn run(&self) -> Result<(), StageFailure> {
        if self.force_outdated {
            self.invalidate().await?;
        }

        let snapshot = self.store.load(&self.resource_id).await?;
        let mut stage = PipelineStage::resume_from(snapshot.as_ref());
        let mut generation = snapshot
            .as_ref()
            .filter(|s| !s.status.is_outdated())
            .map(|s| s.generation);

        log_stage_transition(
            &self.resource_id,
            self.run_id,
            stage,
            "resume",
            generation.map(|g| format!("generation {g}")).as_deref(),
        );

        loop {
            let next = match (stage, generation) {
                (PipelineStage::Complete, _) => return Ok(()),
                (PipelineStage::Upload, _) | (_, None) => {
                    let uploaded = self.upload().await?;
                    generation = Some(uploaded.generation);
                    PipelineStage::Unpack
                }
                (PipelineStage::Unpack, Some(expected)) => self.await_unpack(expected).await?,
                (PipelineStage::ScanTrigger, Some(expected)) => {
                    self.advance_until(
                        PipelineStage::ScanTrigger,
                        PollPolicy::for_trigger(&self.polling),
                        expected,
                        scan_triggered,
                        never_blocked,
                    )
                    .await?;
                    PipelineStage::ScanPoll
                }
                (PipelineStage::ScanPoll, Some(expected)) => self.await_scan(expected).await?,
                (PipelineStage::ReportTrigger, Some(expected)) => {
                    if self.report_deferred(expected).await? {
                        info!("Report download disabled, run ends after the scan");
                        PipelineStage::Complete
                    } else {
                        self.advance_until(
                            PipelineStage::ReportTrigger,
                            PollPolicy::for_trigger(&self.polling),
                            expected,
                            report_triggered,
                            scan_failed,
                        )
                        .await?;
                        PipelineStage::ReportPoll
                    }
                }
                (PipelineStage::ReportPoll, Some(expected)) => {
                    self.advance_until(
                        PipelineStage::ReportPoll,
                        PollPolicy::for_report(&self.polling),
                        expected,
                        report_stored,
                        scan_failed,
                    )
                    .await?;
                    PipelineStage::Complete
                }
            };

            log_stage_transition(&self.resource_id, self.run_id, stage, "settled", None);
            stage = next;
        }
    }

    async fn invalidate(&self) -> Result<(), StageFailure> {
        match self.client.invalidate(&self.resource_id).await {
            Ok(RequestStatus::Success) => {
                info!("Previous process invalidated");
                Ok(())
            }
            Ok(RequestStatus::Failure) => Err(StageFailure::Invalidation(
                "tool reported failure".to_string(),
            )),
            Err(e) => Err(StageFailure::Invalidation(e.to_string())),
        }
    }

    fn tool_failure(stage: PipelineStage) -> impl FnOnce(ToolError) -> StageFailure {
        move |source| match superseded_generation(&source) {
            Some(generation) => StageFailure::Superseded {
                expected: generation,
                found: Some(generation),
            },
            None => StageFailure::Tool { stage, source },
        }
    }

    async fn upload(&self) -> Result<ProcessSnapshot, StageFailure> {
        let snapshot = self
            .client
            .start_or_resume(&self.resource_id, self.note.as_deref())
            .await
            .map_err(Self::tool_failure(PipelineStage::Upload))?;

        let uploaded = snapshot
            .step(StepName::Upload)
            .is_some_and(|upload| upload.status == StepState::Done && upload.is_triggered());
        if !uploaded {
            return Err(StageFailure::ToolReportedFailure {
                stage: PipelineStage::Upload,
            });
        }

        debug!(generation = snapshot.generation, "Upload settled");
        Ok(snapshot)
    }

    async fn load_current(&self, expected: u64) -> Result<ProcessSnapshot, StageFailure> {
        match self.store.load(&self.resource_id).await? {
            Some(snapshot) if snapshot.generation == expected && !snapshot.status.is_outdated() => {
                Ok(snapshot)
            }
            other => Err(StageFailure::Superseded {
                expected,
                found: other.map(|s| s.generation),
            }),
        }
    }

    /// Report generation is left to an explicit trigger
    ///
    /// The handler still records the scan outcome before the run ends.
    async fn report_deferred(&self, expected: u64) -> Result<bool, StageFailure> {
        if self.report_download {
            return Ok(false);
        }
        let snapshot = self
            .advance_until(
                PipelineStage::ReportTrigger,
                PollPolicy::for_trigger(&self.polling),
                expected,
                scan_recorded,
                never_blocked,
            )
            .await?;
        if scan_failed(&snapshot) {
            return Err(StageFailure::ToolReportedFailure {
                stage: PipelineStage::ScanPoll,
            });
        }
        Ok(snapshot.step(StepName::Report).is_none())
    }

    fn exhausted<T>(stage: PipelineStage, outcome: PollOutcome<T>) -> StageFailure {
        let (attempts, last_error) = match outcome {
            PollOutcome::Exhausted {
                attempts,
                last_error,
                ..
            } => (attempts, last_error),
            PollOutcome::Settled { attempts, .. } => (attempts, None),
        };
        StageFailure::RetriesExhausted {
            stage,
            attempts,
            last_error,
        }
    }

    async fn await_unpack(&self, expected: u64) -> Result<PipelineStage, StageFailure> {
        let snapshot = self.load_current(expected).await?;
        let upload_id = snapshot
            .step(StepName::Upload)
            .and_then(|upload| upload.correlation_id.clone())
            .ok_or(StageFailure::ToolReportedFailure {
                stage: PipelineStage::Upload,
            })?;

        let policy = PollPolicy::for_payload(self.payload_size_bytes, &self.polling);
        let outcome = poll_with_retry("unpack", &policy, |attempt| {
            let upload_id = upload_id.as_str();
            async move {
                let response = self.client.check_unpack_status(upload_id).await?;
                debug!(attempt, status = %response.status, "Unpack status");
                Ok::<_, ToolError>(if response.status.is_settled() {
                    Attempt::Done(response.status)
                } else {
                    Attempt::pending(response.status)
                })
            }
        })
        .await;

        match outcome {
            PollOutcome::Settled {
                value: JobStatus::Completed,
                ..
            } => Ok(PipelineStage::ScanTrigger),
            PollOutcome::Settled { .. } => Err(StageFailure::ToolReportedFailure {
                stage: PipelineStage::Unpack,
            }),
            exhausted => Err(Self::exhausted(PipelineStage::Unpack, exhausted)),
        }
    }

    async fn await_scan(&self, expected: u64) -> Result<PipelineStage, StageFailure> {
        let snapshot = self.load_current(expected).await?;
        let Some(scan) = snapshot.step(StepName::Scan) else {
            return Ok(PipelineStage::ScanTrigger);
        };
        if scan.is_successful() {
            return Ok(PipelineStage::ReportTrigger);
        }
        if scan.status.is_done() {
            return Err(StageFailure::ToolReportedFailure {
                stage: PipelineStage::ScanPoll,
            });
        }
        let Some(job_id) = scan.correlation_id.clone() else {
            return Ok(PipelineStage::ScanTrigger);
        };

        let policy = PollPolicy::for_payload(self.payload_size_bytes, &self.polling);
        let outcome = poll_with_retry("scan", &policy, |attempt| {
            let job_id = job_id.as_str();
            async move {
                let response = self.client.check_scan_status(job_id).await?;
                debug!(attempt, status = %response.status, eta = ?response.eta, "Scan status");
                Ok::<_, ToolError>(if response.status.is_settled() {
                    Attempt::Done(response.status)
                } else {
                    Attempt::Continue {
                        value: response.status,
                        retry_after: response.eta,
                    }
                })
            }
        })
        .await;

        match outcome {
            PollOutcome::Settled {
                value: JobStatus::Completed,
                ..
            } => Ok(PipelineStage::ReportTrigger),
            PollOutcome::Settled { .. } => Err(StageFailure::ToolReportedFailure {
                stage: PipelineStage::ScanPoll,
            }),
            exhausted => Err(Self::exhausted(PipelineStage::ScanPoll, exhausted)),
        }
    }

    /// Call the trigger entry point until `reached` holds for the snapshot
    async fn advance_until(
        &self,
        stage: PipelineStage,
        policy: PollPolicy,
        expected: u64,
        reached: fn(&ProcessSnapshot) -> bool,
        blocked: fn(&ProcessSnapshot) -> bool,
    ) -> Result<ProcessSnapshot, StageFailure> {
        let operation = stage.to_string();
        let outcome = poll_with_retry(&operation, &policy, |_| async move {
            self.advance_once(expected, reached, blocked).await
        })
        .await;

        match outcome {
            PollOutcome::Settled {
                value: Advance::Reached(snapshot),
                attempts,
            } => {
                debug!(stage = %stage, attempts, "Target step reached");
                Ok(snapshot)
            }
            PollOutcome::Settled {
                value: Advance::Superseded { found },
                ..
            } => Err(StageFailure::Superseded { expected, found }),
            PollOutcome::Settled { .. } => Err(StageFailure::ToolReportedFailure {
                stage: PipelineStage::ScanPoll,
            }),
            exhausted => Err(Self::exhausted(stage, exhausted)),
        }
    }

    async fn advance_once(
        &self,
        expected: u64,
        reached: fn(&ProcessSnapshot) -> bool,
        blocked: fn(&ProcessSnapshot) -> bool,
    ) -> Result<Attempt<Advance>, ToolError> {
        let current = match self.store.load(&self.resource_id).await? {
            Some(s) if s.generation == expected && !s.status.is_outdated() => s,
            other => {
                return Ok(Attempt::Done(Advance::Superseded {
                    found: other.map(|s| s.generation),
                }))
            }
        };
        if reached(&current) {
            return Ok(Attempt::Done(Advance::Reached(current)));
        }
        if blocked(&current) {
            return Ok(Attempt::Done(Advance::Blocked));
        }

        let next = match self.client.start_or_resume(&self.resource_id, None).await {
            Ok(next) => next,
            Err(e) => {
                return match superseded_generation(&e) {
                    Some(generation) => Ok(Attempt::Done(Advance::Superseded {
                        found: Some(generation),
                    })),
                    None => Err(e),
                }
            }
        };
        if next.generation != expected || next.status.is_outdated() {
            return Ok(Attempt::Done(Advance::Superseded {
                found: Some(next.generation),
            }));
        }
        if reached(&next) {
            Ok(Attempt::Done(Advance::Reached(next)))
        } else if blocked(&next) {
            Ok(Attempt::Done(Advance::Blocked))
        } else {
            Ok(Attempt::pending(Advance::Pending))
        }
    }
}

/// Generation whose write was rejected because the process was invalidated
fn superseded_generation(error: &ToolError) -> Option<u64> {
    match error {
        ToolError::Store(StoreError::Superseded { generation, .. }) => Some(*generation),
        _ => None,
    }
}

fn scan_triggered(snapshot: &ProcessSnapshot) -> bool {
    snapshot
        .step(StepName::Scan)
        .is_some_and(|scan| scan.is_triggered())
}

fn scan_recorded(snapshot: &ProcessSnapshot) -> bool {
    snapshot
        .step(StepName::Scan)
        .is_some_and(|scan| scan.status.is_done())
}

fn report_triggered(snapshot: &ProcessSnapshot) -> bool {
    snapshot
        .step(StepName::Report)
        .is_some_and(|report| report.is_triggered())
}

fn report_stored(snapshot: &ProcessSnapshot) -> bool {
    snapshot
        .step(StepName::Report)
        .is_some_and(|report| report.is_successful())
}

fn scan_failed(snapshot: &ProcessSnapshot) -> bool {
    snapshot
        .step(StepName::Scan)
        .is_some_and(|scan| scan.status.is_done() && !scan.is_successful())
}

fn never_blocked(_: &ProcessSnapshot) -> bool {
    false
}
