//! Durable research workflow driver.
//!
//! The driver executes the phase sequence
//! `INITIALIZING → INDEXING → SEARCHING → ANALYZING (fan-out) →
//! HYPOTHESIS_GENERATION → DOSSIER_GENERATION → COMPLETED`
//! on top of an event-sourced journal: every successful activity's
//! payload is recorded under `(run_id, activity)`, and a re-driven run
//! replays recorded payloads instead of re-executing. That gives
//! restart-safety, pause/resume, and at-least-once execution of
//! idempotent activities with one mechanism.
//!
//! Signals (`cancel`, `pause`, `resume`) are drained at inter-activity
//! checkpoints. Activities retry with capped, exponentially backed-off
//! attempts; the jitter is a deterministic hash of
//! `(run id, activity, attempt)` so replays stay reproducible.

use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PlatformConfig;
use crate::core::{EvidenceKind, ResearchPhase, ResearchRun, ResearchStatus};
use crate::error::WorkflowError;
use crate::research::activities::{Activities, AnalysisOutput};
use crate::{Error, Result};

/// Backoff ceiling between activity attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// External control signals, applied at checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Terminate the run at the next checkpoint.
    Cancel,
    /// Hold the run at the next checkpoint.
    Pause,
    /// Release a paused run.
    Resume,
}

impl Signal {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
            Self::Pause => "pause",
            Self::Resume => "resume",
        }
    }
}

impl std::str::FromStr for Signal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cancel" => Ok(Self::Cancel),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            other => Err(Error::validation(format!("unknown signal: {other}"))),
        }
    }
}

/// How one `drive` invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// The run reached `COMPLETED`.
    Completed,
    /// A pause signal held the run at a checkpoint; re-drive after a
    /// resume signal.
    Paused,
    /// A cancel signal terminated the run.
    Cancelled,
    /// An activity exhausted its retries or hit a non-retryable error.
    Failed,
}

/// The deep-research workflow.
pub struct ResearchWorkflow {
    activities: Activities,
    config: PlatformConfig,
}

impl ResearchWorkflow {
    /// Creates the workflow over its activity implementations.
    #[must_use]
    pub const fn new(activities: Activities, config: PlatformConfig) -> Self {
        Self { activities, config }
    }

    /// Starts a new research run for a case.
    ///
    /// Returns the persisted run; its `workflow_id` identifies the
    /// durable execution.
    ///
    /// # Errors
    ///
    /// Returns a not-found error when the case does not exist.
    pub fn start(
        &self,
        case_id: Uuid,
        query: Option<String>,
        defense_theory: Option<String>,
    ) -> Result<ResearchRun> {
        if self.activities.records().get_case(case_id)?.is_none() {
            return Err(Error::not_found("case", case_id));
        }
        let run = ResearchRun::new(case_id, query, defense_theory);
        self.activities.records().save_run(&run)?;
        info!(run_id = %run.id, workflow_id = ?run.workflow_id, "research run started");
        Ok(run)
    }

    /// Delivers a signal to a run. Takes effect at the run's next
    /// checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::SignalRejected`] for terminal runs.
    pub fn signal(&self, run_id: Uuid, signal: Signal) -> Result<()> {
        let run = self.load(run_id)?;
        if run.status.is_terminal() {
            return Err(Error::Workflow(WorkflowError::SignalRejected {
                signal: signal.as_str(),
                run_id: run_id.to_string(),
                status: run.status.as_str().to_string(),
            }));
        }
        self.activities.records().signal_push(run_id, signal.as_str())?;
        debug!(run_id = %run_id, signal = signal.as_str(), "signal enqueued");
        Ok(())
    }

    /// Whether the workflow's backing store is reachable and
    /// initialized.
    #[must_use]
    pub fn health_check(&self) -> bool {
        self.activities
            .records()
            .is_initialized()
            .unwrap_or(false)
    }

    /// Drives a run forward until it completes, pauses, cancels, or
    /// fails. Safe to call repeatedly: completed activities replay
    /// from the journal.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure faults (store
    /// unreachable); activity failures transition the run to `FAILED`
    /// and return [`DriveOutcome::Failed`].
    #[allow(clippy::too_many_lines)]
    pub async fn drive(&self, run_id: Uuid) -> Result<DriveOutcome> {
        let mut run = self.load(run_id)?;
        if let Some(outcome) = terminal_outcome(run.status) {
            return Ok(outcome);
        }

        macro_rules! checkpoint {
            () => {
                if let Some(outcome) = self.checkpoint(&mut run)? {
                    return Ok(outcome);
                }
            };
        }

        macro_rules! step {
            ($expr:expr) => {
                match $expr {
                    Ok(value) => value,
                    Err(e) => return self.fail_run(&mut run, &e),
                }
            };
        }

        // INITIALIZING
        checkpoint!();
        step!(self.enter_phase(&mut run, ResearchPhase::Initializing, "initializing run"));
        let snap = run.clone();
        step!(
            self.run_activity(&snap, "initialize_research_run", || {
                let activities = &self.activities;
                let run = snap.clone();
                async move { activities.initialize_research_run(&run) }
            })
            .await
        );

        // INDEXING: ensure indexes + discovery
        checkpoint!();
        step!(self.enter_phase(&mut run, ResearchPhase::Indexing, "discovering evidence"));
        let snap = run.clone();
        let discovery = step!(
            self.run_activity(&snap, "run_discovery_phase", || {
                let activities = &self.activities;
                let run = snap.clone();
                async move { activities.run_discovery_phase(&run).await }
            })
            .await
        );

        // SEARCHING: planning
        checkpoint!();
        step!(self.enter_phase(&mut run, ResearchPhase::Searching, "planning analysis"));
        let snap = run.clone();
        let plan = step!(
            self.run_activity(&snap, "run_planning_phase", || {
                let activities = &self.activities;
                let run = snap.clone();
                let discovery = discovery.clone();
                async move { activities.run_planning_phase(&run, &discovery).await }
            })
            .await
        );

        // ANALYZING: parallel fan-out with a strict join barrier.
        checkpoint!();
        step!(self.enter_phase(&mut run, ResearchPhase::Analyzing, "analyzing evidence"));
        let snap = run.clone();
        let analysis_activity = |name: &'static str, kind: EvidenceKind| {
            let snap = &snap;
            let plan = &plan;
            async move {
                self.run_activity(snap, name, || {
                    let activities = &self.activities;
                    let run = snap.clone();
                    let plan = plan.clone();
                    async move { activities.run_analysis(&run, kind, &plan).await }
                })
                .await
            }
        };
        let (documents, transcripts, communications) = tokio::join!(
            analysis_activity("run_document_analysis", EvidenceKind::Document),
            analysis_activity("run_transcript_analysis", EvidenceKind::Transcript),
            analysis_activity("run_communication_analysis", EvidenceKind::Communication),
        );

        let mut analysis_errors = Vec::new();
        let mut outputs: Vec<AnalysisOutput> = Vec::new();
        for (name, result) in [
            ("run_document_analysis", documents),
            ("run_transcript_analysis", transcripts),
            ("run_communication_analysis", communications),
        ] {
            match result {
                Ok(output) => outputs.push(output),
                Err(e) => analysis_errors.push(format!("{name}: {e}")),
            }
        }
        if !analysis_errors.is_empty() {
            let aggregated = analysis_errors.join("; ");
            warn!(run_id = %run.id, errors = %aggregated, "analysis fan-out failed");
            let run_id = run.id.to_string();
            return self.fail_run(&mut run, &Error::Workflow(
                WorkflowError::RetriesExhausted {
                    activity: "analysis_fan_out",
                    attempts: self.config.max_attempts,
                    run_id,
                    reason: aggregated,
                },
            ));
        }

        // Persist findings from the (journaled) outputs; keyed inserts
        // keep re-driven runs from duplicating.
        let mut citations_count = 0usize;
        for output in &outputs {
            citations_count += output
                .findings
                .iter()
                .map(|f| f.citations.len())
                .sum::<usize>();
            step!(self.activities.records().add_findings(&output.findings));
        }
        run.metadata.insert(
            "citations_count".to_string(),
            serde_json::Value::from(citations_count),
        );
        step!(self.activities.records().save_run(&run));

        // HYPOTHESIS_GENERATION: correlation
        checkpoint!();
        step!(self.enter_phase(
            &mut run,
            ResearchPhase::HypothesisGeneration,
            "correlating findings"
        ));
        let snap = run.clone();
        let correlation = step!(
            self.run_activity(&snap, "run_correlation_phase", || {
                let activities = &self.activities;
                let run = snap.clone();
                async move { activities.run_correlation_phase(&run) }
            })
            .await
        );
        step!(self.activities.records().save_graph(
            run.case_id,
            &correlation.graph_nodes,
            &correlation.graph_relationships
        ));
        step!(
            self.activities
                .records()
                .save_timeline(run.case_id, &correlation.timeline)
        );
        run.metadata.insert(
            "contradictions_count".to_string(),
            serde_json::Value::from(correlation.contradictions.len()),
        );
        run.metadata.insert(
            "key_patterns".to_string(),
            serde_json::Value::from(correlation.key_patterns.clone()),
        );
        step!(self.activities.records().save_run(&run));

        // DOSSIER_GENERATION: synthesis + report files
        checkpoint!();
        step!(self.enter_phase(
            &mut run,
            ResearchPhase::DossierGeneration,
            "synthesizing dossier"
        ));
        let snap = run.clone();
        let synthesis = step!(
            self.run_activity(&snap, "run_synthesis_phase", || {
                let activities = &self.activities;
                let run = snap.clone();
                let correlation = correlation.clone();
                async move { activities.run_synthesis_phase(&run, &correlation).await }
            })
            .await
        );
        let snap = run.clone();
        let report = step!(
            self.run_activity(&snap, "generate_report_files", || {
                let activities = &self.activities;
                let run = snap.clone();
                let synthesis = synthesis.clone();
                async move { activities.generate_report_files(&run, &synthesis) }
            })
            .await
        );
        run.metadata.insert(
            "dossier_files".to_string(),
            serde_json::Value::from(report.file_paths),
        );

        // COMPLETED
        checkpoint!();
        step!(run.complete());
        run.metadata.insert(
            "progress_pct".to_string(),
            serde_json::Value::from(ResearchPhase::Completed.progress_pct()),
        );
        step!(self.activities.records().save_run(&run));
        info!(run_id = %run.id, "research run completed");
        Ok(DriveOutcome::Completed)
    }

    fn load(&self, run_id: Uuid) -> Result<ResearchRun> {
        self.activities
            .records()
            .get_run(run_id)?
            .ok_or_else(|| Error::not_found("research run", run_id))
    }

    /// Drains pending signals and applies them. Returns an outcome
    /// when the run leaves the driving state.
    fn checkpoint(&self, run: &mut ResearchRun) -> Result<Option<DriveOutcome>> {
        let signals = self.activities.records().signals_take(run.id)?;
        let mut pending_pause = false;
        let mut saw_resume = false;

        for raw in signals {
            match raw.parse::<Signal>() {
                Ok(Signal::Cancel) => {
                    run.cancel()?;
                    self.activities.records().save_run(run)?;
                    info!(run_id = %run.id, phase = run.phase.as_str(), "run cancelled");
                    return Ok(Some(DriveOutcome::Cancelled));
                }
                Ok(Signal::Pause) => {
                    pending_pause = true;
                    saw_resume = false;
                }
                Ok(Signal::Resume) => {
                    saw_resume = true;
                    pending_pause = false;
                }
                Err(e) => warn!(run_id = %run.id, error = %e, "ignoring malformed signal"),
            }
        }

        if run.status == ResearchStatus::Paused {
            if saw_resume {
                run.resume()?;
                self.activities.records().save_run(run)?;
                info!(run_id = %run.id, "run resumed");
            } else {
                return Ok(Some(DriveOutcome::Paused));
            }
        }

        if pending_pause {
            run.pause()?;
            self.activities.records().save_run(run)?;
            info!(run_id = %run.id, phase = run.phase.as_str(), "run paused");
            return Ok(Some(DriveOutcome::Paused));
        }

        Ok(None)
    }

    /// Advances the run's phase monotonically (replayed runs never
    /// regress) and records a heartbeat.
    fn enter_phase(
        &self,
        run: &mut ResearchRun,
        phase: ResearchPhase,
        message: &str,
    ) -> Result<()> {
        let target = run.phase.max(phase);
        run.advance_phase(target)?;
        run.metadata.insert(
            "progress_pct".to_string(),
            serde_json::Value::from(target.progress_pct()),
        );
        run.metadata
            .insert("message".to_string(), serde_json::Value::from(message));
        self.activities.records().save_run(run)?;
        debug!(run_id = %run.id, phase = target.as_str(), "entered phase");
        Ok(())
    }

    /// Executes one activity with journal replay, timeout, and
    /// jittered exponential backoff.
    async fn run_activity<T, F, Fut>(
        &self,
        run: &ResearchRun,
        name: &'static str,
        make: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(payload) = self.activities.records().journal_get(run.id, name)? {
            debug!(run_id = %run.id, activity = name, "replaying activity from journal");
            return serde_json::from_str(&payload).map_err(|e| {
                Error::Workflow(WorkflowError::Journal {
                    run_id: run.id.to_string(),
                    reason: format!("corrupt payload for {name}: {e}"),
                })
            });
        }

        let mut attempt: u32 = 0;
        let mut last_error = String::new();
        loop {
            attempt += 1;
            match tokio::time::timeout(self.config.activity_timeout, make()).await {
                Ok(Ok(value)) => {
                    let payload = serde_json::to_string(&value)?;
                    self.activities.records().journal_put(run.id, name, &payload)?;
                    debug!(run_id = %run.id, activity = name, attempt, "activity recorded");
                    return Ok(value);
                }
                Ok(Err(e)) if !is_retryable(&e) => {
                    warn!(run_id = %run.id, activity = name, error = %e, "non-retryable failure");
                    return Err(e);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = Error::Workflow(WorkflowError::ActivityTimeout {
                        activity: name,
                        run_id: run.id.to_string(),
                    })
                    .to_string();
                }
            }

            if attempt >= self.config.max_attempts {
                return Err(Error::Workflow(WorkflowError::RetriesExhausted {
                    activity: name,
                    attempts: attempt,
                    run_id: run.id.to_string(),
                    reason: last_error,
                }));
            }

            let backoff = jittered_backoff(self.config.initial_backoff, attempt, run.id, name);
            warn!(
                run_id = %run.id,
                activity = name,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %last_error,
                "activity failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    /// Transitions the run to `FAILED`, recording the error.
    fn fail_run(&self, run: &mut ResearchRun, error: &Error) -> Result<DriveOutcome> {
        run.fail(error.to_string())?;
        self.activities.records().save_run(run)?;
        warn!(run_id = %run.id, error = %error, "run failed");
        Ok(DriveOutcome::Failed)
    }
}

impl std::fmt::Debug for ResearchWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchWorkflow").finish_non_exhaustive()
    }
}

const fn terminal_outcome(status: ResearchStatus) -> Option<DriveOutcome> {
    match status {
        ResearchStatus::Completed => Some(DriveOutcome::Completed),
        ResearchStatus::Failed => Some(DriveOutcome::Failed),
        ResearchStatus::Cancelled => Some(DriveOutcome::Cancelled),
        _ => None,
    }
}

/// Only infrastructure-ish failures retry; caller mistakes do not.
fn is_retryable(error: &Error) -> bool {
    !matches!(
        error.kind(),
        crate::error::ErrorKind::Validation
            | crate::error::ErrorKind::NotFound
            | crate::error::ErrorKind::Config
    )
}

/// Deterministic jittered exponential backoff: `initial * 2^(n-1)`
/// plus a hash-derived jitter of up to half the base, capped.
fn jittered_backoff(initial: Duration, attempt: u32, run_id: Uuid, activity: &str) -> Duration {
    let base = initial.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    run_id.hash(&mut hasher);
    activity.hash(&mut hasher);
    attempt.hash(&mut hasher);
    let half = (base.as_millis() as u64 / 2).max(1);
    let jitter = Duration::from_millis(hasher.finish() % half);
    (base + jitter).min(MAX_BACKOFF)
}
