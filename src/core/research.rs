//! Research run state machine.
//!
//! A research run is one execution of the deep-research workflow for a
//! case. Status transitions are guarded: terminal states (`COMPLETED`,
//! `FAILED`, `CANCELLED`) admit no further transitions, and entering a
//! terminal state stamps `completed_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Execution status of a research run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResearchStatus {
    /// Created, not yet started.
    Pending,
    /// Workflow in flight.
    Running,
    /// Paused at an inter-activity checkpoint.
    Paused,
    /// Finished successfully. Terminal.
    Completed,
    /// Failed unrecoverably. Terminal.
    Failed,
    /// Cancelled by signal. Terminal.
    Cancelled,
}

impl ResearchStatus {
    /// Whether this status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for ResearchStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(crate::Error::validation(format!(
                "unknown research status: {other}"
            ))),
        }
    }
}

/// Workflow phase of a research run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResearchPhase {
    /// Run record persisted, workflow spinning up.
    Initializing,
    /// Ensuring evidence is indexed.
    Indexing,
    /// Discovery + planning searches.
    Searching,
    /// Parallel evidence analysis.
    Analyzing,
    /// Correlation and hypothesis generation.
    HypothesisGeneration,
    /// Synthesis and dossier rendering.
    DossierGeneration,
    /// Done.
    Completed,
}

impl ResearchPhase {
    /// Maps a phase to its baseline progress percentage.
    ///
    /// Live workflow heartbeats may refine this; terminal statuses pin
    /// progress regardless of phase.
    #[must_use]
    pub const fn progress_pct(self) -> f64 {
        match self {
            Self::Initializing => 5.0,
            Self::Indexing => 15.0,
            Self::Searching => 35.0,
            Self::Analyzing => 60.0,
            Self::HypothesisGeneration => 80.0,
            Self::DossierGeneration => 95.0,
            Self::Completed => 100.0,
        }
    }

    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Indexing => "INDEXING",
            Self::Searching => "SEARCHING",
            Self::Analyzing => "ANALYZING",
            Self::HypothesisGeneration => "HYPOTHESIS_GENERATION",
            Self::DossierGeneration => "DOSSIER_GENERATION",
            Self::Completed => "COMPLETED",
        }
    }
}

impl std::str::FromStr for ResearchPhase {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIALIZING" => Ok(Self::Initializing),
            "INDEXING" => Ok(Self::Indexing),
            "SEARCHING" => Ok(Self::Searching),
            "ANALYZING" => Ok(Self::Analyzing),
            "HYPOTHESIS_GENERATION" => Ok(Self::HypothesisGeneration),
            "DOSSIER_GENERATION" => Ok(Self::DossierGeneration),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(crate::Error::validation(format!(
                "unknown research phase: {other}"
            ))),
        }
    }
}

/// One execution of the deep-research workflow for a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchRun {
    /// Run identifier (also the error correlation id).
    pub id: Uuid,
    /// Case under research.
    pub case_id: Uuid,
    /// Research question, when given.
    pub query: Option<String>,
    /// Defense theory to investigate, when given.
    pub defense_theory: Option<String>,
    /// Execution status.
    pub status: ResearchStatus,
    /// Current workflow phase.
    pub phase: ResearchPhase,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// Completion timestamp; set exactly when the run turns terminal.
    pub completed_at: Option<DateTime<Utc>>,
    /// Durable workflow identifier.
    pub workflow_id: Option<String>,
    /// Errors accumulated across activities.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Heartbeat and bookkeeping metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ResearchRun {
    /// Creates a new pending run.
    #[must_use]
    pub fn new(case_id: Uuid, query: Option<String>, defense_theory: Option<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            case_id,
            query,
            defense_theory,
            status: ResearchStatus::Pending,
            phase: ResearchPhase::Initializing,
            started_at: Utc::now(),
            completed_at: None,
            workflow_id: Some(format!("research-{id}")),
            errors: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Moves the run to a new phase.
    ///
    /// # Errors
    ///
    /// Returns an invalid-transition error when the run is terminal.
    pub fn advance_phase(&mut self, phase: ResearchPhase) -> crate::Result<()> {
        self.guard_not_terminal("advance phase")?;
        self.phase = phase;
        self.status = ResearchStatus::Running;
        Ok(())
    }

    /// Marks the run completed.
    ///
    /// # Errors
    ///
    /// Returns an invalid-transition error when the run is terminal.
    pub fn complete(&mut self) -> crate::Result<()> {
        self.guard_not_terminal("complete")?;
        self.status = ResearchStatus::Completed;
        self.phase = ResearchPhase::Completed;
        self.completed_at = Some(Self::clamped_now(self.started_at));
        Ok(())
    }

    /// Marks the run failed, recording the error.
    ///
    /// # Errors
    ///
    /// Returns an invalid-transition error when the run is terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> crate::Result<()> {
        self.guard_not_terminal("fail")?;
        self.status = ResearchStatus::Failed;
        self.errors.push(error.into());
        self.completed_at = Some(Self::clamped_now(self.started_at));
        Ok(())
    }

    /// Marks the run cancelled, preserving the phase at the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an invalid-transition error when the run is terminal.
    pub fn cancel(&mut self) -> crate::Result<()> {
        self.guard_not_terminal("cancel")?;
        self.status = ResearchStatus::Cancelled;
        self.completed_at = Some(Self::clamped_now(self.started_at));
        Ok(())
    }

    /// Pauses the run at a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an invalid-transition error when the run is terminal.
    pub fn pause(&mut self) -> crate::Result<()> {
        self.guard_not_terminal("pause")?;
        self.status = ResearchStatus::Paused;
        Ok(())
    }

    /// Resumes a paused run into its prior phase.
    ///
    /// # Errors
    ///
    /// Returns an invalid-transition error unless the run is paused.
    pub fn resume(&mut self) -> crate::Result<()> {
        if self.status != ResearchStatus::Paused {
            return Err(crate::Error::Workflow(
                crate::error::WorkflowError::InvalidTransition {
                    run_id: self.id.to_string(),
                    reason: format!("cannot resume from {}", self.status.as_str()),
                },
            ));
        }
        self.status = ResearchStatus::Running;
        Ok(())
    }

    fn guard_not_terminal(&self, action: &str) -> crate::Result<()> {
        if self.status.is_terminal() {
            return Err(crate::Error::Workflow(
                crate::error::WorkflowError::InvalidTransition {
                    run_id: self.id.to_string(),
                    reason: format!("cannot {action}: run is {}", self.status.as_str()),
                },
            ));
        }
        Ok(())
    }

    // completed_at must never precede started_at, even with clock skew.
    fn clamped_now(started_at: DateTime<Utc>) -> DateTime<Utc> {
        Utc::now().max(started_at)
    }
}
