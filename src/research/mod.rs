//! Deep-research orchestration.
//!
//! A research run walks a durably checkpointed phase sequence over the
//! case's evidence: discovery, planning, a parallel analysis fan-out
//! per evidence modality, cross-evidence correlation, and synthesis
//! into a dossier. The [`ResearchWorkflow`] driver survives process
//! restarts through its journal and accepts `cancel`/`pause`/`resume`
//! signals at inter-activity checkpoints.

pub mod activities;
pub mod correlate;
mod workflow;

pub use activities::{
    Activities, AnalysisOutput, AnalysisPlan, DiscoveryResult, EvidenceRef, ReportOutput,
    SynthesisOutput,
};
pub use correlate::{
    CONTRADICTION_SIMILARITY_THRESHOLD, Contradiction, CorrelationResult, Severity, correlate,
};
pub use workflow::{DriveOutcome, ResearchWorkflow, Signal};
