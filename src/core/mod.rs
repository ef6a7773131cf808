//! Core domain types for the evidence research platform.
//!
//! Ownership is top-down: a [`Case`] owns [`Evidence`], evidence owns
//! [`Chunk`]s, and research artifacts ([`Finding`], [`TimelineEvent`],
//! [`Dossier`], graph nodes) hang off a [`ResearchRun`]. Cross-references
//! between aggregates use identifiers, never in-memory cycles.

mod case;
mod chunk;
mod dossier;
mod evidence;
mod finding;
mod graph;
mod research;
mod timeline;

pub use case::{Case, CaseStatus};
pub use chunk::{Chunk, ChunkType, EmbeddingBatch, VectorSpace, chunk_id};
pub use dossier::{Dossier, DossierSection};
pub use evidence::{Evidence, EvidenceKind, EvidenceStatus, TranscriptSegment};
pub use finding::{Citation, Confidence, Finding, FindingType, Relevance};
pub use graph::{GraphNode, GraphRelationship, NodeType, RelationshipType};
pub use research::{ResearchPhase, ResearchRun, ResearchStatus};
pub use timeline::{TimelineEvent, sort_chronologically};
