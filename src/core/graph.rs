//! Case-scoped knowledge graph nodes and relationships.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entity kind of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// A natural person.
    Person,
    /// A company, firm, or agency.
    Organization,
    /// A piece of documentary evidence.
    Document,
    /// A dated occurrence.
    Event,
    /// A physical or named location.
    Location,
}

impl NodeType {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Document => "document",
            Self::Event => "event",
            Self::Location => "location",
        }
    }
}

impl std::str::FromStr for NodeType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "person" => Ok(Self::Person),
            "organization" => Ok(Self::Organization),
            "document" => Ok(Self::Document),
            "event" => Ok(Self::Event),
            "location" => Ok(Self::Location),
            other => Err(crate::Error::validation(format!("unknown node type: {other}"))),
        }
    }
}

/// Relationship kind between two graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    /// Entity appears in a document/finding.
    MentionedIn,
    /// Person/org took part in an event.
    ParticipatedIn,
    /// Two claims conflict.
    Contradicts,
    /// Temporal ordering between events.
    Precedes,
    /// Co-occurrence without a more specific kind.
    RelatedTo,
}

impl RelationshipType {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MentionedIn => "mentioned_in",
            Self::ParticipatedIn => "participated_in",
            Self::Contradicts => "contradicts",
            Self::Precedes => "precedes",
            Self::RelatedTo => "related_to",
        }
    }
}

impl std::str::FromStr for RelationshipType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mentioned_in" => Ok(Self::MentionedIn),
            "participated_in" => Ok(Self::ParticipatedIn),
            "contradicts" => Ok(Self::Contradicts),
            "precedes" => Ok(Self::Precedes),
            "related_to" => Ok(Self::RelatedTo),
            other => Err(crate::Error::validation(format!(
                "unknown relationship type: {other}"
            ))),
        }
    }
}

/// A node in the case knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Node identifier.
    pub id: Uuid,
    /// Owning case.
    pub case_id: Uuid,
    /// Entity kind.
    pub node_type: NodeType,
    /// Display label (canonicalized during dedup).
    pub label: String,
    /// Extensible properties.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl GraphNode {
    /// Creates a node.
    #[must_use]
    pub fn new(case_id: Uuid, node_type: NodeType, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            case_id,
            node_type,
            label: label.into(),
            properties: serde_json::Map::new(),
        }
    }
}

/// A directed edge in the case knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRelationship {
    /// Relationship identifier.
    pub id: Uuid,
    /// Source node.
    pub source_id: Uuid,
    /// Target node.
    pub target_id: Uuid,
    /// Relationship kind.
    pub rel_type: RelationshipType,
    /// Extensible properties.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl GraphRelationship {
    /// Creates a relationship.
    #[must_use]
    pub fn new(source_id: Uuid, target_id: Uuid, rel_type: RelationshipType) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            target_id,
            rel_type,
            properties: serde_json::Map::new(),
        }
    }
}
