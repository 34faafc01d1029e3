//! Core data types for the episodic knowledge graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Normalized entity name, the unique key for entity nodes.
///
/// Construction trims the input and collapses internal whitespace runs so
/// that "Ada  Lovelace" and "Ada Lovelace " resolve to the same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityName(String);

impl EntityName {
    /// Create a normalized entity name
    pub fn new(name: impl AsRef<str>) -> Self {
        let normalized = name
            .as_ref()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        Self(normalized)
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when normalization left nothing behind
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for EntityName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Open entity-type vocabulary (e.g. "Person", "Concept").
///
/// Deliberately not a closed enum: the upstream system can configure
/// additional types at runtime, so call sites carry a tagged string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityType(String);

impl EntityType {
    /// Default type assigned when the extractor returns a blank label
    pub const DEFAULT: &'static str = "Concept";

    /// Create an entity type, falling back to [`EntityType::DEFAULT`] for
    /// blank input
    pub fn new(label: impl AsRef<str>) -> Self {
        let trimmed = label.as_ref().trim();
        if trimmed.is_empty() {
            Self(Self::DEFAULT.to_string())
        } else {
            Self(trimmed.to_string())
        }
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalized relationship type for temporal facts.
///
/// Stored uppercased with spaces replaced by underscores, so the extractor
/// output "works for" becomes "WORKS_FOR".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipType(String);

impl RelationshipType {
    /// Create a normalized relationship type
    pub fn new(kind: impl AsRef<str>) -> Self {
        let normalized = kind
            .as_ref()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .to_uppercase();
        Self(normalized)
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when normalization left nothing behind
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A deduplicated named concept in the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Unique normalized name
    pub name: EntityName,
    /// Open-vocabulary type label
    pub entity_type: EntityType,
    /// Highest confidence seen across all mentions (0.0 to 1.0)
    pub confidence: f32,
    /// Number of episodes that created or reinforced this entity
    pub mention_count: u64,
    /// When the entity was first created
    pub created_at: DateTime<Utc>,
    /// When the entity was last reinforced by an episode
    pub last_mentioned: DateTime<Utc>,
}

/// An immutable snapshot of ingested text plus its provenance metadata.
///
/// Episodes are created once, when dequeued by the extraction worker, and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// System-generated identifier
    pub id: Uuid,
    /// Ingested text, capped at the configured maximum length
    pub content: String,
    /// Kind of upstream record that produced this text
    pub source_type: String,
    /// Identifier of the upstream record
    pub source_id: String,
    /// Caller-supplied timestamp used for temporal ordering
    pub reference_time: DateTime<Utc>,
    /// When the episode record was created
    pub created_at: DateTime<Utc>,
    /// Free-form provenance metadata from the producer
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A directed, typed, time-bounded fact between two entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalFact {
    /// System-generated identifier
    pub id: Uuid,
    /// Source entity name
    pub source: EntityName,
    /// Target entity name
    pub target: EntityName,
    /// Normalized relationship type (e.g. "WORKS_FOR")
    pub relationship_type: RelationshipType,
    /// Human-readable statement of the fact
    pub fact: String,
    /// Extraction confidence (0.0 to 1.0)
    pub confidence: f32,
    /// Episode whose text this fact was extracted from
    pub source_episode_id: Uuid,
    /// When this fact was recorded
    pub created_at: DateTime<Utc>,
    /// When the fact became true in the modeled world
    pub valid_from: DateTime<Utc>,
    /// When the fact ceased to be true (None = currently valid)
    pub valid_to: Option<DateTime<Utc>>,
    /// Text of the fact that superseded this one, if any
    pub invalidated_by: Option<String>,
    /// Set when a contradiction was left for manual review
    pub flagged_for_review: bool,
}

impl TemporalFact {
    /// Check if this fact is currently valid (no end of validity recorded)
    pub fn is_currently_valid(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Check if this fact was valid at a specific point in time
    pub fn was_valid_at(&self, timestamp: DateTime<Utc>) -> bool {
        self.valid_from <= timestamp && self.valid_to.map_or(true, |end| timestamp < end)
    }

    /// True if both endpoints and the relationship type match
    pub fn same_triple(&self, source: &EntityName, target: &EntityName, kind: &RelationshipType) -> bool {
        self.source == *source && self.target == *target && self.relationship_type == *kind
    }
}

/// How the store resolves a new fact contradicting a currently-valid one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionStrategy {
    /// Close the old fact's validity and record what superseded it (default)
    InvalidateOld,
    /// Keep both valid but mark the pair for manual review
    FlagForReview,
    /// Insert alongside the old fact without touching its validity
    KeepBoth,
}

impl Default for ContradictionStrategy {
    fn default() -> Self {
        ContradictionStrategy::InvalidateOld
    }
}

impl std::fmt::Display for ContradictionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContradictionStrategy::InvalidateOld => write!(f, "invalidate_old"),
            ContradictionStrategy::FlagForReview => write!(f, "flag_for_review"),
            ContradictionStrategy::KeepBoth => write!(f, "keep_both"),
        }
    }
}

impl std::str::FromStr for ContradictionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "invalidate_old" => Ok(ContradictionStrategy::InvalidateOld),
            "flag_for_review" => Ok(ContradictionStrategy::FlagForReview),
            "keep_both" => Ok(ContradictionStrategy::KeepBoth),
            _ => Err(format!("Unknown contradiction strategy: {}", s)),
        }
    }
}

/// Outcome of a `create_fact` call, so callers can observe contradictions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactOutcome {
    /// No currently-valid fact existed for the triple; plain insert
    Created { fact_id: Uuid },
    /// A currently-valid fact with identical text already existed; no write
    Restated { existing_id: Uuid },
    /// Contradiction resolved by invalidating the old fact
    Superseded { fact_id: Uuid, invalidated_id: Uuid },
    /// Contradiction left for review; both facts remain valid
    FlaggedForReview { fact_id: Uuid, conflicting_id: Uuid },
    /// Contradiction ignored per `keep_both`; both facts remain valid
    KeptBoth { fact_id: Uuid, conflicting_id: Uuid },
}

impl FactOutcome {
    /// True when a contradiction was detected, whatever the resolution
    pub fn is_contradiction(&self) -> bool {
        matches!(
            self,
            FactOutcome::Superseded { .. }
                | FactOutcome::FlaggedForReview { .. }
                | FactOutcome::KeptBoth { .. }
        )
    }
}

/// An entry in an entity's provenance trail: the episode that mentioned it
/// and the upstream record the episode came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    /// Episode that created or reinforced the entity
    pub episode_id: Uuid,
    /// Kind of upstream record behind the episode
    pub source_type: String,
    /// Identifier of the upstream record
    pub source_id: String,
    /// Temporal ordering key (caller-supplied at ingestion)
    pub reference_time: DateTime<Utc>,
}
