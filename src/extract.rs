//! Entity and relationship extraction through the enrichment channel

use crate::channel::{ChannelManager, GenerationRequest};
use crate::config::CoreConfig;
use crate::decode;
use crate::types::{EntityName, EntityType, RelationshipType};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Entity types always offered to the model, before any configured extras
pub const BASE_ENTITY_TYPES: &[&str] = &[
    "Person",
    "Organization",
    "Location",
    "Event",
    "Concept",
    "Object",
    "Activity",
];

/// Episode text is truncated to this many characters before prompting
const MAX_PROMPT_TEXT_CHARS: usize = 4000;

/// Routing names used against the channel manager
const ENTITY_COMPONENT: &str = "extractor";
const RELATION_COMPONENT: &str = "relationship-extractor";

/// A confidence-filtered entity candidate
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCandidate {
    pub name: EntityName,
    pub entity_type: EntityType,
    pub confidence: f32,
}

/// A confidence-filtered relationship candidate between two extracted
/// entities
#[derive(Debug, Clone, PartialEq)]
pub struct RelationCandidate {
    pub source: EntityName,
    pub target: EntityName,
    pub relationship_type: RelationshipType,
    pub fact: String,
    pub confidence: f32,
}

/// Wire format of one entity in the model's response
#[derive(Debug, Deserialize)]
struct RawEntity {
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

/// Wire format of one relationship in the model's response
#[derive(Debug, Deserialize)]
struct RawRelation {
    source: String,
    target: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    fact: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

// A response that omits confidence is taken at face value, not discarded.
fn default_confidence() -> f32 {
    0.5
}

/// Turns free text into entity and relationship candidates.
///
/// Every prompt goes through the channel manager's enrichment channel, so
/// extraction competes fairly with other callers for the shared generation
/// budget. Channel failures and malformed output both degrade to empty
/// results; extraction never raises past this type.
pub struct KnowledgeExtractor {
    channels: Arc<ChannelManager>,
    min_confidence: f32,
    entity_types: Vec<String>,
}

impl KnowledgeExtractor {
    /// Create an extractor using the given channels and config
    pub fn new(channels: Arc<ChannelManager>, config: &CoreConfig) -> Self {
        let mut entity_types: Vec<String> =
            BASE_ENTITY_TYPES.iter().map(|s| s.to_string()).collect();
        for custom in &config.custom_entity_types {
            if !entity_types.iter().any(|t| t.eq_ignore_ascii_case(custom)) {
                entity_types.push(custom.clone());
            }
        }
        Self {
            channels,
            min_confidence: config.min_confidence,
            entity_types,
        }
    }

    /// Extract entity candidates from text. Returns an empty list on any
    /// channel or parse failure.
    pub async fn extract_entities(&self, text: &str) -> Vec<EntityCandidate> {
        let request = GenerationRequest::new(self.entity_prompt(text)).with_max_tokens(1024);

        let response = match self
            .channels
            .call_by_component(ENTITY_COMPONENT, request)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Entity extraction call failed: {}", e);
                return Vec::new();
            }
        };

        let raw: Vec<RawEntity> = match decode::decode_json(&response) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Entity extraction returned malformed output: {}", e);
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for entity in raw {
            if entity.confidence < self.min_confidence {
                debug!(
                    "Discarding entity '{}' below confidence floor ({:.2} < {:.2})",
                    entity.name, entity.confidence, self.min_confidence
                );
                continue;
            }
            let name = EntityName::new(&entity.name);
            if name.is_empty() || !seen.insert(name.clone()) {
                continue;
            }
            candidates.push(EntityCandidate {
                name,
                entity_type: EntityType::new(&entity.kind),
                confidence: entity.confidence.clamp(0.0, 1.0),
            });
        }

        debug!("Extracted {} entity candidates", candidates.len());
        candidates
    }

    /// Extract relationship candidates between already-extracted entities.
    /// Only meaningful with at least two entities; fewer yields nothing
    /// without touching the channel.
    pub async fn extract_relationships(
        &self,
        text: &str,
        entities: &[EntityCandidate],
    ) -> Vec<RelationCandidate> {
        if entities.len() < 2 {
            return Vec::new();
        }

        let request =
            GenerationRequest::new(self.relationship_prompt(text, entities)).with_max_tokens(1024);

        let response = match self
            .channels
            .call_by_component(RELATION_COMPONENT, request)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Relationship extraction call failed: {}", e);
                return Vec::new();
            }
        };

        let raw: Vec<RawRelation> = match decode::decode_json(&response) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Relationship extraction returned malformed output: {}", e);
                return Vec::new();
            }
        };

        let known: HashSet<&EntityName> = entities.iter().map(|e| &e.name).collect();
        let mut candidates = Vec::new();
        for relation in raw {
            if relation.confidence < self.min_confidence {
                continue;
            }
            let source = EntityName::new(&relation.source);
            let target = EntityName::new(&relation.target);
            if !known.contains(&source) || !known.contains(&target) {
                debug!(
                    "Discarding relation with unknown endpoint: {} -> {}",
                    relation.source, relation.target
                );
                continue;
            }
            let relationship_type = RelationshipType::new(&relation.kind);
            if relationship_type.is_empty() || source == target {
                continue;
            }
            candidates.push(RelationCandidate {
                source,
                target,
                relationship_type,
                fact: relation.fact,
                confidence: relation.confidence.clamp(0.0, 1.0),
            });
        }

        debug!("Extracted {} relationship candidates", candidates.len());
        candidates
    }

    fn entity_prompt(&self, text: &str) -> String {
        format!(
            "Extract the named entities from the following text.\n\n\
             Allowed entity types: {}\n\n\
             Text:\n{}\n\n\
             Respond with a JSON array only, no commentary:\n\
             [{{\"name\": \"entity name\", \"type\": \"one of the allowed types\", \"confidence\": 0.0}}]\n\
             Only include entities explicitly present in the text.",
            self.entity_types.join(", "),
            truncate_chars(text, MAX_PROMPT_TEXT_CHARS)
        )
    }

    fn relationship_prompt(&self, text: &str, entities: &[EntityCandidate]) -> String {
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        format!(
            "Identify relationships between these entities: {}\n\n\
             Text:\n{}\n\n\
             Respond with a JSON array only, no commentary:\n\
             [{{\"source\": \"entity\", \"target\": \"entity\", \"type\": \"RELATIONSHIP_TYPE\", \
             \"fact\": \"one-sentence statement\", \"confidence\": 0.0}}]\n\
             Use only entities from the list. Only state relationships the text supports.",
            names.join(", "),
            truncate_chars(text, MAX_PROMPT_TEXT_CHARS)
        )
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
