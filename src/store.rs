//! Temporal graph persistence: upsert, contradiction handling, provenance

use crate::errors::{GraphError, GraphResult};
use crate::types::{
    ContradictionStrategy, Entity, EntityName, EntityType, Episode, FactOutcome, ProvenanceEntry,
    RelationshipType, TemporalFact,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A candidate fact handed to the store by the extraction worker
#[derive(Debug, Clone)]
pub struct NewFact {
    pub source: EntityName,
    pub target: EntityName,
    pub relationship_type: RelationshipType,
    pub fact: String,
    pub confidence: f32,
    pub source_episode_id: Uuid,
    pub valid_from: DateTime<Utc>,
}

/// Storage backend for entities, episodes and temporal facts.
///
/// Only the extraction worker writes through this trait; queries are open
/// to the host system.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Record an immutable episode snapshot
    async fn create_episode(
        &self,
        content: String,
        source_type: String,
        source_id: String,
        reference_time: DateTime<Utc>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> GraphResult<Episode>;

    /// Create the entity if absent, otherwise reinforce it: increment
    /// `mention_count` and keep the maximum confidence seen. Always links
    /// the episode to the entity for provenance.
    async fn upsert_entity(
        &self,
        episode_id: Uuid,
        name: &EntityName,
        entity_type: &EntityType,
        confidence: f32,
    ) -> GraphResult<Entity>;

    /// Insert a fact, detecting and resolving contradictions with the
    /// currently-valid fact on the same (source, target, type) triple
    async fn create_fact(&self, fact: NewFact) -> GraphResult<FactOutcome>;

    /// Case-insensitive substring search over entity names, ordered by
    /// `mention_count` descending. The query is always matched as a
    /// literal, never interpreted.
    async fn search_entities(
        &self,
        query: &str,
        limit: usize,
        types: Option<&[EntityType]>,
    ) -> GraphResult<Vec<Entity>>;

    /// All facts touching the entity, optionally excluding expired ones
    async fn get_entity_facts(
        &self,
        name: &EntityName,
        include_expired: bool,
    ) -> GraphResult<Vec<TemporalFact>>;

    /// Walk from an entity back through the episodes that extracted it to
    /// the upstream records, ordered by `reference_time` ascending
    async fn trace_provenance(&self, name: &EntityName) -> GraphResult<Vec<ProvenanceEntry>>;

    /// Fetch an episode by id
    async fn get_episode(&self, id: Uuid) -> GraphResult<Option<Episode>>;

    /// Facts left in place by `flag_for_review`, awaiting manual resolution
    async fn flagged_facts(&self) -> GraphResult<Vec<TemporalFact>>;

    /// Test that the backend is reachable
    async fn health_check(&self) -> GraphResult<()>;
}

/// Configuration for the in-memory store
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Maximum number of entities to hold
    pub max_entities: Option<usize>,
    /// Maximum number of facts to hold
    pub max_facts: Option<usize>,
    /// How contradictions are resolved
    pub contradiction_strategy: ContradictionStrategy,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_entities: Some(100_000),
            max_facts: Some(500_000),
            contradiction_strategy: ContradictionStrategy::default(),
        }
    }
}

/// Internal mutable state, guarded by one RwLock.
///
/// The write lock doubles as the critical section for the contradiction
/// check-then-invalidate sequence: two concurrent writers to the same
/// triple can never both observe "no current valid fact".
struct GraphData {
    entities: HashMap<EntityName, Entity>,
    episodes: HashMap<Uuid, Episode>,
    facts: HashMap<Uuid, TemporalFact>,
    /// Index: entity name -> fact ids touching it (as source or target)
    facts_by_entity: HashMap<EntityName, Vec<Uuid>>,
    /// Index: entity name -> episode ids that mentioned it, provenance order
    mentions_by_entity: HashMap<EntityName, Vec<Uuid>>,
}

impl GraphData {
    fn new() -> Self {
        Self {
            entities: HashMap::new(),
            episodes: HashMap::new(),
            facts: HashMap::new(),
            facts_by_entity: HashMap::new(),
            mentions_by_entity: HashMap::new(),
        }
    }

    fn insert_fact(&mut self, fact: TemporalFact) -> Uuid {
        let id = fact.id;
        self.facts_by_entity
            .entry(fact.source.clone())
            .or_insert_with(Vec::new)
            .push(id);
        if fact.target != fact.source {
            self.facts_by_entity
                .entry(fact.target.clone())
                .or_insert_with(Vec::new)
                .push(id);
        }
        self.facts.insert(id, fact);
        id
    }

    /// Find the currently-valid fact on the ordered triple, if any
    fn current_fact_for_triple(
        &self,
        source: &EntityName,
        target: &EntityName,
        kind: &RelationshipType,
    ) -> Option<Uuid> {
        self.facts_by_entity
            .get(source)?
            .iter()
            .filter_map(|id| self.facts.get(id))
            .find(|f| f.same_triple(source, target, kind) && f.is_currently_valid())
            .map(|f| f.id)
    }
}

/// In-memory [`GraphStore`] implementation
pub struct MemoryGraphStore {
    data: Arc<RwLock<GraphData>>,
    config: MemoryStoreConfig,
}

impl MemoryGraphStore {
    /// Create a store with the default configuration
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    /// Create a store with the given configuration
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        info!("Creating in-memory graph store with config: {:?}", config);
        Self {
            data: Arc::new(RwLock::new(GraphData::new())),
            config,
        }
    }

    /// Create a store resolving contradictions with the given strategy
    pub fn with_strategy(strategy: ContradictionStrategy) -> Self {
        Self::with_config(MemoryStoreConfig {
            contradiction_strategy: strategy,
            ..MemoryStoreConfig::default()
        })
    }

    /// Counts of (entities, episodes, facts) held by the store
    pub async fn stats(&self) -> (usize, usize, usize) {
        let data = self.data.read().await;
        (data.entities.len(), data.episodes.len(), data.facts.len())
    }

    /// Drop all stored data
    pub async fn clear(&self) {
        let mut data = self.data.write().await;
        *data = GraphData::new();
        info!("Cleared in-memory graph store");
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn create_episode(
        &self,
        content: String,
        source_type: String,
        source_id: String,
        reference_time: DateTime<Utc>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> GraphResult<Episode> {
        let episode = Episode {
            id: Uuid::new_v4(),
            content,
            source_type,
            source_id,
            reference_time,
            created_at: Utc::now(),
            metadata,
        };

        let mut data = self.data.write().await;
        debug!("Creating episode {} from {}", episode.id, episode.source_type);
        data.episodes.insert(episode.id, episode.clone());
        Ok(episode)
    }

    async fn upsert_entity(
        &self,
        episode_id: Uuid,
        name: &EntityName,
        entity_type: &EntityType,
        confidence: f32,
    ) -> GraphResult<Entity> {
        if name.is_empty() {
            return Err(GraphError::ConstraintViolation(
                "Entity name must not be empty".to_string(),
            ));
        }

        let mut data = self.data.write().await;

        if !data.episodes.contains_key(&episode_id) {
            return Err(GraphError::EpisodeNotFound(episode_id.to_string()));
        }

        let now = Utc::now();
        let entity = match data.entities.get_mut(name) {
            Some(existing) => {
                existing.mention_count += 1;
                existing.confidence = existing.confidence.max(confidence);
                existing.last_mentioned = now;
                existing.clone()
            }
            None => {
                if let Some(max_entities) = self.config.max_entities {
                    if data.entities.len() >= max_entities {
                        return Err(GraphError::ConstraintViolation(format!(
                            "Maximum entity limit ({}) reached",
                            max_entities
                        )));
                    }
                }
                let entity = Entity {
                    name: name.clone(),
                    entity_type: entity_type.clone(),
                    confidence,
                    mention_count: 1,
                    created_at: now,
                    last_mentioned: now,
                };
                data.entities.insert(name.clone(), entity.clone());
                debug!("Created entity '{}' ({})", name, entity_type);
                entity
            }
        };

        // Provenance link: this episode mentioned the entity
        data.mentions_by_entity
            .entry(name.clone())
            .or_insert_with(Vec::new)
            .push(episode_id);

        Ok(entity)
    }

    async fn create_fact(&self, fact: NewFact) -> GraphResult<FactOutcome> {
        let mut data = self.data.write().await;

        if !data.entities.contains_key(&fact.source) {
            return Err(GraphError::EntityNotFound(fact.source.to_string()));
        }
        if !data.entities.contains_key(&fact.target) {
            return Err(GraphError::EntityNotFound(fact.target.to_string()));
        }
        if let Some(max_facts) = self.config.max_facts {
            if data.facts.len() >= max_facts {
                return Err(GraphError::ConstraintViolation(format!(
                    "Maximum fact limit ({}) reached",
                    max_facts
                )));
            }
        }

        let existing = data.current_fact_for_triple(
            &fact.source,
            &fact.target,
            &fact.relationship_type,
        );

        // Same triple restating the same text is not a contradiction and
        // not a new fact.
        if let Some(existing_id) = existing {
            if data.facts[&existing_id].fact == fact.fact {
                debug!(
                    "Fact restated for triple {} -{}-> {}, no write",
                    fact.source, fact.relationship_type, fact.target
                );
                return Ok(FactOutcome::Restated {
                    existing_id,
                });
            }
        }

        let mut record = TemporalFact {
            id: Uuid::new_v4(),
            source: fact.source,
            target: fact.target,
            relationship_type: fact.relationship_type,
            fact: fact.fact,
            confidence: fact.confidence,
            source_episode_id: fact.source_episode_id,
            created_at: Utc::now(),
            valid_from: fact.valid_from,
            valid_to: None,
            invalidated_by: None,
            flagged_for_review: false,
        };

        let outcome = match existing {
            None => {
                let fact_id = data.insert_fact(record);
                FactOutcome::Created { fact_id }
            }
            Some(old_id) => match self.config.contradiction_strategy {
                ContradictionStrategy::InvalidateOld => {
                    let superseding_text = record.fact.clone();
                    let old = data
                        .facts
                        .get_mut(&old_id)
                        .ok_or_else(|| GraphError::QueryFailed("Inconsistent fact index".to_string()))?;
                    old.valid_to = Some(Utc::now());
                    old.invalidated_by = Some(superseding_text);
                    warn!(
                        "Contradiction on {} -{}-> {}: invalidated fact {}",
                        record.source, record.relationship_type, record.target, old_id
                    );
                    let fact_id = data.insert_fact(record);
                    FactOutcome::Superseded {
                        fact_id,
                        invalidated_id: old_id,
                    }
                }
                ContradictionStrategy::FlagForReview => {
                    record.flagged_for_review = true;
                    if let Some(old) = data.facts.get_mut(&old_id) {
                        old.flagged_for_review = true;
                    }
                    warn!(
                        "Contradiction on {} -{}-> {}: both facts flagged for review",
                        record.source, record.relationship_type, record.target
                    );
                    let fact_id = data.insert_fact(record);
                    FactOutcome::FlaggedForReview {
                        fact_id,
                        conflicting_id: old_id,
                    }
                }
                ContradictionStrategy::KeepBoth => {
                    let fact_id = data.insert_fact(record);
                    FactOutcome::KeptBoth {
                        fact_id,
                        conflicting_id: old_id,
                    }
                }
            },
        };

        Ok(outcome)
    }

    async fn search_entities(
        &self,
        query: &str,
        limit: usize,
        types: Option<&[EntityType]>,
    ) -> GraphResult<Vec<Entity>> {
        let data = self.data.read().await;
        let needle = query.to_lowercase();

        let mut matches: Vec<Entity> = data
            .entities
            .values()
            .filter(|e| e.name.as_str().to_lowercase().contains(&needle))
            .filter(|e| types.map_or(true, |wanted| wanted.contains(&e.entity_type)))
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            b.mention_count
                .cmp(&a.mention_count)
                .then_with(|| a.name.as_str().cmp(b.name.as_str()))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn get_entity_facts(
        &self,
        name: &EntityName,
        include_expired: bool,
    ) -> GraphResult<Vec<TemporalFact>> {
        let data = self.data.read().await;
        let facts = data
            .facts_by_entity
            .get(name)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| data.facts.get(id))
                    .filter(|f| include_expired || f.is_currently_valid())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(facts)
    }

    async fn trace_provenance(&self, name: &EntityName) -> GraphResult<Vec<ProvenanceEntry>> {
        let data = self.data.read().await;

        if !data.entities.contains_key(name) {
            return Err(GraphError::EntityNotFound(name.to_string()));
        }

        let mut trail: Vec<ProvenanceEntry> = data
            .mentions_by_entity
            .get(name)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| data.episodes.get(id))
                    .map(|ep| ProvenanceEntry {
                        episode_id: ep.id,
                        source_type: ep.source_type.clone(),
                        source_id: ep.source_id.clone(),
                        reference_time: ep.reference_time,
                    })
                    .collect()
            })
            .unwrap_or_default();

        trail.sort_by_key(|entry| entry.reference_time);
        Ok(trail)
    }

    async fn get_episode(&self, id: Uuid) -> GraphResult<Option<Episode>> {
        let data = self.data.read().await;
        Ok(data.episodes.get(&id).cloned())
    }

    async fn flagged_facts(&self) -> GraphResult<Vec<TemporalFact>> {
        let data = self.data.read().await;
        Ok(data
            .facts
            .values()
            .filter(|f| f.flagged_for_review)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> GraphResult<()> {
        let (entities, episodes, facts) = self.stats().await;
        debug!(
            "Graph store health check: {} entities, {} episodes, {} facts",
            entities, episodes, facts
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn episode_for(store: &MemoryGraphStore, source_id: &str) -> Episode {
        store
            .create_episode(
                "some ingested text".to_string(),
                "thought".to_string(),
                source_id.to_string(),
                Utc::now(),
                HashMap::new(),
            )
            .await
            .unwrap()
    }

    fn fact_for(episode: &Episode, source: &str, target: &str, text: &str) -> NewFact {
        NewFact {
            source: EntityName::new(source),
            target: EntityName::new(target),
            relationship_type: RelationshipType::new("RELATES_TO"),
            fact: text.to_string(),
            confidence: 0.9,
            source_episode_id: episode.id,
            valid_from: episode.reference_time,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_on_attributes() {
        let store = MemoryGraphStore::new();
        let episode = episode_for(&store, "rec-1").await;
        let name = EntityName::new("X");
        let kind = EntityType::new("Concept");

        store.upsert_entity(episode.id, &name, &kind, 0.8).await.unwrap();
        let entity = store.upsert_entity(episode.id, &name, &kind, 0.8).await.unwrap();

        assert_eq!(entity.mention_count, 2);
        assert_eq!(entity.confidence, 0.8);
    }

    #[tokio::test]
    async fn test_upsert_takes_max_confidence() {
        let store = MemoryGraphStore::new();
        let episode = episode_for(&store, "rec-1").await;
        let name = EntityName::new("X");
        let kind = EntityType::new("Concept");

        store.upsert_entity(episode.id, &name, &kind, 0.9).await.unwrap();
        let entity = store.upsert_entity(episode.id, &name, &kind, 0.4).await.unwrap();

        assert_eq!(entity.confidence, 0.9);
        assert_eq!(entity.mention_count, 2);
    }

    #[tokio::test]
    async fn test_upsert_requires_existing_episode() {
        let store = MemoryGraphStore::new();
        let result = store
            .upsert_entity(
                Uuid::new_v4(),
                &EntityName::new("X"),
                &EntityType::new("Concept"),
                0.8,
            )
            .await;
        assert!(matches!(result, Err(GraphError::EpisodeNotFound(_))));
    }

    #[tokio::test]
    async fn test_fact_requires_existing_entities() {
        let store = MemoryGraphStore::new();
        let episode = episode_for(&store, "rec-1").await;
        let result = store.create_fact(fact_for(&episode, "A", "B", "A relates to B")).await;
        assert!(matches!(result, Err(GraphError::EntityNotFound(_))));
    }

    async fn seed_pair(store: &MemoryGraphStore) -> Episode {
        let episode = episode_for(store, "rec-1").await;
        let kind = EntityType::new("Concept");
        store
            .upsert_entity(episode.id, &EntityName::new("A"), &kind, 0.9)
            .await
            .unwrap();
        store
            .upsert_entity(episode.id, &EntityName::new("B"), &kind, 0.9)
            .await
            .unwrap();
        episode
    }

    #[tokio::test]
    async fn test_supersession_chain_keeps_single_valid_fact() {
        let store = MemoryGraphStore::new();
        let episode = seed_pair(&store).await;

        for text in ["v1", "v2", "v3"] {
            let outcome = store.create_fact(fact_for(&episode, "A", "B", text)).await.unwrap();
            if text == "v1" {
                assert!(matches!(outcome, FactOutcome::Created { .. }));
            } else {
                assert!(outcome.is_contradiction());
            }
        }

        let all = store
            .get_entity_facts(&EntityName::new("A"), true)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let valid: Vec<_> = all.iter().filter(|f| f.is_currently_valid()).collect();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].fact, "v3");

        let v1 = all.iter().find(|f| f.fact == "v1").unwrap();
        let v2 = all.iter().find(|f| f.fact == "v2").unwrap();
        assert_eq!(v1.invalidated_by.as_deref(), Some("v2"));
        assert_eq!(v2.invalidated_by.as_deref(), Some("v3"));
    }

    #[tokio::test]
    async fn test_restatement_is_not_a_contradiction() {
        let store = MemoryGraphStore::new();
        let episode = seed_pair(&store).await;

        store.create_fact(fact_for(&episode, "A", "B", "same text")).await.unwrap();
        let outcome = store
            .create_fact(fact_for(&episode, "A", "B", "same text"))
            .await
            .unwrap();

        assert!(matches!(outcome, FactOutcome::Restated { .. }));
        let all = store
            .get_entity_facts(&EntityName::new("A"), true)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_flag_for_review_keeps_both_valid_and_flags() {
        let store = MemoryGraphStore::with_strategy(ContradictionStrategy::FlagForReview);
        let episode = seed_pair(&store).await;

        store.create_fact(fact_for(&episode, "A", "B", "old")).await.unwrap();
        let outcome = store.create_fact(fact_for(&episode, "A", "B", "new")).await.unwrap();
        assert!(matches!(outcome, FactOutcome::FlaggedForReview { .. }));

        let valid = store
            .get_entity_facts(&EntityName::new("A"), false)
            .await
            .unwrap();
        assert_eq!(valid.len(), 2);

        let flagged = store.flagged_facts().await.unwrap();
        assert_eq!(flagged.len(), 2);
    }

    #[tokio::test]
    async fn test_keep_both_leaves_old_fact_untouched() {
        let store = MemoryGraphStore::with_strategy(ContradictionStrategy::KeepBoth);
        let episode = seed_pair(&store).await;

        store.create_fact(fact_for(&episode, "A", "B", "old")).await.unwrap();
        let outcome = store.create_fact(fact_for(&episode, "A", "B", "new")).await.unwrap();
        assert!(matches!(outcome, FactOutcome::KeptBoth { .. }));

        let all = store
            .get_entity_facts(&EntityName::new("A"), true)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|f| f.is_currently_valid()));
        assert!(all.iter().all(|f| f.invalidated_by.is_none()));
        assert!(store.flagged_facts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_opposite_direction_is_a_distinct_triple() {
        let store = MemoryGraphStore::new();
        let episode = seed_pair(&store).await;

        store.create_fact(fact_for(&episode, "A", "B", "a to b")).await.unwrap();
        let outcome = store.create_fact(fact_for(&episode, "B", "A", "b to a")).await.unwrap();

        assert!(matches!(outcome, FactOutcome::Created { .. }));
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_and_ordered() {
        let store = MemoryGraphStore::new();
        let episode = episode_for(&store, "rec-1").await;
        let concept = EntityType::new("Concept");
        let person = EntityType::new("Person");

        store
            .upsert_entity(episode.id, &EntityName::new("Rust Language"), &concept, 0.9)
            .await
            .unwrap();
        for _ in 0..3 {
            store
                .upsert_entity(episode.id, &EntityName::new("Rusty Nail"), &person, 0.9)
                .await
                .unwrap();
        }

        let results = store.search_entities("rust", 10, None).await.unwrap();
        assert_eq!(results.len(), 2);
        // Most-mentioned entity first
        assert_eq!(results[0].name.as_str(), "Rusty Nail");

        let people_only = store
            .search_entities("rust", 10, Some(&[person.clone()]))
            .await
            .unwrap();
        assert_eq!(people_only.len(), 1);
        assert_eq!(people_only[0].entity_type, person);

        let limited = store.search_entities("rust", 1, None).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_provenance_ordered_by_reference_time() {
        let store = MemoryGraphStore::new();
        let name = EntityName::new("X");
        let kind = EntityType::new("Concept");
        let base = Utc::now();

        // Insert episodes out of reference-time order
        for (offset, source_id) in [(2i64, "rec-late"), (0, "rec-early"), (1, "rec-mid")] {
            let episode = store
                .create_episode(
                    "text".to_string(),
                    "thought".to_string(),
                    source_id.to_string(),
                    base + chrono::Duration::seconds(offset),
                    HashMap::new(),
                )
                .await
                .unwrap();
            store.upsert_entity(episode.id, &name, &kind, 0.8).await.unwrap();
        }

        let trail = store.trace_provenance(&name).await.unwrap();
        assert_eq!(trail.len(), 3);
        let ids: Vec<_> = trail.iter().map(|e| e.source_id.as_str()).collect();
        assert_eq!(ids, vec!["rec-early", "rec-mid", "rec-late"]);
        assert!(trail.iter().all(|e| !e.source_id.is_empty()));
    }

    #[tokio::test]
    async fn test_provenance_unknown_entity_is_an_error() {
        let store = MemoryGraphStore::new();
        let result = store.trace_provenance(&EntityName::new("ghost")).await;
        assert!(matches!(result, Err(GraphError::EntityNotFound(_))));
    }

    #[tokio::test]
    async fn test_entity_limit_enforced() {
        let store = MemoryGraphStore::with_config(MemoryStoreConfig {
            max_entities: Some(1),
            ..MemoryStoreConfig::default()
        });
        let episode = episode_for(&store, "rec-1").await;
        let kind = EntityType::new("Concept");

        store
            .upsert_entity(episode.id, &EntityName::new("first"), &kind, 0.8)
            .await
            .unwrap();
        let result = store
            .upsert_entity(episode.id, &EntityName::new("second"), &kind, 0.8)
            .await;
        assert!(matches!(result, Err(GraphError::ConstraintViolation(_))));

        // Reinforcing the existing entity is still allowed
        assert!(store
            .upsert_entity(episode.id, &EntityName::new("first"), &kind, 0.8)
            .await
            .is_ok());
    }
}
