//! Top-level service wiring channels, queue, worker and store together

use crate::channel::{ChannelManager, ChannelMetrics, TextGenerator};
use crate::config::CoreConfig;
use crate::errors::{CoreResult, GraphResult};
use crate::extract::KnowledgeExtractor;
use crate::ingest::{ExtractionQueue, ExtractionWorker, WorkerHandle, WorkerMetrics};
use crate::store::{GraphStore, MemoryGraphStore, MemoryStoreConfig};
use crate::types::{Entity, EntityName, EntityType, Episode, ProvenanceEntry, TemporalFact};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Combined health and metrics snapshot for the host system.
///
/// Degraded health shows up here as rising drop and error counts; ingestion
/// itself is never interrupted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Per-channel call metrics
    pub channels: HashMap<String, ChannelMetrics>,
    /// Episodes waiting for the worker
    pub queue_depth: usize,
    /// Episodes dropped at the queue since startup
    pub episodes_dropped: u64,
    /// Worker throughput counters
    pub worker: WorkerMetrics,
}

/// The episodic memory core: the sole ingestion entry point plus the query
/// and health surfaces, exposed as an in-process API.
///
/// All collaborators are injected at construction; nothing here is global.
pub struct MemoryService {
    channels: Arc<ChannelManager>,
    store: Arc<dyn GraphStore>,
    queue: ExtractionQueue,
    worker: WorkerHandle,
}

impl MemoryService {
    /// Build a service against an injected graph store
    pub fn new(
        config: CoreConfig,
        primary: Arc<dyn TextGenerator>,
        enrichment: Arc<dyn TextGenerator>,
        store: Arc<dyn GraphStore>,
    ) -> CoreResult<Self> {
        config.validate()?;

        let channels = Arc::new(ChannelManager::new(&config, primary, enrichment));
        let extractor = KnowledgeExtractor::new(channels.clone(), &config);
        let (queue, receiver) =
            ExtractionQueue::bounded(config.queue_max_size, config.min_content_length);
        let worker = ExtractionWorker::spawn(&config, receiver, store.clone(), extractor);

        info!(
            "Memory service started (queue capacity {}, interval {}s)",
            config.queue_max_size, config.interval_seconds
        );

        Ok(Self {
            channels,
            store,
            queue,
            worker,
        })
    }

    /// Build a service backed by the in-memory store, configured with the
    /// same contradiction strategy as `config`
    pub fn with_in_memory_store(
        config: CoreConfig,
        primary: Arc<dyn TextGenerator>,
        enrichment: Arc<dyn TextGenerator>,
    ) -> CoreResult<Self> {
        let store = Arc::new(MemoryGraphStore::with_config(MemoryStoreConfig {
            contradiction_strategy: config.contradiction_strategy,
            ..MemoryStoreConfig::default()
        }));
        Self::new(config, primary, enrichment, store)
    }

    /// Enqueue an episode for background extraction. Never blocks; returns
    /// `false` when the content is too short or the queue is full.
    pub fn queue_episode(
        &self,
        content: impl Into<String>,
        source_type: impl Into<String>,
        source_id: impl Into<String>,
        reference_time: DateTime<Utc>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> bool {
        self.queue
            .queue_episode(content, source_type, source_id, reference_time, metadata)
    }

    /// Search entities by name substring, ordered by mention count
    pub async fn search_entities(
        &self,
        query: &str,
        limit: usize,
        types: Option<&[EntityType]>,
    ) -> GraphResult<Vec<Entity>> {
        self.store.search_entities(query, limit, types).await
    }

    /// All facts touching an entity
    pub async fn get_entity_facts(
        &self,
        name: &EntityName,
        include_expired: bool,
    ) -> GraphResult<Vec<TemporalFact>> {
        self.store.get_entity_facts(name, include_expired).await
    }

    /// Audit trail from an entity back to the upstream records that
    /// produced it
    pub async fn trace_provenance(&self, name: &EntityName) -> GraphResult<Vec<ProvenanceEntry>> {
        self.store.trace_provenance(name).await
    }

    /// Fetch an episode by id
    pub async fn get_episode(&self, id: Uuid) -> GraphResult<Option<Episode>> {
        self.store.get_episode(id).await
    }

    /// The channel manager, for host components that share the generation
    /// budget (e.g. a primary reasoner calling through the primary channel)
    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    /// Snapshot the combined health surface
    pub async fn health(&self) -> HealthReport {
        HealthReport {
            channels: self.channels.metrics().await,
            queue_depth: self.queue.depth(),
            episodes_dropped: self.queue.dropped(),
            worker: self.worker.metrics(),
        }
    }

    /// Stop the worker cooperatively; the in-flight episode completes first
    pub async fn shutdown(self) {
        info!("Memory service shutting down");
        drop(self.queue);
        self.worker.shutdown().await;
    }
}
