//! Non-blocking ingestion queue and the background extraction worker

use crate::config::CoreConfig;
use crate::errors::CoreResult;
use crate::extract::KnowledgeExtractor;
use crate::store::{GraphStore, NewFact};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One episode awaiting extraction
#[derive(Debug, Clone)]
pub struct EpisodeRequest {
    pub content: String,
    pub source_type: String,
    pub source_id: String,
    pub reference_time: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Counters shared between the producer handle and the worker
#[derive(Debug, Default)]
struct QueueCounters {
    depth: AtomicUsize,
    dropped: AtomicU64,
    rejected_short: AtomicU64,
}

/// Producer-side handle to the bounded episode queue.
///
/// Cloneable and safe for concurrent producers. `queue_episode` never blocks
/// and never errors: under backpressure it drops the episode and reports
/// `false`, so producers keep running even when extraction cannot keep up.
#[derive(Clone)]
pub struct ExtractionQueue {
    tx: mpsc::Sender<EpisodeRequest>,
    counters: Arc<QueueCounters>,
    min_content_length: usize,
}

/// Consumer side of the queue, owned by exactly one worker
pub struct EpisodeReceiver {
    rx: mpsc::Receiver<EpisodeRequest>,
    counters: Arc<QueueCounters>,
}

impl ExtractionQueue {
    /// Create a bounded queue and its single-consumer receiver
    pub fn bounded(capacity: usize, min_content_length: usize) -> (Self, EpisodeReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let counters = Arc::new(QueueCounters::default());
        (
            Self {
                tx,
                counters: counters.clone(),
                min_content_length,
            },
            EpisodeReceiver { rx, counters },
        )
    }

    /// Enqueue an episode for extraction.
    ///
    /// Returns `false` without side effects when the content is shorter than
    /// the configured minimum, and `false` with the drop counted when the
    /// queue is full. The episode record itself is only created later, when
    /// the worker dequeues the request, so a drop leaves nothing behind.
    pub fn queue_episode(
        &self,
        content: impl Into<String>,
        source_type: impl Into<String>,
        source_id: impl Into<String>,
        reference_time: DateTime<Utc>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> bool {
        let content = content.into();
        if content.chars().count() < self.min_content_length {
            debug!(
                "Rejecting episode below minimum content length ({} chars)",
                content.chars().count()
            );
            self.counters.rejected_short.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let request = EpisodeRequest {
            content,
            source_type: source_type.into(),
            source_id: source_id.into(),
            reference_time,
            metadata,
        };

        match self.tx.try_send(request) {
            Ok(()) => {
                self.counters.depth.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Extraction queue full, dropping episode");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Extraction worker gone, dropping episode");
                false
            }
        }
    }

    /// Episodes currently waiting for the worker
    pub fn depth(&self) -> usize {
        self.counters.depth.load(Ordering::Relaxed)
    }

    /// Episodes dropped because the queue was full or closed
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

/// Counters owned by the worker, shared with its handle
#[derive(Debug, Default)]
struct WorkerCounters {
    processed: AtomicU64,
    errored: AtomicU64,
    contradictions: AtomicU64,
    /// Exponential moving average of per-episode processing time
    avg_processing_ms: Mutex<Option<f64>>,
}

const PROCESSING_EMA_ALPHA: f64 = 0.2;

impl WorkerCounters {
    fn record_processing_time(&self, ms: f64) {
        let mut avg = self.avg_processing_ms.lock().unwrap_or_else(|e| e.into_inner());
        *avg = Some(match *avg {
            Some(prev) => prev * (1.0 - PROCESSING_EMA_ALPHA) + ms * PROCESSING_EMA_ALPHA,
            None => ms,
        });
    }
}

/// Snapshot of worker throughput and health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerMetrics {
    pub episodes_processed: u64,
    pub episodes_errored: u64,
    pub contradictions: u64,
    pub avg_processing_ms: Option<f64>,
}

/// Handle to a running extraction worker: lifecycle and metrics
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
    counters: Arc<WorkerCounters>,
}

impl WorkerHandle {
    /// Snapshot the worker's counters
    pub fn metrics(&self) -> WorkerMetrics {
        let avg = self
            .counters
            .avg_processing_ms
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        WorkerMetrics {
            episodes_processed: self.counters.processed.load(Ordering::Relaxed),
            episodes_errored: self.counters.errored.load(Ordering::Relaxed),
            contradictions: self.counters.contradictions.load(Ordering::Relaxed),
            avg_processing_ms: *avg,
        }
    }

    /// Request a cooperative stop and wait for the worker to finish.
    ///
    /// The episode in flight, if any, always completes before the worker
    /// exits; only the dequeue point observes the signal.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            warn!("Extraction worker task failed to join: {}", e);
        }
    }
}

/// Single background consumer driving episodes through extraction and into
/// the graph store
pub struct ExtractionWorker {
    store: Arc<dyn GraphStore>,
    extractor: KnowledgeExtractor,
    max_content_length: usize,
}

impl ExtractionWorker {
    /// Spawn the worker task consuming from `receiver`
    pub fn spawn(
        config: &CoreConfig,
        receiver: EpisodeReceiver,
        store: Arc<dyn GraphStore>,
        extractor: KnowledgeExtractor,
    ) -> WorkerHandle {
        let worker = Self {
            store,
            extractor,
            max_content_length: config.max_content_length,
        };
        let counters = Arc::new(WorkerCounters::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task_counters = counters.clone();
        let join = tokio::spawn(worker.run(receiver, shutdown_rx, task_counters));

        WorkerHandle {
            shutdown_tx,
            join,
            counters,
        }
    }

    async fn run(
        self,
        mut receiver: EpisodeReceiver,
        mut shutdown_rx: watch::Receiver<bool>,
        counters: Arc<WorkerCounters>,
    ) {
        info!("Extraction worker started");
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Extraction worker received shutdown signal");
                    break;
                }
                request = receiver.rx.recv() => {
                    match request {
                        Some(request) => {
                            receiver.counters.depth.fetch_sub(1, Ordering::Relaxed);
                            self.process(request, &counters).await;
                        }
                        None => {
                            info!("All producers dropped, extraction worker stopping");
                            break;
                        }
                    }
                }
            }
        }
        info!("Extraction worker stopped");
    }

    /// Process one episode end to end. Failures are counted and logged; the
    /// worker itself always survives to pull the next episode.
    async fn process(&self, request: EpisodeRequest, counters: &WorkerCounters) {
        let started = std::time::Instant::now();
        match self.process_inner(request).await {
            Ok(contradictions) => {
                counters.processed.fetch_add(1, Ordering::Relaxed);
                counters
                    .contradictions
                    .fetch_add(contradictions, Ordering::Relaxed);
            }
            Err(e) => {
                counters.errored.fetch_add(1, Ordering::Relaxed);
                warn!("Episode processing failed: {}", e);
            }
        }
        counters.record_processing_time(started.elapsed().as_secs_f64() * 1000.0);
    }

    async fn process_inner(&self, request: EpisodeRequest) -> CoreResult<u64> {
        let content = truncate_chars(&request.content, self.max_content_length);
        let episode = self
            .store
            .create_episode(
                content,
                request.source_type,
                request.source_id,
                request.reference_time,
                request.metadata,
            )
            .await?;

        let entities = self.extractor.extract_entities(&episode.content).await;
        if entities.is_empty() {
            debug!("Episode {} yielded no entities", episode.id);
            return Ok(0);
        }

        for candidate in &entities {
            self.store
                .upsert_entity(
                    episode.id,
                    &candidate.name,
                    &candidate.entity_type,
                    candidate.confidence,
                )
                .await?;
        }

        let relations = self
            .extractor
            .extract_relationships(&episode.content, &entities)
            .await;

        let mut contradictions = 0u64;
        for relation in relations {
            let outcome = self
                .store
                .create_fact(NewFact {
                    source: relation.source,
                    target: relation.target,
                    relationship_type: relation.relationship_type,
                    fact: relation.fact,
                    confidence: relation.confidence,
                    source_episode_id: episode.id,
                    valid_from: episode.reference_time,
                })
                .await?;
            if outcome.is_contradiction() {
                contradictions += 1;
            }
        }

        debug!(
            "Episode {} persisted: {} entities, {} contradictions",
            episode.id,
            entities.len(),
            contradictions
        );
        Ok(contradictions)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_content(n: usize) -> String {
        "x".repeat(n)
    }

    #[tokio::test]
    async fn test_short_content_rejected_before_enqueue() {
        let (queue, receiver) = ExtractionQueue::bounded(10, 20);
        assert!(!queue.queue_episode(
            request_content(5),
            "thought",
            "rec-1",
            Utc::now(),
            HashMap::new(),
        ));
        assert_eq!(queue.depth(), 0);
        drop(receiver);
    }

    #[tokio::test]
    async fn test_queue_full_drops_without_blocking() {
        let (queue, _receiver) = ExtractionQueue::bounded(1, 0);
        assert!(queue.queue_episode(
            request_content(30),
            "thought",
            "rec-1",
            Utc::now(),
            HashMap::new(),
        ));
        // Second enqueue must return immediately with false
        assert!(!queue.queue_episode(
            request_content(30),
            "thought",
            "rec-2",
            Utc::now(),
            HashMap::new(),
        ));
        assert_eq!(queue.depth(), 1);
        assert_eq!(queue.dropped(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_worker_gone_reports_false() {
        let (queue, receiver) = ExtractionQueue::bounded(4, 0);
        drop(receiver);
        assert!(!queue.queue_episode(
            request_content(30),
            "thought",
            "rec-1",
            Utc::now(),
            HashMap::new(),
        ));
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
