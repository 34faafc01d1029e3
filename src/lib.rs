//! # Mnemograph
//!
//! An episodic temporal knowledge graph memory. Free-text episodes from an
//! upstream cognitive loop are queued without blocking, extracted into
//! entities and time-bounded facts by a single background worker, and
//! persisted with contradiction handling and full provenance — while a
//! channel manager shields the shared text-generation resource behind
//! per-channel rate gates with burst tolerance.
//!
//! The crate is an in-process library: the host supplies a
//! [`channel::TextGenerator`] per channel and (optionally) a
//! [`store::GraphStore`] backend, and talks to one [`service::MemoryService`].

pub mod channel;
pub mod config;
pub mod decode;
pub mod errors;
pub mod extract;
pub mod ingest;
pub mod rate;
pub mod service;
pub mod store;
pub mod types;

// Re-export the surface most hosts need
pub use channel::{ChannelManager, GenerationRequest, TextGenerator};
pub use config::CoreConfig;
pub use errors::{CoreError, GenerationError, GraphError};
pub use service::{HealthReport, MemoryService};
pub use store::{GraphStore, MemoryGraphStore};
pub use types::{ContradictionStrategy, Entity, EntityName, Episode, TemporalFact};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::channel::*;
    pub use crate::config::*;
    pub use crate::errors::*;
    pub use crate::extract::{EntityCandidate, KnowledgeExtractor, RelationCandidate};
    pub use crate::ingest::*;
    pub use crate::service::*;
    pub use crate::store::*;
    pub use crate::types::*;
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use uuid::Uuid;
}
