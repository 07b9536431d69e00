//! # Wayfarer Mind
//!
//! Decision core of an autonomous block-world agent.
//!
//! A fixed-rate loop ingests world snapshots and events, decides when to run
//! an expensive reasoning step (a tool-using LLM conversation), keeps short-
//! and long-term memory, and reconciles asynchronous behavior completions
//! with the reasoning episodes that started them.
//!
//! ## Key Concepts
//!
//! - **Tick**: one fixed-period iteration of the scheduler
//! - **Event Buffer**: bounded, priority-aware inbox read by the next think
//! - **Spatial Memory**: short-lived per-entity / per-block recency cache
//! - **Semantic Memory**: bounded store of tagged facts with hybrid recall
//! - **Episode**: one decision cycle, from trigger to recorded outcome
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        LoopAgent                         │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────────────┐  │
//! │  │ Perception │  │  Trigger   │  │  Episode binding   │  │
//! │  │   diffing  │  │   policy   │  │  + pending ends    │  │
//! │  └─────┬──────┘  └─────┬──────┘  └─────────┬──────────┘  │
//! │        │               │                   │             │
//! │  ┌─────┴──────┐  ┌─────┴──────┐  ┌─────────┴──────────┐  │
//! │  │  Spatial   │  │   Event    │  │    Episode log     │  │
//! │  │  memory    │  │   buffer   │  │   + auto-memory    │  │
//! │  └────────────┘  └─────┬──────┘  └─────────┬──────────┘  │
//! │                        │                   │             │
//! │               ┌────────┴───────────────────┴──────┐      │
//! │               │  Thinker (one task at a time)     │      │
//! │               │  backend calls + agent tools      │      │
//! │               └───────────────────────────────────┘      │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod domain;
pub mod infra;
pub mod ports;
pub mod thinker;

// Re-export core types
pub use agent::{AgentStatus, Collaborators, LoopAgent};
pub use config::MindConfig;
pub use domain::episodes::{Episode, EpisodeLog};
pub use domain::events::{BufferedEvent, EventBuffer};
pub use domain::semantic::{MemoryContext, MemoryEntry, RecallHit, SemanticMemoryStore};
pub use domain::spatial::SpatialMemory;
pub use thinker::{ThinkContext, Thinker, ThinkerError, ThinkerTrace};

// Re-export infrastructure
pub use infra::bus::EventBus;
pub use infra::embedding::{Embedder, TokenEmbedding};
pub use infra::runner::TaskBehaviorRunner;

/// Default tick period
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 50;

/// Default deadline for one reasoning invocation
pub const DEFAULT_THINK_TIMEOUT_SECS: u64 = 120;

/// Default semantic memory capacity
pub const DEFAULT_MEMORY_CAPACITY: usize = 1000;

/// Default hashed embedding dimensionality
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 64;
