//! # kingdom-session
//!
//! Client-side session layer for Kingdom game sessions.
//!
//! This crate provides:
//! - **Action metadata cache**: costs, requirement failures and option groups
//!   keyed by action id plus canonical parameters
//! - **Key-scoped subscriptions**: listeners notified after every write to
//!   their key, with immediate delivery of the current value
//! - **Per-session task queue**: strict FIFO execution per session id, with
//!   independent sessions running concurrently
//! - **Remote session adapter**: one facade per session over the above and the
//!   game engine collaborators
//!
//! ## Architecture
//!
//! ```text
//!   UI / CLI
//!      │
//!      ▼
//! ┌──────────────────────┐      ┌──────────────────┐
//! │ RemoteSessionAdapter │─────▶│ SessionTaskQueue │ (shared per registry)
//! │  cache + subs        │      └────────┬─────────┘
//! └─────────┬────────────┘               │
//!           │ reads / writes             │ serialized mutations
//!           ▼                            ▼
//!   ActionMetadataCache          EngineHandles (store, advancer,
//!   ActionMetadataSubscriptions   ai, simulator)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kingdom_core::SessionConfig;
//! use kingdom_session::{EngineHandles, InMemoryEngine, SessionRegistry};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), kingdom_session::SessionError> {
//! let engine = Arc::new(InMemoryEngine::default());
//! engine.create_session("s-1");
//!
//! let registry = SessionRegistry::new(EngineHandles::from_engine(engine), SessionConfig::default());
//! let session = registry.create("s-1")?;
//!
//! let params = json!({"landId": "L1"});
//! let _sub = session.subscribe_action_metadata("build", Some(&params), |snapshot| {
//!     println!("build metadata: {snapshot:?}");
//! });
//! session.set_action_costs("build", [("gold".to_string(), 3.0)].into(), Some(&params));
//!
//! session.perform_action("build", Some(&params)).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod cache;
pub mod engine;
pub mod error;
pub mod loader;
pub mod memory;
pub mod queue;
pub mod registry;
pub mod subscriptions;

pub use adapter::RemoteSessionAdapter;
pub use cache::{ActionMetadataCache, ClearedMetadata};
pub use engine::{AiTurnRunner, EngineHandles, PhaseAdvancer, PhaseSimulator, SessionStateStore};
pub use error::SessionError;
pub use loader::{ActionMetadataLoader, ActionMetadataSource, LoadOutcome};
pub use memory::InMemoryEngine;
pub use queue::SessionTaskQueue;
pub use registry::SessionRegistry;
pub use subscriptions::{ActionMetadataSubscriptions, MetadataReader, MetadataSubscription};
