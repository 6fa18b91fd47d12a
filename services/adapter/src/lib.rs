//! Fixture Feed Adapter
//!
//! Keeps a consistent, ordered view of every live fixture in a sports feed
//! and pushes it to a downstream platform:
//! - One stream listener per fixture reconciling sequence and epoch
//! - Snapshot fallback whenever continuity is lost
//! - Suspension of fixtures on abnormal disconnects
//! - Priority-ordered scheduling of fixture work across a worker pool
//! - Periodic stream health checks
//!
//! # Architecture
//!
//! ```text
//!   Feed resources
//!        │
//!   ┌────▼─────┐
//!   │Supervisor│  ← process_resource, health monitor
//!   └────┬─────┘
//!        │
//!   ┌────▼──────────┐
//!   │PriorityQueue  │  High / Medium / Low lanes
//!   └────┬──────────┘
//!        │ workers
//!   ┌────▼──────────┐
//!   │ListenerManager│  one listener per fixture
//!   └────┬──────────┘
//!        │
//!   ┌────▼─────────┐    ┌─────────┐
//!   │StreamListener├───►│Connector│
//!   └────┬─────────┘    └─────────┘
//!        │ validator: Apply / Ignore / FetchSnapshot
//!   ┌────▼──────────┐
//!   │ResourceFacade │  stream + snapshots
//!   └───────────────┘
//! ```

pub mod config;
pub mod diagnostics;
pub mod facade;
pub mod listener;
pub mod manager;
pub mod priority_queue;
pub mod stores;
pub mod supervisor;
pub mod telemetry;
pub mod validator;

pub use config::AdapterConfig;
pub use facade::{Connector, ResourceEvent, ResourceFacade};
pub use listener::{ListenerError, StreamListener, StreamingState};
pub use manager::{ListenerManager, ManagerEvent};
pub use priority_queue::{PriorityQueue, ProcessingPriority};
pub use supervisor::{ProcessingJob, Supervisor};
pub use validator::UpdateDecision;
