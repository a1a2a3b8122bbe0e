//! # DocSync Engine
//!
//! Offline queue, conflict resolution, and the sync loop for DocSync.
//!
//! This crate provides:
//! - Durable, coalescing offline queue over the local store
//! - Replication checkpoint and conflict audit log
//! - Conflict resolution strategies (last-write-wins, local, remote,
//!   3-way merge, custom)
//! - Reachability tracking (OS signal + learned server state)
//! - Async transport abstraction with HTTP and mock implementations
//! - Sync manager with debounced push and interval pull
//!
//! ## Key Invariants
//!
//! - Delivery is at-least-once: a mutation leaves the queue only on a
//!   server receipt
//! - Coalescing preserves the original base revision and snapshot
//! - Every detected conflict is recorded to history before resolution
//! - The pull checkpoint advances only after a fully applied batch
//! - Remote changes apply silently and never re-enter the queue
//! - Cycle errors never escape the loop; they surface as reachability

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod manager;
mod queue;
mod reachability;
mod resolve;
mod state;
mod transport;

pub use config::{MergeTieBreak, StrategyFallback, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer};
pub use manager::SyncManager;
pub use queue::{OfflineQueue, QueueEntry, QueueValue, QUEUE_TABLE};
pub use reachability::Reachability;
pub use resolve::{resolve, CustomResolver, ResolutionOutcome, ResolutionStrategy};
pub use state::{ConflictHistory, ReplicationState, CONFLICT_TABLE, STATE_TABLE};
pub use transport::{MockTransport, SyncTransport};
