//! Configuration for the sync manager.

use crate::resolve::ResolutionStrategy;
use std::time::Duration;
use uuid::Uuid;

/// Which side wins a merge field both replicas changed differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeTieBreak {
    /// Remote value wins contested fields.
    #[default]
    RemoteWins,
    /// Local value wins contested fields.
    LocalWins,
}

/// What to do when resolving or applying a conflict fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyFallback {
    /// Leave the local document in place.
    #[default]
    KeepLocal,
    /// Apply the remote change as if the key were clean.
    AcceptRemote,
}

/// Configuration for a [`crate::SyncManager`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the sync server.
    pub upstream_url: String,
    /// Identifies this replica to the server.
    pub client_id: String,
    /// Quiet window after a local write before a push fires. Any new
    /// write resets it.
    pub push_debounce: Duration,
    /// Interval between full push + pull cycles.
    pub sync_interval: Duration,
    /// Maximum mutations per push request.
    pub push_batch_size: usize,
    /// Whether interval cycles also pull.
    pub pull_enabled: bool,
    /// Conflict resolution strategy.
    pub strategy: ResolutionStrategy,
    /// Tie-break for contested merge fields.
    pub merge_tie_break: MergeTieBreak,
    /// Behavior when a conflict fails to resolve or apply.
    pub strategy_fallback: StrategyFallback,
}

impl SyncConfig {
    /// Creates a configuration with a fresh client id and defaults.
    pub fn new(upstream_url: impl Into<String>) -> Self {
        Self {
            upstream_url: upstream_url.into(),
            client_id: Uuid::new_v4().to_string(),
            push_debounce: Duration::from_millis(500),
            sync_interval: Duration::from_secs(5),
            push_batch_size: 50,
            pull_enabled: true,
            strategy: ResolutionStrategy::LastWriteWins,
            merge_tie_break: MergeTieBreak::default(),
            strategy_fallback: StrategyFallback::default(),
        }
    }

    /// Sets the client id.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Sets the push debounce window.
    pub fn with_push_debounce(mut self, debounce: Duration) -> Self {
        self.push_debounce = debounce;
        self
    }

    /// Sets the interval between sync cycles.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the maximum mutations per push.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size;
        self
    }

    /// Enables or disables pulling.
    pub fn with_pull_enabled(mut self, enabled: bool) -> Self {
        self.pull_enabled = enabled;
        self
    }

    /// Sets the conflict resolution strategy.
    pub fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the merge tie-break.
    pub fn with_merge_tie_break(mut self, tie_break: MergeTieBreak) -> Self {
        self.merge_tie_break = tie_break;
        self
    }

    /// Sets the fallback for failed resolutions.
    pub fn with_strategy_fallback(mut self, fallback: StrategyFallback) -> Self {
        self.strategy_fallback = fallback;
        self
    }
}
