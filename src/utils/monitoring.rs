//! Pool telemetry
//!
//! Counters are eventually consistent and never consulted for correctness.
//! Components hold an `Arc<PoolMetrics>`; the binary shares the process-wide
//! instance from [`global_metrics`], tests build isolated ones.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::info;

use crate::stratum::RejectReason;

/// Live counters for sessions and shares
#[derive(Debug)]
pub struct PoolMetrics {
    started_at: Instant,
    connections_open: AtomicU64,
    connections_total: AtomicU64,
    sessions_subscribed: AtomicU64,
    workers_authorized: AtomicU64,
    shares_accepted: AtomicU64,
    blocks_found: AtomicU64,
    rejects: RwLock<HashMap<RejectReason, u64>>,
}

impl PoolMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            connections_open: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            sessions_subscribed: AtomicU64::new(0),
            workers_authorized: AtomicU64::new(0),
            shares_accepted: AtomicU64::new(0),
            blocks_found: AtomicU64::new(0),
            rejects: RwLock::new(HashMap::new()),
        }
    }

    /// A connection was accepted
    pub fn record_connection_opened(&self) {
        self.connections_open.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A connection went away
    pub fn record_connection_closed(&self) {
        decrement(&self.connections_open);
    }

    /// A session completed `mining.subscribe`
    pub fn record_subscribed(&self) {
        self.sessions_subscribed.fetch_add(1, Ordering::Relaxed);
    }

    /// A subscribed session closed
    pub fn record_unsubscribed(&self) {
        decrement(&self.sessions_subscribed);
    }

    /// A worker completed `mining.authorize`
    pub fn record_authorized(&self) {
        self.workers_authorized.fetch_add(1, Ordering::Relaxed);
    }

    /// An authorized session closed
    pub fn record_deauthorized(&self) {
        decrement(&self.workers_authorized);
    }

    /// Record a share outcome
    pub fn record_share(&self, reason: Option<RejectReason>, block_found: bool) {
        match reason {
            None => {
                self.shares_accepted.fetch_add(1, Ordering::Relaxed);
                if block_found {
                    self.blocks_found.fetch_add(1, Ordering::Relaxed);
                }
            }
            Some(reason) => {
                *self.rejects.write().entry(reason).or_insert(0) += 1;
            }
        }
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let rejects = self.rejects.read();
        let shares_rejected = rejects.values().sum();
        let shares_accepted = self.shares_accepted.load(Ordering::Relaxed);
        let total = shares_accepted + shares_rejected;

        MetricsSnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            connections_open: self.connections_open.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            sessions_subscribed: self.sessions_subscribed.load(Ordering::Relaxed),
            workers_authorized: self.workers_authorized.load(Ordering::Relaxed),
            shares_accepted,
            shares_rejected,
            acceptance_rate: if total > 0 {
                shares_accepted as f64 / total as f64
            } else {
                0.0
            },
            blocks_found: self.blocks_found.load(Ordering::Relaxed),
            rejects_by_reason: rejects
                .iter()
                .map(|(reason, count)| (reason.to_string(), *count))
                .collect(),
        }
    }

    /// Emit the current counters at info level
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            connections = s.connections_open,
            subscribed = s.sessions_subscribed,
            authorized = s.workers_authorized,
            accepted = s.shares_accepted,
            rejected = s.shares_rejected,
            blocks = s.blocks_found,
            "Pool status"
        );
    }
}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn decrement(counter: &AtomicU64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
}

/// Serialisable view of [`PoolMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Seconds since the counters were created
    pub uptime_seconds: u64,
    /// Open connections
    pub connections_open: u64,
    /// Connections ever accepted
    pub connections_total: u64,
    /// Sessions past `mining.subscribe`
    pub sessions_subscribed: u64,
    /// Sessions past `mining.authorize`
    pub workers_authorized: u64,
    /// Valid shares
    pub shares_accepted: u64,
    /// Rejected shares
    pub shares_rejected: u64,
    /// Accepted / total, 0.0 before any share
    pub acceptance_rate: f64,
    /// Shares that also met the network target
    pub blocks_found: u64,
    /// Rejections keyed by reason
    pub rejects_by_reason: BTreeMap<String, u64>,
}

static METRICS: OnceLock<Arc<PoolMetrics>> = OnceLock::new();

/// Get the global metrics instance
pub fn global_metrics() -> Arc<PoolMetrics> {
    Arc::clone(METRICS.get_or_init(|| Arc::new(PoolMetrics::new())))
}
