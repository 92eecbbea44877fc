//! Stratum session management
//!
//! A [`MinerSession`] is owned by exactly one connection task and is never
//! shared, so none of its state needs locking. It moves through
//! `Connected -> Subscribed -> Authorized`; submissions are only accepted
//! once authorized.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::Level;
use uuid::Uuid;

use super::auth::{WorkerIdentity, WorkerRegistry};
use super::extranonce::{AllocError, ExtranonceAllocator, ExtranonceLease};
use super::job::{JobId, JobSet};
use crate::core::Target;
use crate::error::{Error, Result};
use crate::log_stratum_event;
use crate::utils::PoolMetrics;

/// Session ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id previously handed out by `mining.subscribe`
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Protocol state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Connection open, nothing negotiated
    Connected,
    /// Extranonce1 assigned
    Subscribed,
    /// Bound to a worker identity
    Authorized,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Subscribed => write!(f, "subscribed"),
            Self::Authorized => write!(f, "authorized"),
        }
    }
}

/// Session transitions that cannot proceed
#[derive(Debug, Error)]
pub enum SessionError {
    /// `mining.subscribe` repeated while resubscription is disabled
    #[error("Already subscribed")]
    AlreadySubscribed,
    /// Operation requires a subscription
    #[error("Not subscribed")]
    NotSubscribed,
    /// No extranonce1 left to hand out
    #[error(transparent)]
    Extranonce(#[from] AllocError),
    /// The worker registry failed
    #[error(transparent)]
    Registry(#[from] Error),
}

/// Result of a successful `mining.subscribe`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Id the miner can present to resume later
    pub session_id: SessionId,
    /// Fixed-width lowercase hex
    pub extranonce1: String,
    /// Bytes of extranonce2 the miner must supply
    pub extranonce2_size: usize,
    /// Whether a parked extranonce1 was taken back
    pub resumed: bool,
}

/// Identity of a share for duplicate detection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShareKey {
    /// Job the share was mined on
    pub job_id: JobId,
    /// Decoded extranonce2
    pub extranonce2: Vec<u8>,
    /// Header time
    pub ntime: u32,
    /// Header nonce
    pub nonce: u32,
}

/// Per-connection mining session
pub struct MinerSession {
    id: SessionId,
    state: SessionState,
    lease: Option<ExtranonceLease>,
    extranonce2_size: usize,
    signature: Option<String>,
    worker: Option<WorkerIdentity>,
    difficulty: f64,
    share_target: Target,
    ledger: HashSet<ShareKey>,
    /// Valid shares
    pub shares_valid: u64,
    /// Rejected shares
    pub shares_rejected: u64,
    /// Last submission time
    pub last_share_time: Option<Instant>,
    connected_at: Instant,
    metrics: Arc<PoolMetrics>,
}

impl MinerSession {
    /// Create a new session in the `Connected` state
    pub fn new(extranonce2_size: usize, difficulty: f64, metrics: Arc<PoolMetrics>) -> Result<Self> {
        let share_target = Target::from_difficulty(difficulty)?;
        Ok(Self {
            id: SessionId::new(),
            state: SessionState::Connected,
            lease: None,
            extranonce2_size,
            signature: None,
            worker: None,
            difficulty,
            share_target,
            ledger: HashSet::new(),
            shares_valid: 0,
            shares_rejected: 0,
            last_share_time: None,
            connected_at: Instant::now(),
            metrics,
        })
    }

    /// Session id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current protocol state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether shares may be submitted
    pub fn is_authorized(&self) -> bool {
        self.state == SessionState::Authorized
    }

    /// Whether `mining.subscribe` has succeeded
    pub fn is_subscribed(&self) -> bool {
        self.state >= SessionState::Subscribed
    }

    /// Assigned extranonce1
    pub fn extranonce1(&self) -> Option<&ExtranonceLease> {
        self.lease.as_ref()
    }

    /// Negotiated extranonce2 width in bytes
    pub fn extranonce2_size(&self) -> usize {
        self.extranonce2_size
    }

    /// Miner software string sent with `mining.subscribe`
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// Bound worker, once authorized
    pub fn worker(&self) -> Option<&WorkerIdentity> {
        self.worker.as_ref()
    }

    /// Pool difficulty shares are credited at
    pub fn difficulty(&self) -> f64 {
        self.difficulty
    }

    /// Target derived from [`difficulty`](Self::difficulty)
    pub fn share_target(&self) -> &Target {
        &self.share_target
    }

    /// Time since the connection opened
    pub fn age(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }

    /// Change the pool difficulty for subsequent shares
    pub fn set_difficulty(&mut self, difficulty: f64) -> Result<()> {
        self.share_target = Target::from_difficulty(difficulty)?;
        self.difficulty = difficulty;
        Ok(())
    }

    /// Assign (or resume) an extranonce1
    pub fn subscribe(
        &mut self,
        allocator: &ExtranonceAllocator,
        signature: Option<&str>,
        resume: Option<SessionId>,
        allow_resubscribe: bool,
    ) -> std::result::Result<Subscription, SessionError> {
        if let Some(lease) = self.lease.as_ref().filter(|_| self.is_subscribed()) {
            if !allow_resubscribe {
                return Err(SessionError::AlreadySubscribed);
            }
            return Ok(Subscription {
                session_id: self.id,
                extranonce1: lease.to_hex(),
                extranonce2_size: self.extranonce2_size,
                resumed: false,
            });
        }

        let resumed = resume.and_then(|id| allocator.resume(&id).map(|lease| (id, lease)));
        let (lease, was_resumed) = match resumed {
            Some((id, lease)) => {
                self.id = id;
                (lease, true)
            }
            None => (allocator.acquire()?, false),
        };

        let subscription = Subscription {
            session_id: self.id,
            extranonce1: lease.to_hex(),
            extranonce2_size: self.extranonce2_size,
            resumed: was_resumed,
        };
        self.lease = Some(lease);
        self.signature = signature.map(str::to_string);
        self.state = SessionState::Subscribed;
        self.metrics.record_subscribed();

        log_stratum_event!(
            Level::INFO,
            self.id,
            "Session subscribed",
            extranonce1 => subscription.extranonce1,
            resumed => was_resumed,
            agent => self.signature.as_deref().unwrap_or("-"),
        );
        Ok(subscription)
    }

    /// Check credentials and bind the session to a worker
    ///
    /// Bad credentials return `Ok(false)` and leave the state unchanged.
    pub async fn authorize(
        &mut self,
        registry: &dyn WorkerRegistry,
        username: &str,
        password: &str,
    ) -> std::result::Result<bool, SessionError> {
        if !self.is_subscribed() {
            return Err(SessionError::NotSubscribed);
        }

        let Some(identity) = registry.authenticate(username, password).await? else {
            log_stratum_event!(Level::WARN, self.id, "Authorization failed", user => username);
            return Ok(false);
        };

        if !self.is_authorized() {
            self.metrics.record_authorized();
        }
        log_stratum_event!(Level::INFO, self.id, "Worker authorized", worker => identity);
        self.worker = Some(identity);
        self.state = SessionState::Authorized;
        Ok(true)
    }

    /// Whether this exact share was already accepted
    pub fn has_submitted(&self, key: &ShareKey) -> bool {
        self.ledger.contains(key)
    }

    /// Remember an accepted share
    pub fn record_share(&mut self, key: ShareKey) {
        self.ledger.insert(key);
    }

    /// Forget shares for jobs no longer addressable
    pub fn prune_ledger(&mut self, jobs: &JobSet) -> usize {
        let before = self.ledger.len();
        self.ledger.retain(|key| jobs.contains(&key.job_id));
        before - self.ledger.len()
    }

    /// Number of remembered shares
    pub fn ledger_len(&self) -> usize {
        self.ledger.len()
    }

    /// Update share counters
    pub fn note_share(&mut self, valid: bool) {
        if valid {
            self.shares_valid += 1;
        } else {
            self.shares_rejected += 1;
        }
        self.last_share_time = Some(Instant::now());
    }

    /// End the session, keeping its extranonce1 reserved for resumption
    pub fn close(mut self, allocator: &ExtranonceAllocator) {
        if let Some(lease) = self.lease.take() {
            log_stratum_event!(Level::DEBUG, self.id, "Parking extranonce1", extranonce1 => lease.to_hex());
            allocator.park(self.id, lease);
        }
    }
}

impl Drop for MinerSession {
    fn drop(&mut self) {
        if self.is_subscribed() {
            self.metrics.record_unsubscribed();
        }
        if self.is_authorized() {
            self.metrics.record_deauthorized();
        }
    }
}

impl std::fmt::Debug for MinerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinerSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("extranonce1", &self.lease)
            .field("worker", &self.worker)
            .field("difficulty", &self.difficulty)
            .finish()
    }
}
