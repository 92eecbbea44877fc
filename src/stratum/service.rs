//! RPC entry points bound to a session
//!
//! [`StratumService`] owns the shared pool state (jobs, extranonce space,
//! worker registry) and routes each call to the session passed in. It holds
//! no per-connection state of its own.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::auth::{OpenRegistry, StaticRegistry, WorkerRegistry};
use super::extranonce::ExtranonceAllocator;
use super::job::JobRegistry;
use super::protocol::{StratumErrorCode, StratumMethod, StratumRequest, StratumResponse};
use super::session::{MinerSession, SessionError, SessionId, Subscription};
use super::share::{RejectReason, ShareResult, ShareSubmission, ShareValidator};
use crate::config::{AuthMode, Config};
use crate::error::Result;
use crate::utils::PoolMetrics;

/// Protocol-facing pool core
pub struct StratumService {
    jobs: Arc<JobRegistry>,
    allocator: Arc<ExtranonceAllocator>,
    registry: Arc<dyn WorkerRegistry>,
    validator: ShareValidator,
    metrics: Arc<PoolMetrics>,
    share_tx: Option<mpsc::Sender<ShareResult>>,
    extranonce2_size: usize,
    initial_difficulty: f64,
    allow_resubscribe: bool,
}

impl StratumService {
    /// Build the service and its shared state from configuration
    pub fn new(
        config: &Config,
        registry: Arc<dyn WorkerRegistry>,
        metrics: Arc<PoolMetrics>,
    ) -> Self {
        let jobs = Arc::new(JobRegistry::new(
            config.jobs.grace_period(),
            config.jobs.max_jobs,
        ));
        // A reused extranonce1 must not reach a job its previous owner
        // could still submit to.
        let allocator = Arc::new(
            ExtranonceAllocator::new(
                config.stratum.extranonce1_size,
                config
                    .stratum
                    .extranonce_cooldown()
                    .max(config.jobs.grace_period()),
                config.stratum.session_resume_ttl(),
            )
            .with_jobs(Arc::clone(&jobs)),
        );
        Self {
            validator: ShareValidator::new(Arc::clone(&jobs), config.jobs.ntime_forward_drift()),
            jobs,
            allocator,
            registry,
            metrics,
            share_tx: None,
            extranonce2_size: config.stratum.extranonce2_size,
            initial_difficulty: config.stratum.initial_difficulty,
            allow_resubscribe: config.stratum.allow_resubscribe,
        }
    }

    /// Worker registry selected by `[auth]`
    pub fn registry_from_config(config: &Config) -> Arc<dyn WorkerRegistry> {
        match config.auth.mode {
            AuthMode::Open => Arc::new(OpenRegistry),
            AuthMode::Static => Arc::new(StaticRegistry::new(config.auth.accounts.clone())),
        }
    }

    /// Forward every share outcome to `tx`
    pub fn with_share_sink(mut self, tx: mpsc::Sender<ShareResult>) -> Self {
        self.share_tx = Some(tx);
        self
    }

    /// Live job registry
    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.jobs
    }

    /// Extranonce1 arena
    pub fn allocator(&self) -> &Arc<ExtranonceAllocator> {
        &self.allocator
    }

    /// Telemetry sink
    pub fn metrics(&self) -> &Arc<PoolMetrics> {
        &self.metrics
    }

    /// Start a session for a new connection
    pub fn open_session(&self) -> Result<MinerSession> {
        MinerSession::new(
            self.extranonce2_size,
            self.initial_difficulty,
            Arc::clone(&self.metrics),
        )
    }

    /// End a session, parking its extranonce1 for resumption
    pub fn close_session(&self, session: MinerSession) {
        session.close(&self.allocator);
    }

    /// `mining.subscribe(signature?, session_id?)`
    pub fn subscribe(
        &self,
        session: &mut MinerSession,
        signature: Option<&str>,
        session_id: Option<&str>,
    ) -> std::result::Result<Subscription, SessionError> {
        let resume = session_id.and_then(SessionId::parse);
        session.subscribe(&self.allocator, signature, resume, self.allow_resubscribe)
    }

    /// `mining.authorize(user, password)`
    pub async fn authorize(
        &self,
        session: &mut MinerSession,
        username: &str,
        password: &str,
    ) -> std::result::Result<bool, SessionError> {
        session
            .authorize(self.registry.as_ref(), username, password)
            .await
    }

    /// `mining.submit`; `true` only for a valid share
    pub async fn submit(&self, session: &mut MinerSession, submission: &ShareSubmission) -> bool {
        self.submit_share(session, submission).await.valid
    }

    /// Validate a share and report the full outcome
    pub async fn submit_share(
        &self,
        session: &mut MinerSession,
        submission: &ShareSubmission,
    ) -> ShareResult {
        let result = self.validator.validate(session, submission);
        self.metrics.record_share(result.reason, result.block_found);

        if let Some(tx) = &self.share_tx {
            if tx.send(result.clone()).await.is_err() {
                warn!(session = %session.id(), "Share sink closed, outcome dropped");
            }
        }
        result
    }

    /// Evict expired jobs and reclaim cooled extranonces
    pub fn housekeeping(&self) -> (usize, usize) {
        let evicted = self.jobs.evict_expired();
        let reclaimed = self.allocator.reclaim();
        if evicted > 0 || reclaimed > 0 {
            debug!(evicted, reclaimed, "Housekeeping");
        }
        (evicted, reclaimed)
    }

    /// Answer one client request
    pub async fn handle_request(
        &self,
        session: &mut MinerSession,
        req: &StratumRequest,
    ) -> StratumResponse {
        let id = req.id.clone();
        match req.method_enum() {
            StratumMethod::Subscribe => {
                match self.subscribe(session, req.str_param(0), req.str_param(1)) {
                    Ok(sub) => StratumResponse::success(id, subscribe_result(&sub)),
                    Err(e) => session_error_response(id, e),
                }
            }

            StratumMethod::Authorize => {
                let Some(username) = req.str_param(0) else {
                    return StratumResponse::error(id, StratumErrorCode::Other.code(), "Missing username");
                };
                let password = req.str_param(1).unwrap_or("");
                match self.authorize(session, username, password).await {
                    Ok(true) => StratumResponse::success(id, Value::Bool(true)),
                    // Bad credentials are an answer, not an error
                    Ok(false) => StratumResponse::success(id, Value::Bool(false)),
                    Err(e) => session_error_response(id, e),
                }
            }

            StratumMethod::Submit => {
                let Some(submission) = ShareSubmission::from_params(&req.params) else {
                    let reason = RejectReason::MalformedInput;
                    self.metrics.record_share(Some(reason), false);
                    return StratumResponse::rejected(
                        id,
                        reason.error_code().code(),
                        "Invalid submit parameters",
                    );
                };
                let result = self.submit_share(session, &submission).await;
                match result.reason {
                    None => StratumResponse::success(id, Value::Bool(true)),
                    Some(reason) => {
                        StratumResponse::rejected(id, reason.error_code().code(), &reason.to_string())
                    }
                }
            }

            StratumMethod::ExtranonceSubscribe => StratumResponse::success(id, Value::Bool(true)),

            _ => StratumResponse::error(id, StratumErrorCode::Other.code(), "Method not supported"),
        }
    }
}

/// `[[["mining.set_difficulty", id], ["mining.notify", id]], extranonce1, extranonce2_size]`
pub fn subscribe_result(sub: &Subscription) -> Value {
    let session_id = sub.session_id.to_string();
    json!([
        [
            ["mining.set_difficulty", session_id],
            ["mining.notify", session_id]
        ],
        sub.extranonce1,
        sub.extranonce2_size
    ])
}

fn session_error_response(id: Value, err: SessionError) -> StratumResponse {
    match err {
        SessionError::AlreadySubscribed => {
            StratumResponse::error(id, StratumErrorCode::Other.code(), "Already subscribed")
        }
        SessionError::NotSubscribed => {
            StratumResponse::error_with_code(id, StratumErrorCode::NotSubscribed)
        }
        SessionError::Extranonce(e) => {
            error!(error = %e, "Cannot assign extranonce1");
            StratumResponse::error(id, StratumErrorCode::Other.code(), "Pool is full")
        }
        SessionError::Registry(e) => {
            error!(error = %e, "Worker registry unavailable");
            StratumResponse::error(id, StratumErrorCode::Other.code(), "Authorization unavailable")
        }
    }
}

impl std::fmt::Debug for StratumService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StratumService")
            .field("jobs", &self.jobs)
            .field("allocator", &self.allocator)
            .field("extranonce2_size", &self.extranonce2_size)
            .field("initial_difficulty", &self.initial_difficulty)
            .finish()
    }
}
