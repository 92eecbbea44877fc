//! Share validation
//!
//! [`ShareValidator`] rebuilds the candidate block from a submission and the
//! job it names, then classifies it. Every rejection is a terminal outcome
//! carried in the [`ShareResult`]; nothing here returns `Err`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::auth::WorkerIdentity;
use super::hex::{decode_hex_exact, parse_u32_be};
use super::job::{Job, JobId, JobLookupError, JobRegistry};
use super::protocol::StratumErrorCode;
use super::session::{MinerSession, ShareKey};
use crate::core::cuckoo::{self, SipKeys};
use crate::core::{reversed, sha256d, BlockHeader, Hash256, PowAlgorithm};
use crate::utils::unix_time;

/// Why a share was not credited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    /// A field had the wrong length or encoding
    MalformedInput,
    /// Session not authorized
    NotAuthorized,
    /// Unknown or evicted job
    JobNotFound,
    /// Job past its grace window, or nTime out of range
    StaleShare,
    /// Same share already accepted on this session
    DuplicateShare,
    /// Hash above the session target
    LowDifficultyShare,
    /// Cycle proof does not verify
    InvalidProof,
}

impl RejectReason {
    /// Stratum error code reported to the miner
    pub fn error_code(self) -> StratumErrorCode {
        match self {
            Self::MalformedInput | Self::InvalidProof => StratumErrorCode::Other,
            Self::NotAuthorized => StratumErrorCode::UnauthorizedWorker,
            Self::JobNotFound | Self::StaleShare => StratumErrorCode::JobNotFound,
            Self::DuplicateShare => StratumErrorCode::DuplicateShare,
            Self::LowDifficultyShare => StratumErrorCode::LowDifficultyShare,
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::MalformedInput => "Malformed input",
            Self::NotAuthorized => "Unauthorized worker",
            Self::JobNotFound => "Job not found",
            Self::StaleShare => "Stale share",
            Self::DuplicateShare => "Duplicate share",
            Self::LowDifficultyShare => "Low difficulty share",
            Self::InvalidProof => "Invalid proof",
        };
        f.write_str(msg)
    }
}

/// Raw `mining.submit` fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareSubmission {
    /// Worker name as sent
    pub worker: String,
    /// Job id
    pub job_id: String,
    /// Extranonce2, hex
    pub extranonce2: String,
    /// Header time, big-endian hex
    pub ntime: String,
    /// Header nonce, big-endian hex
    pub nonce: String,
    /// Comma-separated hex edges for cycle proof-of-work
    pub cycle: Option<String>,
}

impl ShareSubmission {
    /// Read `[worker, job_id, extranonce2, ntime, nonce, cycle?]`
    pub fn from_params(params: &[Value]) -> Option<Self> {
        let field = |i: usize| params.get(i).and_then(Value::as_str).map(str::to_string);
        Some(Self {
            worker: field(0)?,
            job_id: field(1)?,
            extranonce2: field(2)?,
            ntime: field(3)?,
            nonce: field(4)?,
            cycle: field(5),
        })
    }
}

/// Block candidate assembled from a share that met the network target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundBlock {
    /// Height of the block
    pub height: u64,
    /// Serialized 80-byte header
    pub header: Vec<u8>,
    /// Full coinbase transaction
    pub coinbase: Vec<u8>,
    /// Cycle proof, for cycle proof-of-work
    pub cycle: Option<Vec<u32>>,
    /// Proof-of-work hash, internal byte order
    pub hash: Hash256,
}

impl FoundBlock {
    /// Hash in display byte order
    pub fn hash_hex(&self) -> String {
        hex::encode(reversed(&self.hash))
    }
}

/// Outcome of validating one share
#[derive(Debug, Clone, PartialEq)]
pub struct ShareResult {
    /// Credited as a share
    pub valid: bool,
    /// Why not, when invalid
    pub reason: Option<RejectReason>,
    /// Proof-of-work hash, once computed
    pub hash: Option<Hash256>,
    /// Also met the network target
    pub block_found: bool,
    /// Job named by the share
    pub job_id: Option<JobId>,
    /// Worker the share is credited to
    pub worker: Option<WorkerIdentity>,
    /// Session difficulty at submission
    pub difficulty: f64,
    /// Block candidate when `block_found`
    pub block: Option<FoundBlock>,
}

impl ShareResult {
    fn rejected(reason: RejectReason, session: &MinerSession) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            hash: None,
            block_found: false,
            job_id: None,
            worker: session.worker().cloned(),
            difficulty: session.difficulty(),
            block: None,
        }
    }

    fn with_job(mut self, job_id: &JobId) -> Self {
        self.job_id = Some(job_id.clone());
        self
    }

    fn with_hash(mut self, hash: Hash256) -> Self {
        self.hash = Some(hash);
        self
    }
}

/// Classifies submissions against the live jobs
#[derive(Debug, Clone)]
pub struct ShareValidator {
    jobs: Arc<JobRegistry>,
    ntime_forward_drift: Duration,
}

impl ShareValidator {
    /// Create a validator over `jobs`
    pub fn new(jobs: Arc<JobRegistry>, ntime_forward_drift: Duration) -> Self {
        Self {
            jobs,
            ntime_forward_drift,
        }
    }

    /// Validate against the current clock
    pub fn validate(&self, session: &mut MinerSession, submission: &ShareSubmission) -> ShareResult {
        self.validate_at(session, submission, Instant::now(), unix_time())
    }

    /// Validate at an explicit instant and Unix time
    pub fn validate_at(
        &self,
        session: &mut MinerSession,
        submission: &ShareSubmission,
        now: Instant,
        now_unix: u32,
    ) -> ShareResult {
        let result = self.classify(session, submission, now, now_unix);
        session.note_share(result.valid);
        match result.reason {
            Some(reason) => debug!(
                session = %session.id(),
                job_id = %submission.job_id,
                %reason,
                "Share rejected"
            ),
            None if result.block_found => {
                let hash = result
                    .block
                    .as_ref()
                    .map(FoundBlock::hash_hex)
                    .unwrap_or_default();
                info!(
                    session = %session.id(),
                    job_id = %submission.job_id,
                    %hash,
                    "Block candidate found"
                )
            }
            None => debug!(session = %session.id(), job_id = %submission.job_id, "Share accepted"),
        }
        result
    }

    fn classify(
        &self,
        session: &mut MinerSession,
        submission: &ShareSubmission,
        now: Instant,
        now_unix: u32,
    ) -> ShareResult {
        use RejectReason::*;

        // Preconditions, all before any hashing
        if !session.is_authorized() {
            return ShareResult::rejected(NotAuthorized, session);
        }
        let Some(extranonce1) = session.extranonce1().map(|lease| lease.to_bytes()) else {
            return ShareResult::rejected(NotAuthorized, session);
        };
        let Ok(extranonce2) = decode_hex_exact(&submission.extranonce2, session.extranonce2_size())
        else {
            return ShareResult::rejected(MalformedInput, session);
        };
        let (Ok(ntime), Ok(nonce)) = (parse_u32_be(&submission.ntime), parse_u32_be(&submission.nonce))
        else {
            return ShareResult::rejected(MalformedInput, session);
        };

        // 1-2. Resolve the named job and check freshness
        let job_id = JobId::from(submission.job_id.as_str());
        let job = match self.jobs.resolve_at(&job_id, now) {
            Ok(job) => job,
            Err(JobLookupError::NotFound) => return ShareResult::rejected(JobNotFound, session),
            Err(JobLookupError::Stale) => {
                return ShareResult::rejected(StaleShare, session).with_job(&job_id)
            }
        };
        let latest = u64::from(now_unix) + self.ntime_forward_drift.as_secs();
        if ntime < job.time || u64::from(ntime) > latest {
            return ShareResult::rejected(StaleShare, session).with_job(&job_id);
        }

        let cycle = match job.pow {
            PowAlgorithm::Sha256d => None,
            PowAlgorithm::CuckooCycle { .. } => {
                match submission.cycle.as_deref().and_then(cuckoo::parse_cycle) {
                    Some(edges) => Some(edges),
                    None => return ShareResult::rejected(MalformedInput, session).with_job(&job_id),
                }
            }
        };

        // 3-5. Coinbase, Merkle root, header, proof-of-work hash
        let coinbase = job.coinbase(&extranonce1, &extranonce2);
        let header = candidate_header(&job, &coinbase, ntime, nonce);
        let hash = match (job.pow, &cycle) {
            (
                PowAlgorithm::CuckooCycle {
                    edge_bits,
                    proof_size,
                },
                Some(edges),
            ) => {
                let keys = SipKeys::from_header(&cycle_header_bytes(&header, edge_bits));
                if let Err(e) = cuckoo::verify(edges, &keys, edge_bits, proof_size) {
                    debug!(session = %session.id(), error = %e, "Cycle proof rejected");
                    return ShareResult::rejected(InvalidProof, session).with_job(&job_id);
                }
                sha256d(&cuckoo::cycle_bytes(edges))
            }
            _ => header.hash(),
        };

        // 6. Duplicate
        let key = ShareKey {
            job_id: job_id.clone(),
            extranonce2,
            ntime,
            nonce,
        };
        if session.has_submitted(&key) {
            return ShareResult::rejected(DuplicateShare, session)
                .with_job(&job_id)
                .with_hash(hash);
        }

        // 7. Pool target
        if !session.share_target().is_met_by(&hash) {
            return ShareResult::rejected(LowDifficultyShare, session)
                .with_job(&job_id)
                .with_hash(hash);
        }

        // 8. Network target
        let block = job.network_target.is_met_by(&hash).then(|| FoundBlock {
            height: job.height,
            header: header.serialize().to_vec(),
            coinbase,
            cycle,
            hash,
        });

        // 9. Remember and accept
        session.record_share(key);
        ShareResult {
            valid: true,
            reason: None,
            hash: Some(hash),
            block_found: block.is_some(),
            job_id: Some(job_id),
            worker: session.worker().cloned(),
            difficulty: session.difficulty(),
            block,
        }
    }
}

/// Header for a coinbase and the submitted time and nonce
pub fn candidate_header(job: &Job, coinbase: &[u8], ntime: u32, nonce: u32) -> BlockHeader {
    BlockHeader {
        version: job.version,
        prev_hash: job.prev_hash,
        merkle_root: job.merkle.with_first(&sha256d(coinbase)),
        time: ntime,
        bits: job.bits,
        nonce,
    }
}

/// Header bytes the cycle keys are derived from
pub fn cycle_header_bytes(header: &BlockHeader, edge_bits: u8) -> Vec<u8> {
    let mut bytes = header.serialize().to_vec();
    bytes.push(edge_bits);
    bytes
}
