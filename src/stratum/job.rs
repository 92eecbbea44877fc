//! Jobs and the live job registry
//!
//! A [`Job`] is an immutable unit of work. The [`JobRegistry`] keeps the
//! current job plus recently superseded ones in a snapshot that is swapped
//! atomically on every publish. Validators read snapshots without locking;
//! the single writer (the job feed and housekeeping) is serialised by a mutex.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::core::{hash_from_hex, reversed, Hash256, MerkleTree, PowAlgorithm, Target};
use crate::error::{Error, Result};

/// Job identifier, lowercase hex of a process-wide sequence number
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Create a new job ID from integer
    pub fn new(id: u64) -> Self {
        JobId(format!("{:x}", id))
    }

    /// Get the job ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One broadcastable unit of work
#[derive(Debug, Clone)]
pub struct Job {
    /// Job identifier
    pub id: JobId,
    /// Previous block hash, internal byte order
    pub prev_hash: Hash256,
    /// Coinbase bytes before the extranonces
    pub coinbase1: Vec<u8>,
    /// Coinbase bytes after the extranonces
    pub coinbase2: Vec<u8>,
    /// Steps for the coinbase Merkle path
    pub merkle: MerkleTree,
    /// Block version
    pub version: u32,
    /// Compact network target
    pub bits: u32,
    /// Earliest acceptable nTime
    pub time: u32,
    /// Height of the block being mined
    pub height: u64,
    /// Hash threshold for a full block
    pub network_target: Target,
    /// Proof-of-work scheme
    pub pow: PowAlgorithm,
    /// Creation instant
    pub created_at: Instant,
    /// Previous jobs should be abandoned immediately
    pub clean_jobs: bool,
}

impl Job {
    /// Coinbase transaction bytes for a pair of extranonces
    pub fn coinbase(&self, extranonce1: &[u8], extranonce2: &[u8]) -> Vec<u8> {
        let mut tx = Vec::with_capacity(
            self.coinbase1.len() + extranonce1.len() + extranonce2.len() + self.coinbase2.len(),
        );
        tx.extend_from_slice(&self.coinbase1);
        tx.extend_from_slice(extranonce1);
        tx.extend_from_slice(extranonce2);
        tx.extend_from_slice(&self.coinbase2);
        tx
    }

    /// Previous hash as miners expect it: internal order, each 32-bit word byte-swapped
    pub fn notify_prev_hash(&self) -> String {
        let mut swapped = self.prev_hash;
        for word in swapped.chunks_exact_mut(4) {
            word.reverse();
        }
        hex::encode(swapped)
    }

    /// Parameters of `mining.notify`
    pub fn to_notify_params(&self) -> Vec<Value> {
        vec![
            Value::String(self.id.to_string()),
            Value::String(self.notify_prev_hash()),
            Value::String(hex::encode(&self.coinbase1)),
            Value::String(hex::encode(&self.coinbase2)),
            Value::Array(
                self.merkle
                    .branches()
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            ),
            Value::String(format!("{:08x}", self.version)),
            Value::String(format!("{:08x}", self.bits)),
            Value::String(format!("{:08x}", self.time)),
            Value::Bool(self.clean_jobs),
        ]
    }
}

/// Finished work produced by the external job builder
///
/// Hashes use display (RPC) byte order, as a daemon reports them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    /// Block height
    pub height: u64,
    /// Previous block hash
    pub previous_block_hash: String,
    /// Coinbase prefix, hex
    pub coinbase1: String,
    /// Coinbase suffix, hex
    pub coinbase2: String,
    /// Non-coinbase transaction hashes in block order
    #[serde(default)]
    pub transactions: Vec<String>,
    /// Block version
    pub version: u32,
    /// Compact target, hex
    pub bits: String,
    /// Template timestamp
    pub time: u32,
    /// Explicit network target, big-endian hex; derived from `bits` when absent
    #[serde(default)]
    pub target: Option<String>,
    /// Proof-of-work scheme
    #[serde(default)]
    pub pow: PowAlgorithm,
    /// Abandon earlier jobs immediately
    #[serde(default)]
    pub clean_jobs: bool,
}

impl JobTemplate {
    /// Turn the template into a job with the given id
    pub fn into_job(self, id: JobId) -> Result<Job> {
        let prev_hash = hash_from_hex(&self.previous_block_hash)
            .map(|h| reversed(&h))
            .ok_or_else(|| Error::invalid_job("previous_block_hash must be 32 bytes of hex"))?;

        let leaves = self
            .transactions
            .iter()
            .map(|tx| {
                hash_from_hex(tx)
                    .map(|h| reversed(&h))
                    .ok_or_else(|| Error::invalid_job(format!("Invalid transaction hash: {}", tx)))
            })
            .collect::<Result<Vec<_>>>()?;

        let bits = u32::from_str_radix(&self.bits, 16)
            .map_err(|e| Error::invalid_job(format!("Invalid bits {}: {}", self.bits, e)))?;
        let network_target = match &self.target {
            Some(target) => Target::from_hex(target)?,
            None => Target::from_compact(bits)?,
        };

        let coinbase1 = hex::decode(&self.coinbase1)
            .map_err(|e| Error::invalid_job(format!("Invalid coinbase1: {}", e)))?;
        let coinbase2 = hex::decode(&self.coinbase2)
            .map_err(|e| Error::invalid_job(format!("Invalid coinbase2: {}", e)))?;

        if let PowAlgorithm::CuckooCycle {
            edge_bits,
            proof_size,
        } = self.pow
        {
            if edge_bits == 0 || edge_bits > crate::core::cuckoo::MAX_EDGE_BITS || proof_size == 0
            {
                return Err(Error::invalid_job(format!(
                    "Unsupported cycle parameters: edge_bits {}, proof_size {}",
                    edge_bits, proof_size
                )));
            }
        }

        Ok(Job {
            id,
            prev_hash,
            coinbase1,
            coinbase2,
            merkle: MerkleTree::new(&leaves),
            version: self.version,
            bits,
            time: self.time,
            height: self.height,
            network_target,
            pow: self.pow,
            created_at: Instant::now(),
            clean_jobs: self.clean_jobs,
        })
    }
}

/// Why a job id did not resolve to usable work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobLookupError {
    /// Never published or already evicted
    NotFound,
    /// Superseded and past its grace window
    Stale,
}

#[derive(Debug, Clone)]
struct JobEntry {
    job: Arc<Job>,
    /// Publish order, starting at zero
    seq: u64,
    /// `None` while current
    expires_at: Option<Instant>,
}

impl JobEntry {
    fn is_stale(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// Immutable view of the live jobs, oldest first
#[derive(Debug, Clone, Default)]
pub struct JobSet {
    entries: Vec<JobEntry>,
    published: u64,
}

impl JobSet {
    /// Number of jobs still addressable
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no job has been published yet (or all were evicted)
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `id` is still addressable (possibly stale)
    pub fn contains(&self, id: &JobId) -> bool {
        self.entries.iter().any(|e| &e.job.id == id)
    }

    /// The job being broadcast
    pub fn current(&self) -> Option<&Arc<Job>> {
        self.entries
            .last()
            .filter(|e| e.expires_at.is_none())
            .map(|e| &e.job)
    }

    /// Jobs published so far
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Publish sequence of the oldest job still accepting shares
    ///
    /// Every job published before this number is stale or evicted. Equals
    /// [`published`](Self::published) when no job accepts shares.
    pub fn live_floor(&self, now: Instant) -> u64 {
        self.entries
            .iter()
            .filter(|e| !e.is_stale(now))
            .map(|e| e.seq)
            .min()
            .unwrap_or(self.published)
    }
}

/// Current and recently superseded jobs
pub struct JobRegistry {
    snapshot: ArcSwap<JobSet>,
    writer: Mutex<()>,
    counter: AtomicU64,
    grace_period: Duration,
    max_jobs: usize,
}

impl JobRegistry {
    /// Create an empty registry
    pub fn new(grace_period: Duration, max_jobs: usize) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(JobSet::default()),
            writer: Mutex::new(()),
            counter: AtomicU64::new(0),
            grace_period,
            max_jobs: max_jobs.max(1),
        }
    }

    /// Next unused job id
    pub fn next_id(&self) -> JobId {
        JobId::new(self.counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Build a job from a template and publish it
    pub fn publish_template(&self, template: JobTemplate) -> Result<Arc<Job>> {
        let job = template.into_job(self.next_id())?;
        Ok(self.publish(job))
    }

    /// Make `job` current, superseding the previous one
    pub fn publish(&self, job: Job) -> Arc<Job> {
        self.publish_at(job, Instant::now())
    }

    /// [`publish`](Self::publish) at an explicit instant
    pub fn publish_at(&self, job: Job, now: Instant) -> Arc<Job> {
        let _guard = self.writer.lock();
        let current = self.snapshot.load_full();
        let job = Arc::new(job);

        let stale_at = if job.clean_jobs {
            now
        } else {
            now + self.grace_period
        };
        let mut entries: Vec<JobEntry> = current
            .entries
            .iter()
            .map(|entry| {
                let expires_at = match entry.expires_at {
                    None => stale_at,
                    Some(at) => at.min(stale_at),
                };
                JobEntry {
                    job: Arc::clone(&entry.job),
                    seq: entry.seq,
                    expires_at: Some(expires_at),
                }
            })
            .collect();
        entries.push(JobEntry {
            job: Arc::clone(&job),
            seq: current.published,
            expires_at: None,
        });

        if entries.len() > self.max_jobs {
            let excess = entries.len() - self.max_jobs;
            entries.drain(..excess);
        }

        debug!(
            job_id = %job.id,
            height = job.height,
            clean = job.clean_jobs,
            live = entries.len(),
            "Published job"
        );
        self.snapshot.store(Arc::new(JobSet {
            entries,
            published: current.published + 1,
        }));
        job
    }

    /// Look up the job a share names
    pub fn resolve(&self, id: &JobId) -> std::result::Result<Arc<Job>, JobLookupError> {
        self.resolve_at(id, Instant::now())
    }

    /// [`resolve`](Self::resolve) at an explicit instant
    pub fn resolve_at(
        &self,
        id: &JobId,
        now: Instant,
    ) -> std::result::Result<Arc<Job>, JobLookupError> {
        let snapshot = self.snapshot.load();
        let entry = snapshot
            .entries
            .iter()
            .find(|e| &e.job.id == id)
            .ok_or(JobLookupError::NotFound)?;
        if entry.is_stale(now) {
            return Err(JobLookupError::Stale);
        }
        Ok(Arc::clone(&entry.job))
    }

    /// Drop jobs that have been stale for a further grace period
    ///
    /// Returns the number of evicted jobs.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    /// [`evict_expired`](Self::evict_expired) at an explicit instant
    pub fn evict_expired_at(&self, now: Instant) -> usize {
        let _guard = self.writer.lock();
        let current = self.snapshot.load_full();
        let grace = self.grace_period;
        let entries: Vec<JobEntry> = current
            .entries
            .iter()
            .filter(|e| e.expires_at.map_or(true, |at| at + grace > now))
            .cloned()
            .collect();

        let evicted = current.entries.len() - entries.len();
        if evicted > 0 {
            debug!(evicted, live = entries.len(), "Evicted expired jobs");
            self.snapshot.store(Arc::new(JobSet {
                entries,
                published: current.published,
            }));
        }
        evicted
    }

    /// The job being broadcast
    pub fn current(&self) -> Option<Arc<Job>> {
        self.snapshot.load().current().cloned()
    }

    /// Jobs published so far
    pub fn published(&self) -> u64 {
        self.snapshot.load().published()
    }

    /// See [`JobSet::live_floor`]
    pub fn live_floor(&self, now: Instant) -> u64 {
        self.snapshot.load().live_floor(now)
    }

    /// Current snapshot of all live jobs
    pub fn snapshot(&self) -> Arc<JobSet> {
        self.snapshot.load_full()
    }

    /// Whether `id` is still addressable
    pub fn contains(&self, id: &JobId) -> bool {
        self.snapshot.load().contains(id)
    }

    /// Number of addressable jobs
    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    /// Whether no job is addressable
    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("live", &self.len())
            .field("grace_period", &self.grace_period)
            .field("max_jobs", &self.max_jobs)
            .finish()
    }
}
