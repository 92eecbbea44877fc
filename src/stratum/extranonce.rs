//! Extranonce1 allocation
//!
//! Every live session owns a distinct extranonce1 drawn from a bounded space
//! of `2^(8 * size)` values. A value leaves the space when leased and only
//! returns after its lease is dropped *and* a cool-down has elapsed, so shares
//! still in flight for a closed session can never be credited to a new one.
//!
//! A disconnected session may park its lease. The value then stays reserved
//! until either the session resumes or the resume TTL expires.
//!
//! When bound to a [`JobRegistry`], a released value also waits until every
//! job published while it was held has gone stale. Otherwise a new owner of
//! the same extranonce1 could replay the old owner's shares on a job that is
//! still accepting them.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::job::JobRegistry;
use super::session::SessionId;

/// Largest extranonce1 width in bytes
pub const MAX_EXTRANONCE1_SIZE: u8 = 4;

/// Allocation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Every value is leased, parked or cooling down
    #[error("extranonce1 space exhausted ({0} values)")]
    SpaceExhausted(u64),
}

/// A released value waiting to become free
#[derive(Debug, Clone, Copy)]
struct Cooling {
    ready_at: Instant,
    /// Jobs published when the value was released
    epoch: u64,
}

impl Cooling {
    fn is_ready(&self, now: Instant, horizon: u64) -> bool {
        self.ready_at <= now && self.epoch <= horizon
    }
}

#[derive(Debug)]
struct Parked {
    value: u32,
    expires_at: Instant,
    epoch: u64,
}

#[derive(Debug, Default)]
struct AllocatorState {
    in_use: HashSet<u32>,
    cooling: HashMap<u32, Cooling>,
    parked: HashMap<SessionId, Parked>,
    parked_values: HashSet<u32>,
    cursor: u64,
    jobs: Option<Arc<JobRegistry>>,
}

impl AllocatorState {
    fn reserved(&self) -> u64 {
        (self.in_use.len() + self.cooling.len() + self.parked_values.len()) as u64
    }

    /// Jobs published so far, or zero when unbound
    fn epoch(&self) -> u64 {
        self.jobs.as_ref().map_or(0, |jobs| jobs.published())
    }

    /// Values released at or before this epoch cannot match a live job
    fn horizon(&self, now: Instant) -> u64 {
        self.jobs
            .as_ref()
            .map_or(u64::MAX, |jobs| jobs.live_floor(now))
    }

    fn is_free(&mut self, value: u32, now: Instant, horizon: u64) -> bool {
        if self.in_use.contains(&value) || self.parked_values.contains(&value) {
            return false;
        }
        match self.cooling.get(&value) {
            Some(cooling) if !cooling.is_ready(now, horizon) => false,
            Some(_) => {
                self.cooling.remove(&value);
                true
            }
            None => true,
        }
    }

    fn cool(&mut self, value: u32, ready_at: Instant, epoch: u64) {
        self.cooling.insert(value, Cooling { ready_at, epoch });
    }

    fn release(&mut self, value: u32, ready_at: Instant) {
        self.in_use.remove(&value);
        let epoch = self.epoch();
        self.cool(value, ready_at, epoch);
    }

    fn reclaim(&mut self, now: Instant, cooldown: Duration) -> usize {
        let expired: Vec<SessionId> = self
            .parked
            .iter()
            .filter(|(_, parked)| parked.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(parked) = self.parked.remove(&id) {
                self.parked_values.remove(&parked.value);
                self.cool(parked.value, now + cooldown, parked.epoch);
            }
        }

        let horizon = self.horizon(now);
        let before = self.cooling.len();
        self.cooling.retain(|_, cooling| !cooling.is_ready(now, horizon));
        before - self.cooling.len()
    }
}

/// Process-wide extranonce1 arena
pub struct ExtranonceAllocator {
    state: Arc<Mutex<AllocatorState>>,
    size: u8,
    space: u64,
    cooldown: Duration,
    resume_ttl: Duration,
}

impl ExtranonceAllocator {
    /// Create an allocator for `size`-byte values
    ///
    /// `size` is clamped to `1..=4`.
    pub fn new(size: u8, cooldown: Duration, resume_ttl: Duration) -> Self {
        let size = size.clamp(1, MAX_EXTRANONCE1_SIZE);
        let space = 1u64 << (8 * u32::from(size));
        let state = AllocatorState {
            cursor: rand::random::<u64>() % space,
            ..AllocatorState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            size,
            space,
            cooldown,
            resume_ttl,
        }
    }

    /// Hold released values back until the jobs they could have worked
    /// on are stale
    pub fn with_jobs(self, jobs: Arc<JobRegistry>) -> Self {
        self.state.lock().jobs = Some(jobs);
        self
    }

    /// Width of every value in bytes
    pub fn size(&self) -> u8 {
        self.size
    }

    /// Number of distinct values
    pub fn space(&self) -> u64 {
        self.space
    }

    /// Lease a free value
    pub fn acquire(&self) -> Result<ExtranonceLease, AllocError> {
        self.acquire_at(Instant::now())
    }

    fn acquire_at(&self, now: Instant) -> Result<ExtranonceLease, AllocError> {
        let mut state = self.state.lock();

        if state.reserved() >= self.space {
            state.reclaim(now, self.cooldown);
        }
        let horizon = state.horizon(now);
        // Reserved values are all that can block a step, so at most
        // `reserved + 1` steps are needed when any value is free.
        let steps = (state.reserved() + 1).min(self.space);
        for _ in 0..steps {
            let candidate = state.cursor as u32;
            state.cursor = (state.cursor + 1) % self.space;
            if state.is_free(candidate, now, horizon) {
                state.in_use.insert(candidate);
                return Ok(self.lease(candidate));
            }
        }
        Err(AllocError::SpaceExhausted(self.space))
    }

    /// Reserve a disconnected session's value for later resumption
    pub fn park(&self, session_id: SessionId, lease: ExtranonceLease) {
        self.park_at(session_id, lease, Instant::now());
    }

    fn park_at(&self, session_id: SessionId, mut lease: ExtranonceLease, now: Instant) {
        // Detach so dropping the lease does not start the cool-down
        lease.state = None;
        let mut state = self.state.lock();
        state.in_use.remove(&lease.value);
        state.parked_values.insert(lease.value);
        let parked = Parked {
            value: lease.value,
            expires_at: now + self.resume_ttl,
            epoch: state.epoch(),
        };
        if let Some(previous) = state.parked.insert(session_id, parked) {
            if previous.value != lease.value {
                state.parked_values.remove(&previous.value);
                state.cool(previous.value, now + self.cooldown, previous.epoch);
            }
        }
    }

    /// Take back a parked value if its TTL has not expired
    pub fn resume(&self, session_id: &SessionId) -> Option<ExtranonceLease> {
        self.resume_at(session_id, Instant::now())
    }

    fn resume_at(&self, session_id: &SessionId, now: Instant) -> Option<ExtranonceLease> {
        let mut state = self.state.lock();
        let parked = state.parked.remove(session_id)?;
        state.parked_values.remove(&parked.value);
        if parked.expires_at <= now {
            state.cool(parked.value, now + self.cooldown, parked.epoch);
            return None;
        }
        state.in_use.insert(parked.value);
        drop(state);
        Some(self.lease(parked.value))
    }

    /// Return expired parked and cooled values to the free space
    ///
    /// Returns the number of values that became available.
    pub fn reclaim(&self) -> usize {
        self.reclaim_at(Instant::now())
    }

    fn reclaim_at(&self, now: Instant) -> usize {
        self.state.lock().reclaim(now, self.cooldown)
    }

    /// Values currently leased
    pub fn leased(&self) -> usize {
        self.state.lock().in_use.len()
    }

    /// Sessions currently parked
    pub fn parked(&self) -> usize {
        self.state.lock().parked.len()
    }

    fn lease(&self, value: u32) -> ExtranonceLease {
        ExtranonceLease {
            value,
            size: self.size,
            cooldown: self.cooldown,
            state: Some(Arc::clone(&self.state)),
        }
    }
}

impl fmt::Debug for ExtranonceAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtranonceAllocator")
            .field("size", &self.size)
            .field("cooldown", &self.cooldown)
            .field("resume_ttl", &self.resume_ttl)
            .finish()
    }
}

/// Exclusive ownership of one extranonce1 value
///
/// Dropping the lease starts the value's cool-down.
pub struct ExtranonceLease {
    value: u32,
    size: u8,
    cooldown: Duration,
    state: Option<Arc<Mutex<AllocatorState>>>,
}

impl ExtranonceLease {
    /// Raw value
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Width in bytes
    pub fn size(&self) -> u8 {
        self.size
    }

    /// Fixed-width lowercase hex, as sent in `mining.subscribe`
    pub fn to_hex(&self) -> String {
        format!("{:0width$x}", self.value, width = usize::from(self.size) * 2)
    }

    /// Big-endian bytes inserted into the coinbase
    pub fn to_bytes(&self) -> Vec<u8> {
        self.value.to_be_bytes()[4 - usize::from(self.size)..].to_vec()
    }
}

impl Drop for ExtranonceLease {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.lock().release(self.value, Instant::now() + self.cooldown);
        }
    }
}

impl fmt::Debug for ExtranonceLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExtranonceLease").field(&self.to_hex()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PowAlgorithm;
    use crate::stratum::JobTemplate;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_values_are_distinct() {
        let allocator = ExtranonceAllocator::new(1, MINUTE, MINUTE);
        let leases: Vec<_> = (0..256).map(|_| allocator.acquire().unwrap()).collect();
        let values: HashSet<u32> = leases.iter().map(|l| l.value()).collect();
        assert_eq!(values.len(), 256);
        assert_eq!(
            allocator.acquire().unwrap_err(),
            AllocError::SpaceExhausted(256)
        );
    }

    #[test]
    fn test_released_value_cools_down() {
        let allocator = ExtranonceAllocator::new(1, MINUTE, MINUTE);
        let leases: Vec<_> = (0..256).map(|_| allocator.acquire().unwrap()).collect();
        drop(leases);

        // Everything is cooling
        assert!(allocator.acquire().is_err());

        let later = Instant::now() + MINUTE + Duration::from_secs(1);
        assert_eq!(allocator.reclaim_at(later), 256);
        assert!(allocator.acquire_at(later).is_ok());
    }

    #[test]
    fn test_acquire_reclaims_expired_cooldown_when_full() {
        let allocator = ExtranonceAllocator::new(1, Duration::ZERO, MINUTE);
        let leases: Vec<_> = (0..256).map(|_| allocator.acquire().unwrap()).collect();
        drop(leases);
        let later = Instant::now() + Duration::from_millis(1);
        assert!(allocator.acquire_at(later).is_ok());
    }

    #[test]
    fn test_park_and_resume() {
        let allocator = ExtranonceAllocator::new(4, MINUTE, MINUTE);
        let session = SessionId::new();
        let lease = allocator.acquire().unwrap();
        let value = lease.value();

        allocator.park(session, lease);
        assert_eq!(allocator.leased(), 0);
        assert_eq!(allocator.parked(), 1);

        let resumed = allocator.resume(&session).unwrap();
        assert_eq!(resumed.value(), value);
        assert_eq!(allocator.leased(), 1);

        // Only once
        assert!(allocator.resume(&session).is_none());
    }

    #[test]
    fn test_resume_after_ttl_fails() {
        let allocator = ExtranonceAllocator::new(4, MINUTE, MINUTE);
        let session = SessionId::new();
        let start = Instant::now();
        let lease = allocator.acquire_at(start).unwrap();
        allocator.park_at(session, lease, start);

        assert!(allocator
            .resume_at(&session, start + MINUTE + Duration::from_secs(1))
            .is_none());
        assert_eq!(allocator.parked(), 0);
    }

    #[test]
    fn test_parked_value_is_not_reallocated() {
        let allocator = ExtranonceAllocator::new(1, Duration::ZERO, MINUTE);
        let session = SessionId::new();
        let lease = allocator.acquire().unwrap();
        let parked = lease.value();
        allocator.park(session, lease);

        let leases: Vec<_> = (0..255).map(|_| allocator.acquire().unwrap()).collect();
        assert!(leases.iter().all(|l| l.value() != parked));
        assert!(allocator.acquire().is_err());
    }

    #[test]
    fn test_reclaim_expires_parked() {
        let allocator = ExtranonceAllocator::new(4, Duration::ZERO, MINUTE);
        let session = SessionId::new();
        let start = Instant::now();
        let lease = allocator.acquire_at(start).unwrap();
        allocator.park_at(session, lease, start);

        assert_eq!(allocator.reclaim_at(start), 0);
        assert_eq!(allocator.parked(), 1);

        let later = start + MINUTE;
        assert_eq!(allocator.reclaim_at(later), 1);
        assert_eq!(allocator.parked(), 0);
    }

    fn publish(jobs: &JobRegistry, clean_jobs: bool, now: Instant) {
        let template = JobTemplate {
            height: 1,
            previous_block_hash: "00".repeat(32),
            coinbase1: "01".to_string(),
            coinbase2: "02".to_string(),
            transactions: vec![],
            version: 1,
            bits: "1d00ffff".to_string(),
            time: 1_600_000_000,
            target: None,
            pow: PowAlgorithm::Sha256d,
            clean_jobs,
        };
        jobs.publish_at(template.into_job(jobs.next_id()).unwrap(), now);
    }

    #[test]
    fn test_released_value_waits_for_live_jobs() {
        let jobs = Arc::new(JobRegistry::new(MINUTE, 8));
        let allocator =
            ExtranonceAllocator::new(1, Duration::ZERO, MINUTE).with_jobs(Arc::clone(&jobs));
        let start = Instant::now();
        publish(&jobs, false, start);

        let leases: Vec<_> = (0..256).map(|_| allocator.acquire_at(start).unwrap()).collect();
        drop(leases);

        // The cool-down is over but the job those values saw is current
        let later = start + Duration::from_secs(1);
        assert_eq!(allocator.reclaim_at(later), 0);
        assert!(allocator.acquire_at(later).is_err());

        // Superseded but inside its grace window
        publish(&jobs, false, later);
        assert!(allocator.acquire_at(later).is_err());

        // Every job held during the leases is now stale
        let after_grace = later + MINUTE;
        assert_eq!(allocator.reclaim_at(after_grace), 256);
        assert!(allocator.acquire_at(after_grace).is_ok());
    }

    #[test]
    fn test_clean_job_frees_released_values() {
        let jobs = Arc::new(JobRegistry::new(MINUTE, 8));
        let allocator =
            ExtranonceAllocator::new(1, Duration::ZERO, MINUTE).with_jobs(Arc::clone(&jobs));
        let start = Instant::now();
        publish(&jobs, false, start);

        let lease = allocator.acquire_at(start).unwrap();
        let session = SessionId::new();
        allocator.park_at(session, lease, start);
        assert!(allocator.resume_at(&session, start + MINUTE).is_none());
        assert_eq!(allocator.reclaim_at(start + MINUTE), 0);

        publish(&jobs, true, start + MINUTE);
        assert_eq!(allocator.reclaim_at(start + MINUTE), 1);
    }

    #[test]
    fn test_lease_encoding() {
        let allocator = ExtranonceAllocator::new(2, MINUTE, MINUTE);
        let lease = allocator.acquire().unwrap();
        assert_eq!(lease.to_hex().len(), 4);
        assert_eq!(lease.to_bytes().len(), 2);
        assert_eq!(hex::encode(lease.to_bytes()), lease.to_hex());
    }

    #[test]
    fn test_size_is_clamped() {
        assert_eq!(ExtranonceAllocator::new(0, MINUTE, MINUTE).size(), 1);
        assert_eq!(ExtranonceAllocator::new(9, MINUTE, MINUTE).space(), 1 << 32);
    }
}
