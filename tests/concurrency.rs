//! Shared state under concurrent sessions

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use stratum_pool::config::Config;
use stratum_pool::core::{PowAlgorithm, Target};
use stratum_pool::stratum::{
    AllocError, ExtranonceAllocator, JobId, JobRegistry, JobTemplate, SessionError,
    StratumService,
};
use stratum_pool::utils::PoolMetrics;

fn template(n: u32) -> JobTemplate {
    JobTemplate {
        height: u64::from(n),
        previous_block_hash: format!("{:064x}", n),
        coinbase1: "01".to_string(),
        coinbase2: "02".to_string(),
        transactions: vec![],
        version: 1,
        bits: "1d00ffff".to_string(),
        time: 1_600_000_000 + n,
        target: Some(Target::MAX.to_hex()),
        pow: PowAlgorithm::Sha256d,
        clean_jobs: false,
    }
}

#[test]
fn test_concurrent_subscribes_get_distinct_extranonces() {
    let service = Arc::new(StratumService::new(
        &Config::default(),
        StratumService::registry_from_config(&Config::default()),
        Arc::new(PoolMetrics::new()),
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                (0..50)
                    .map(|_| {
                        let mut session = service.open_session().unwrap();
                        let sub = service.subscribe(&mut session, None, None).unwrap();
                        (sub.extranonce1, session)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut sessions = Vec::new();
    for handle in handles {
        for (extranonce1, session) in handle.join().unwrap() {
            assert!(seen.insert(extranonce1), "extranonce1 handed out twice");
            sessions.push(session);
        }
    }
    assert_eq!(seen.len(), 400);
    assert_eq!(service.allocator().leased(), 400);
    assert_eq!(service.metrics().snapshot().sessions_subscribed, 400);
}

#[test]
fn test_small_space_exhausts_then_recovers() {
    let allocator = Arc::new(ExtranonceAllocator::new(
        1,
        Duration::ZERO,
        Duration::from_secs(60),
    ));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let allocator = Arc::clone(&allocator);
            thread::spawn(move || {
                let mut leases = Vec::new();
                while let Ok(lease) = allocator.acquire() {
                    leases.push(lease);
                }
                leases
            })
        })
        .collect();

    let leases: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let values: HashSet<u32> = leases.iter().map(|l| l.value()).collect();
    assert_eq!(values.len(), 256);
    assert_eq!(allocator.acquire().unwrap_err(), AllocError::SpaceExhausted(256));

    drop(leases);
    allocator.reclaim();
    assert!(allocator.acquire().is_ok());
}

#[test]
fn test_exhaustion_surfaces_as_session_error() {
    let mut config = Config::default();
    config.stratum.extranonce1_size = 1;
    let service = StratumService::new(
        &config,
        StratumService::registry_from_config(&config),
        Arc::new(PoolMetrics::new()),
    );

    let mut sessions = Vec::new();
    for _ in 0..256 {
        let mut session = service.open_session().unwrap();
        service.subscribe(&mut session, None, None).unwrap();
        sessions.push(session);
    }

    let mut extra = service.open_session().unwrap();
    let err = service.subscribe(&mut extra, None, None).unwrap_err();
    assert!(matches!(err, SessionError::Extranonce(AllocError::SpaceExhausted(256))));
}

#[test]
fn test_readers_see_whole_snapshots_while_publishing() {
    let registry = Arc::new(JobRegistry::new(Duration::from_secs(120), 16));
    registry.publish_template(template(0)).unwrap();

    let writer = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            for n in 1..500 {
                registry.publish_template(template(n)).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..2_000 {
                    let snapshot = registry.snapshot();
                    assert!(!snapshot.is_empty());
                    assert!(snapshot.len() <= 16);
                    let current = snapshot.current().unwrap();
                    assert!(snapshot.contains(&current.id));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(registry.len(), 16);
    assert_eq!(registry.current().unwrap().height, 499);
    // Ids are never reused
    assert!(!registry.contains(&JobId::new(0)));
    assert!(registry.contains(&JobId::new(499)));
}
