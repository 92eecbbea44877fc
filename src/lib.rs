//! # Stratum Pool
//!
//! The core of a Stratum v1 mining pool: miner sessions, job distribution,
//! extranonce allocation and share validation, with a Tokio TCP front end.
//!
//! ## Features
//!
//! - **Session state machine** (`Connected -> Subscribed -> Authorized`)
//!   with per-session duplicate detection
//! - **Share validation** for double-SHA-256 and Cuckoo cycle proof-of-work
//! - **Copy-on-write job registry** with a grace period for superseded jobs
//! - **Extranonce1 arena** with cool-down and session resumption
//! - **Structured logging** through `tracing`
//!
//! ## Architecture
//!
//! [`stratum::StratumService`] holds the shared pool state and is driven by
//! one task per connection, each owning its [`stratum::MinerSession`]. Jobs
//! enter through [`stratum::JobPublisher`]; share outcomes leave through an
//! optional channel.

#![warn(
    missing_docs,
    rust_2018_idioms,
    unused_lifetimes,
    unused_qualifications,
    clippy::all
)]
#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod stratum;
pub mod utils;

pub use crate::error::{Error, Result};
pub use config::Config;
pub use crate::core::{MerkleTree, PowAlgorithm, Target};
pub use stratum::{MinerSession, ShareValidator, StratumServer, StratumService};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        config::Config,
        core::{MerkleTree, PowAlgorithm, Target},
        error::{Error, Result},
        stratum::{
            Job, JobRegistry, JobTemplate, MinerSession, RejectReason, ShareResult,
            ShareSubmission, StratumServer, StratumService,
        },
    };
}
