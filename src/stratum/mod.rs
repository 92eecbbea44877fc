//! Stratum v1 pool protocol
//!
//! Sessions, the job registry, extranonce allocation, share validation and
//! the TCP server that ties them together.

mod auth;
mod extranonce;
mod hex;
mod job;
mod protocol;
mod server;
mod service;
mod session;
mod share;

pub use auth::{OpenRegistry, StaticRegistry, WorkerIdentity, WorkerRegistry};
pub use extranonce::{AllocError, ExtranonceAllocator, ExtranonceLease, MAX_EXTRANONCE1_SIZE};
pub use self::hex::{decode_hex, decode_hex_exact, parse_u32_be};
pub use job::{Job, JobId, JobLookupError, JobRegistry, JobSet, JobTemplate};
pub use protocol::{
    StratumErrorCode, StratumMessage, StratumMethod, StratumNotification, StratumRequest,
    StratumResponse,
};
pub use server::{run_job_feed, JobPublisher, StratumServer, MAX_LINE_LENGTH};
pub use service::{subscribe_result, StratumService};
pub use session::{MinerSession, SessionError, SessionId, SessionState, ShareKey, Subscription};
pub use share::{
    candidate_header, cycle_header_bytes, FoundBlock, RejectReason, ShareResult, ShareSubmission,
    ShareValidator,
};
