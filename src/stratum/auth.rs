//! Worker authentication
//!
//! `mining.authorize` consults a [`WorkerRegistry`]. Bad credentials are a
//! normal negative answer (`Ok(None)`); `Err` is reserved for a registry that
//! could not be reached.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

/// Worker identity bound to an authorized session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerIdentity {
    /// Account credited for shares
    pub account: String,
    /// Optional rig name
    pub worker: Option<String>,
}

impl WorkerIdentity {
    /// Parse `account` or `account.worker`
    pub fn from_username(username: &str) -> Self {
        match username.split_once('.') {
            Some((account, worker)) => Self {
                account: account.to_string(),
                worker: (!worker.is_empty()).then(|| worker.to_string()),
            },
            None => Self {
                account: username.to_string(),
                worker: None,
            },
        }
    }

    /// Full username as the miner sent it
    pub fn to_username(&self) -> String {
        match &self.worker {
            Some(worker) => format!("{}.{}", self.account, worker),
            None => self.account.clone(),
        }
    }
}

impl std::fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_username())
    }
}

/// External credential check
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Identity for valid credentials, `None` otherwise
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<WorkerIdentity>>;
}

/// Accepts any non-empty username
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenRegistry;

#[async_trait]
impl WorkerRegistry for OpenRegistry {
    async fn authenticate(&self, username: &str, _password: &str) -> Result<Option<WorkerIdentity>> {
        let identity = WorkerIdentity::from_username(username.trim());
        Ok((!identity.account.is_empty()).then_some(identity))
    }
}

/// Fixed account table
///
/// Lookups use the account part of the username, so every rig of an account
/// shares its password. An empty password in the table accepts any password.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    accounts: HashMap<String, String>,
}

impl StaticRegistry {
    /// Create a registry from `account -> password`
    pub fn new(accounts: HashMap<String, String>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl WorkerRegistry for StaticRegistry {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<WorkerIdentity>> {
        let identity = WorkerIdentity::from_username(username.trim());
        let accepted = match self.accounts.get(&identity.account) {
            Some(expected) => expected.is_empty() || expected == password,
            None => false,
        };
        Ok(accepted.then_some(identity))
    }
}
