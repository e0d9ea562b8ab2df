use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

pub const MASTER_TENANT: &str = "master";

const AGENT_PREFIX: &str = "agent:";

/// Identifies the party that owns an order, ledger entry or withdrawal: the primary operator
/// (`master`) or one reseller (`agent:<id>`). Stored in its canonical string form.
#[derive(Debug, Clone, Type, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct TenantId(String);

#[derive(Debug, Clone, Error)]
#[error("Invalid tenant identifier: {0}")]
pub struct TenantIdError(pub String);

impl TenantId {
    pub fn master() -> Self {
        Self(MASTER_TENANT.to_string())
    }

    pub fn agent<S: AsRef<str>>(id: S) -> Result<Self, TenantIdError> {
        let id = id.as_ref().trim();
        if id.is_empty() || id.contains(char::is_whitespace) || id.contains(':') {
            return Err(TenantIdError(format!("'{id}' is not a valid agent id")));
        }
        Ok(Self(format!("{AGENT_PREFIX}{id}")))
    }

    pub fn is_master(&self) -> bool {
        self.0 == MASTER_TENANT
    }

    /// The bare agent id, or `None` for the master tenant.
    pub fn agent_id(&self) -> Option<&str> {
        self.0.strip_prefix(AGENT_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TenantId {
    type Err = TenantIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == MASTER_TENANT {
            return Ok(Self::master());
        }
        match s.strip_prefix(AGENT_PREFIX) {
            Some(id) => Self::agent(id),
            None => Err(TenantIdError(format!("'{s}' is neither '{MASTER_TENANT}' nor '{AGENT_PREFIX}<id>'"))),
        }
    }
}

impl Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
