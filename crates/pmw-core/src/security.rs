//! Token verification and source IP restrictions
//!
//! The gateway only enforces the presence and validity of a bearer token;
//! deciding validity is delegated to a [`TokenVerifier`]. The shipped
//! [`StaticTokenVerifier`] accepts a configured admin token plus expiring
//! session tokens.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;

/// Authenticated identity behind a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub role: String,
}

impl Principal {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
        }
    }

    pub fn admin() -> Self {
        Self::new("admin", "admin")
    }
}

/// Outcome of verifying a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Valid(Principal),
    Invalid,
}

/// External token verification capability
///
/// `Err` means the verifier itself could not answer (e.g. a remote identity
/// service is down), which is distinct from an invalid token.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Verification>;

    /// End the session behind `token`; `false` when it is not revocable
    async fn revoke(&self, _token: &str) -> Result<bool> {
        Ok(false)
    }

    /// Unexpired sessions, for verifiers that track them
    async fn active_sessions(&self) -> usize {
        0
    }
}

/// A temporary session issued by [`StaticTokenVerifier::create_session`]
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub token: String,
    pub principal: Principal,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Admin token plus in-memory session tokens
pub struct StaticTokenVerifier {
    admin_token: String,
    sessions: RwLock<HashMap<String, Session>>,
}

impl StaticTokenVerifier {
    pub fn new(admin_token: impl Into<String>) -> Self {
        Self {
            admin_token: admin_token.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Issue a new session token valid for `ttl`
    pub async fn create_session(
        &self,
        username: impl Into<String>,
        role: impl Into<String>,
        ttl: Duration,
    ) -> Session {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            token: Uuid::new_v4().to_string(),
            principal: Principal::new(username, role),
            expires_at: Utc::now() + ttl,
        };

        info!(
            "Created new session for user: {} with role: {}",
            session.principal.name, session.principal.role
        );
        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session.clone());
        session
    }

    /// Drop expired sessions, returning how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        let removed = before - sessions.len();
        if removed > 0 {
            info!("Cleaned up {} expired sessions", removed);
        }
        removed
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Verification> {
        if token.is_empty() {
            return Ok(Verification::Invalid);
        }

        if !self.admin_token.is_empty()
            && bool::from(token.as_bytes().ct_eq(self.admin_token.as_bytes()))
        {
            return Ok(Verification::Valid(Principal::admin()));
        }

        let sessions = self.sessions.read().await;
        match sessions.get(token) {
            Some(session) if !session.is_expired() => {
                Ok(Verification::Valid(session.principal.clone()))
            }
            _ => Ok(Verification::Invalid),
        }
    }

    async fn revoke(&self, token: &str) -> Result<bool> {
        match self.sessions.write().await.remove(token) {
            Some(removed) => {
                info!("Invalidated session for user: {}", removed.principal.name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn active_sessions(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| !s.is_expired())
            .count()
    }
}

/// Source IP allow-list for authenticated routes
///
/// Entries are exact addresses (`127.0.0.1`, `::1`) or IPv4 CIDR ranges
/// (`10.0.0.0/8`). An empty list allows everything.
#[derive(Debug, Clone, Default)]
pub struct IpAllowList {
    exact: Vec<IpAddr>,
    ranges: Vec<(u32, u32)>,
}

impl IpAllowList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if let Some((network, bits)) = entry.split_once('/') {
                match (network.parse::<Ipv4Addr>(), bits.parse::<u32>()) {
                    (Ok(net), Ok(bits)) if bits <= 32 => {
                        let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
                        list.ranges.push((u32::from(net) & mask, mask));
                    }
                    _ => tracing::warn!("Ignoring invalid allow-list range: {}", entry),
                }
            } else if let Ok(ip) = entry.parse::<IpAddr>() {
                list.exact.push(ip);
            } else {
                tracing::warn!("Ignoring invalid allow-list entry: {}", entry);
            }
        }
        list
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.ranges.is_empty()
    }

    /// Whether a request from `addr` may proceed
    ///
    /// An empty list admits everything, including requests whose address is
    /// unknown; a non-empty list rejects unknown addresses.
    pub fn permits(&self, addr: Option<IpAddr>) -> bool {
        self.is_empty() || addr.is_some_and(|addr| self.contains(addr))
    }

    /// Whether `addr` matches an entry; an empty list matches nothing
    pub fn contains(&self, addr: IpAddr) -> bool {
        if self.exact.contains(&addr) {
            return true;
        }

        match addr {
            IpAddr::V4(v4) => {
                let value = u32::from(v4);
                self.ranges
                    .iter()
                    .any(|(network, mask)| value & mask == *network)
            }
            IpAddr::V6(v6) => v6
                .to_ipv4_mapped()
                .is_some_and(|v4| self.contains(IpAddr::V4(v4))),
        }
    }
}
