//! Audit trail for administrative actions
//!
//! Records who did what, when and from where. Kept in memory and bounded;
//! the oldest entries are dropped once capacity is reached.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub action: String,
    pub target: String,
    pub ip_address: String,
    pub success: bool,
    pub metadata: Value,
}

impl AuditEntry {
    pub fn new(
        user: impl Into<String>,
        action: impl Into<String>,
        target: impl Into<String>,
        ip_address: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            user: user.into(),
            action: action.into(),
            target: target.into(),
            ip_address: ip_address.into(),
            success: true,
            metadata: Value::Null,
        }
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

pub struct AuditLog {
    entries: RwLock<VecDeque<AuditEntry>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append an entry, assigning its id
    pub async fn record(&self, mut entry: AuditEntry) -> u64 {
        entry.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = entry.id;
        debug!(
            "audit #{}: {} {} on {} (success={})",
            id, entry.user, entry.action, entry.target, entry.success
        );

        let mut entries = self.entries.write().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
        id
    }

    /// Most recent entries first
    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(1000)
    }
}
