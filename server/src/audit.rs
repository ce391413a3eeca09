use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use mongodb::bson::oid::ObjectId;

use protocol::AuditAction;

use crate::db::{AuditFilter, AuditLogEntry, AuditStore};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct AuditEvent {
    action: AuditAction,
    actor_id: Option<ObjectId>,
    target_user_id: Option<ObjectId>,
    ip_address: Option<String>,
    metadata: BTreeMap<String, String>,
}

impl AuditEvent {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            actor_id: None,
            target_user_id: None,
            ip_address: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn actor(mut self, actor_id: ObjectId) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn target(mut self, user_id: ObjectId) -> Self {
        self.target_user_id = Some(user_id);
        self
    }

    /// Shorthand for events a user performs on their own account.
    pub fn by_user(self, user_id: ObjectId) -> Self {
        self.actor(user_id).target(user_id)
    }

    pub fn ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    pub fn meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    fn into_entry(self) -> AuditLogEntry {
        AuditLogEntry {
            id: None,
            action: self.action,
            actor_id: self.actor_id,
            target_user_id: self.target_user_id,
            ip_address: self.ip_address,
            metadata: self.metadata,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Never fails the caller: a lost audit entry is logged instead.
    pub async fn record(&self, event: AuditEvent) {
        let action = event.action;
        if let Err(err) = self.store.append(&event.into_entry()).await {
            log::error!("Failed to write audit entry {}: {}", action, err);
        }
    }

    pub async fn list(&self, filter: &AuditFilter) -> Result<(Vec<AuditLogEntry>, u64)> {
        self.store.list(filter).await
    }
}
