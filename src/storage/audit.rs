// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for sensitive actions.
//!
//! Entries are append-only: they are written inside the same redb write
//! transaction as the mutation they describe and are never updated or
//! removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::database::{CoreDb, DbResult};

/// Types of auditable actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Document lifecycle
    Upload,
    Process,
    ManualDelete,
    AutoDelete,
    BulkDelete,
    Consent,

    // Fulfilment
    NotificationDelivery,
    BookingStatusChanged,

    // Payments
    PaymentConfirmed,
    PaymentFailed,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    pub id: String,
    pub action: AuditAction,
    /// Acting user; `None` for system actions (sweep, webhooks).
    pub user_id: Option<String>,
    /// Subject kind (`document`, `prediction`, `order`, `booking`).
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub purpose: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: AuditAction) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            user_id: None,
            resource_type: None,
            resource_id: None,
            ip_address: None,
            purpose: None,
            details: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_ip(mut self, ip: Option<&str>) -> Self {
        self.ip_address = ip.map(str::to_string);
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Read access to the audit trail.
pub struct AuditLog<'a> {
    db: &'a CoreDb,
}

impl<'a> AuditLog<'a> {
    pub fn new(db: &'a CoreDb) -> Self {
        Self { db }
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> DbResult<Vec<AuditEntry>> {
        self.db.audit_entries()
    }

    pub fn for_user(&self, user_id: &str) -> DbResult<Vec<AuditEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .collect())
    }

    pub fn for_resource(&self, resource_type: &str, resource_id: &str) -> DbResult<Vec<AuditEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| {
                e.resource_type.as_deref() == Some(resource_type)
                    && e.resource_id.as_deref() == Some(resource_id)
            })
            .collect())
    }

    pub fn with_action(&self, action: AuditAction) -> DbResult<Vec<AuditEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.action == action)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (CoreDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = CoreDb::open(&dir.path().join("audit.redb")).unwrap();
        (db, dir)
    }

    #[test]
    fn builder_sets_fields() {
        let entry = AuditEntry::new(AuditAction::Consent)
            .with_user("user_123")
            .with_resource("prediction", "p1")
            .with_ip(Some("192.168.1.1"))
            .with_purpose("document audit for prediction p1");

        assert_eq!(entry.action, AuditAction::Consent);
        assert_eq!(entry.user_id.as_deref(), Some("user_123"));
        assert_eq!(entry.resource_id.as_deref(), Some("p1"));
        assert_eq!(entry.ip_address.as_deref(), Some("192.168.1.1"));
    }

    #[test]
    fn actions_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&AuditAction::NotificationDelivery).unwrap(),
            "\"notification_delivery\""
        );
        assert_eq!(
            serde_json::to_string(&AuditAction::BulkDelete).unwrap(),
            "\"bulk_delete\""
        );
    }

    #[test]
    fn entries_read_back_in_order_and_filter() {
        let (db, _dir) = temp_db();
        db.write(|tx| {
            tx.append_audit(
                &AuditEntry::new(AuditAction::Upload)
                    .with_user("user_1")
                    .with_resource("document", "d1"),
            )?;
            tx.append_audit(
                &AuditEntry::new(AuditAction::ManualDelete)
                    .with_user("user_2")
                    .with_resource("document", "d1"),
            )?;
            tx.append_audit(
                &AuditEntry::new(AuditAction::Consent)
                    .with_user("user_1")
                    .with_resource("prediction", "p1"),
            )
        })
        .unwrap();

        let log = AuditLog::new(&db);
        let all = log.entries().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].action, AuditAction::Upload);
        assert_eq!(all[2].action, AuditAction::Consent);

        assert_eq!(log.for_user("user_1").unwrap().len(), 2);
        assert_eq!(log.for_resource("document", "d1").unwrap().len(), 2);
        assert_eq!(log.with_action(AuditAction::Consent).unwrap().len(), 1);
    }
}
