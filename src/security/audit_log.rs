use tracing::{info, warn};

use crate::security::policy::{DenyReason, Operation};
use crate::security::token::AuthFailure;

/// Security events, emitted on the `audit` target.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn secrets_loaded(&self, source: &str, issuer: &str) {
        info!(target: "audit", event = "secrets_loaded", source, issuer);
    }

    pub fn auth_failure(&self, path: &str, reason: AuthFailure) {
        warn!(target: "audit", event = "auth_failure", path, reason = %reason);
    }

    pub fn access_granted(&self, subject: &str, op: Operation, resource: Option<&str>) {
        info!(
            target: "audit",
            event = "access_granted",
            subject,
            op = op.as_str(),
            resource = resource.unwrap_or("")
        );
    }

    pub fn access_denied(
        &self,
        subject: Option<&str>,
        op: Operation,
        resource: Option<&str>,
        reason: DenyReason,
    ) {
        warn!(
            target: "audit",
            event = "access_denied",
            subject = subject.unwrap_or(""),
            op = op.as_str(),
            resource = resource.unwrap_or(""),
            reason = %reason
        );
    }

    pub fn user_created(&self, user_id: &str, subject: Option<&str>) {
        info!(
            target: "audit",
            event = "user_created",
            user_id,
            subject = subject.unwrap_or("anonymous")
        );
    }

    pub fn user_updated(&self, user_id: &str, subject: &str) {
        info!(target: "audit", event = "user_updated", user_id, subject);
    }

    pub fn user_deleted(&self, user_id: &str, subject: &str) {
        info!(target: "audit", event = "user_deleted", user_id, subject);
    }
}
