use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::errors::ServiceError;
use crate::models::{Permission, PermissionSet, StaffUser};

/// A signed-in staff member.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub staff_id: String,
    pub name: String,
    pub role: String,
    pub permissions: PermissionSet,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Signed in against the roster cache while the store was unreachable.
    pub offline: bool,
}

impl Session {
    pub fn require(&self, permission: Permission) -> Result<(), ServiceError> {
        if self.permissions.allows(permission) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "{} lacks the {} permission",
                self.name, permission
            )))
        }
    }

    /// Name recorded on audit entries.
    pub fn actor(&self) -> Option<&str> {
        Some(self.name.as_str())
    }
}

/// In-memory session table keyed by bearer token.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(12)),
        }
    }

    pub fn issue(&self, staff: &StaffUser, offline: bool) -> Session {
        let now = Utc::now();
        let session = Session {
            token: hex::encode(rand::random::<[u8; 32]>()),
            staff_id: staff.id.clone(),
            name: staff.name.clone(),
            role: staff.role().to_string(),
            permissions: staff.permissions.clone(),
            issued_at: now,
            expires_at: now + self.ttl,
            offline,
        };
        self.sessions.insert(session.token.clone(), session.clone());
        debug!(staff_id = %session.staff_id, offline, "session issued");
        session
    }

    pub fn authenticate(&self, token: &str) -> Result<Session, ServiceError> {
        let session = self
            .sessions
            .get(token)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceError::Unauthorized("Invalid or expired session".into()))?;
        if session.expires_at <= Utc::now() {
            self.sessions.remove(token);
            return Err(ServiceError::Unauthorized("Invalid or expired session".into()));
        }
        Ok(session)
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Ends every session of one staff member.
    pub fn revoke_staff(&self, staff_id: &str) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.staff_id != staff_id);
        before.saturating_sub(self.sessions.len())
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.expires_at > now);
        before.saturating_sub(self.sessions.len())
    }
}
