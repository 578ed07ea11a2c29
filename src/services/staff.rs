use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::auth::{validate_pin, PinHasher, RosterCache, Session, SessionStore};
use crate::errors::ServiceError;
use crate::metrics::LOGIN_ATTEMPTS;
use crate::models::staff::STAFF_COLLECTION;
use crate::models::{Permission, PermissionSet, StaffSummary, StaffUser};
use crate::store::{to_data, DocumentStore, FieldPath, FieldUpdate, Precondition, Query, StoreError};

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewStaff {
    #[validate(length(min = 1, max = 100, message = "Name cannot be empty"))]
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    pub pin: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StaffUpdate {
    #[validate(length(min = 1, max = 100, message = "Name cannot be empty"))]
    pub name: Option<String>,
    pub role: Option<String>,
    pub pin: Option<String>,
    pub permissions: Option<Vec<Permission>>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub session: Session,
    pub staff: StaffSummary,
}

#[derive(Clone)]
pub struct StaffService {
    store: Arc<dyn DocumentStore>,
    hasher: PinHasher,
    roster_cache: RosterCache,
    sessions: SessionStore,
}

impl StaffService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        hasher: PinHasher,
        roster_cache: RosterCache,
        sessions: SessionStore,
    ) -> Self {
        Self {
            store,
            hasher,
            roster_cache,
            sessions,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    async fn roster(&self) -> Result<Vec<StaffUser>, ServiceError> {
        let mut roster: Vec<StaffUser> = self
            .store
            .list(&Query::collection(STAFF_COLLECTION))
            .await?
            .iter()
            .map(StaffUser::from_document)
            .collect::<Result<_, _>>()?;
        roster.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(roster)
    }

    async fn load(&self, id: &str) -> Result<StaffUser, ServiceError> {
        let doc = self
            .store
            .get(STAFF_COLLECTION, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Staff member {} not found", id)))?;
        Ok(StaffUser::from_document(&doc)?)
    }

    pub async fn list(&self) -> Result<Vec<StaffSummary>, ServiceError> {
        Ok(self.roster().await?.iter().map(StaffSummary::from).collect())
    }

    pub async fn get(&self, id: &str) -> Result<StaffSummary, ServiceError> {
        Ok(StaffSummary::from(&self.load(id).await?))
    }

    /// Rejects `pin` when another active staff member already uses it.
    async fn ensure_pin_unused(&self, pin: &str, except_id: Option<&str>) -> Result<(), ServiceError> {
        let others: Vec<StaffUser> = self
            .roster()
            .await?
            .into_iter()
            .filter(|staff| Some(staff.id.as_str()) != except_id)
            .collect();
        let hasher = self.hasher.clone();
        let pin = pin.to_string();
        let taken = tokio::task::spawn_blocking(move || hasher.find_active(&pin, &others).is_some())
            .await
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;
        if taken {
            return Err(ServiceError::validation(
                "PIN is already used by another active staff member",
            ));
        }
        Ok(())
    }

    async fn hash(&self, pin: &str) -> Result<String, ServiceError> {
        let hasher = self.hasher.clone();
        let pin = pin.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&pin))
            .await
            .map_err(|e| ServiceError::InternalError(e.to_string()))?
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(&self, request: &NewStaff) -> Result<StaffSummary, ServiceError> {
        request.validate()?;
        validate_pin(&request.pin)?;
        let active = request.active.unwrap_or(true);
        if active {
            self.ensure_pin_unused(&request.pin, None).await?;
        }
        let now = Utc::now();
        let staff = StaffUser {
            id: String::new(),
            name: request.name.trim().to_string(),
            role: request
                .role
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            pin_hash: self.hash(&request.pin).await?,
            active,
            permissions: request.permissions.iter().copied().collect(),
            created_at: Some(now),
            updated_at: Some(now),
        };
        let doc = self
            .store
            .create(STAFF_COLLECTION, None, to_data(&staff)?)
            .await?;
        info!(staff_id = %doc.id, "staff member created");
        Ok(StaffSummary::from(&StaffUser::from_document(&doc)?))
    }

    #[instrument(skip(self, request))]
    pub async fn update(&self, id: &str, request: &StaffUpdate) -> Result<StaffSummary, ServiceError> {
        request.validate()?;
        let current = self.load(id).await?;
        let active = request.active.unwrap_or(current.active);
        // PINs are stored salted, so a returning member's old PIN cannot be
        // compared with the active roster. Reactivation takes a fresh one.
        if active && !current.active && request.pin.is_none() {
            return Err(ServiceError::validation(
                "A new PIN is required to reactivate a staff member",
            ));
        }

        let mut updates = Vec::new();
        if let Some(name) = &request.name {
            updates.push(FieldUpdate::set(FieldPath::new(["name"]), name.trim())?);
        }
        if let Some(role) = &request.role {
            let path = FieldPath::new(["role"]);
            updates.push(match role.trim() {
                "" => FieldUpdate::Delete(path),
                role => FieldUpdate::set(path, role)?,
            });
        }
        if let Some(pin) = &request.pin {
            validate_pin(pin)?;
            if active {
                self.ensure_pin_unused(pin, Some(id)).await?;
            }
            updates.push(FieldUpdate::set(FieldPath::new(["pinHash"]), self.hash(pin).await?)?);
        }
        if let Some(permissions) = &request.permissions {
            let set: PermissionSet = permissions.iter().copied().collect();
            updates.push(FieldUpdate::set(FieldPath::new(["permissions"]), set)?);
        }
        if let Some(active) = request.active {
            updates.push(FieldUpdate::set(FieldPath::new(["active"]), active)?);
        }
        if updates.is_empty() {
            return Ok(StaffSummary::from(&current));
        }
        updates.push(FieldUpdate::set(FieldPath::new(["updatedAt"]), Utc::now())?);

        let doc = self
            .store
            .update(STAFF_COLLECTION, id, &updates, Precondition::None)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => {
                    ServiceError::not_found(format!("Staff member {} not found", id))
                }
                other => other.into(),
            })?;
        let staff = StaffUser::from_document(&doc)?;
        if !staff.active || request.permissions.is_some() {
            self.sessions.revoke_staff(id);
        }
        Ok(StaffSummary::from(&staff))
    }

    /// Flips the active flag. Reactivating needs a new `pin`.
    pub async fn toggle_active(
        &self,
        id: &str,
        pin: Option<&str>,
    ) -> Result<StaffSummary, ServiceError> {
        let current = self.load(id).await?;
        self.update(
            id,
            &StaffUpdate {
                active: Some(!current.active),
                pin: pin.filter(|_| !current.active).map(str::to_string),
                ..Default::default()
            },
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        self.store
            .delete(STAFF_COLLECTION, id, Precondition::None)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => {
                    ServiceError::not_found(format!("Staff member {} not found", id))
                }
                other => other.into(),
            })?;
        self.sessions.revoke_staff(id);
        info!(staff_id = id, "staff member deleted");
        Ok(())
    }

    /// PIN sign-in. The roster is read from the store and cached on disk;
    /// while the store is unreachable the cached roster is used instead.
    #[instrument(skip(self, pin))]
    pub async fn login(&self, pin: &str) -> Result<LoginOutcome, ServiceError> {
        validate_pin(pin)?;
        let (roster, offline) = match self.roster().await {
            Ok(roster) => {
                if let Err(e) = self.roster_cache.save(&roster).await {
                    warn!(error = %e, "could not refresh roster cache");
                }
                (roster, false)
            }
            Err(ServiceError::Store(StoreError::Unavailable(reason))) => {
                warn!(%reason, "store unavailable, using roster cache");
                let cached = self.roster_cache.load().await.unwrap_or_else(|e| {
                    warn!(error = %e, "roster cache unreadable");
                    Vec::new()
                });
                if cached.is_empty() {
                    LOGIN_ATTEMPTS.with_label_values(&["offline_unavailable"]).inc();
                    return Err(ServiceError::OfflineUnavailable(
                        "No cached staff roster; connect once to enable offline login".into(),
                    ));
                }
                (cached, true)
            }
            Err(e) => return Err(e),
        };

        let hasher = self.hasher.clone();
        let pin = pin.to_string();
        let matched = tokio::task::spawn_blocking(move || {
            hasher.find_active(&pin, &roster).cloned()
        })
        .await
        .map_err(|e| ServiceError::InternalError(e.to_string()))?;

        let Some(staff) = matched else {
            LOGIN_ATTEMPTS.with_label_values(&["invalid"]).inc();
            return Err(ServiceError::Unauthorized("Invalid PIN".into()));
        };
        LOGIN_ATTEMPTS
            .with_label_values(&[if offline { "offline_success" } else { "success" }])
            .inc();
        info!(staff_id = %staff.id, offline, "staff signed in");
        Ok(LoginOutcome {
            session: self.sessions.issue(&staff, offline),
            staff: StaffSummary::from(&staff),
        })
    }

    pub fn logout(&self, token: &str) -> bool {
        self.sessions.revoke(token)
    }

    /// Creates an administrator with every permission when the roster is
    /// empty. Returns `None` when staff already exist.
    pub async fn bootstrap_admin(
        &self,
        name: &str,
        pin: &str,
    ) -> Result<Option<StaffSummary>, ServiceError> {
        if !self.roster().await?.is_empty() {
            return Ok(None);
        }
        let admin = self
            .create(&NewStaff {
                name: name.to_string(),
                role: Some("Admin".into()),
                pin: pin.to_string(),
                permissions: PermissionSet::all().granted().collect(),
                active: Some(true),
            })
            .await?;
        info!(staff_id = %admin.id, "bootstrap administrator created");
        Ok(Some(admin))
    }
}
