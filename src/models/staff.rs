use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::store::{Document, StoreError};

pub const STAFF_COLLECTION: &str = "staff";

pub const DEFAULT_ROLE: &str = "Staff";

/// Page-level capability a staff member can be granted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    AsRefStr, EnumString, EnumIter,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Permission {
    Dashboard,
    Inventory,
    AddStock,
    Transfer,
    Reports,
    AdminPage,
}

/// Granted permissions. Stored as a `{permission: bool}` map, so flags that
/// are absent or false both mean "not granted".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeMap<Permission, bool>);

impl PermissionSet {
    pub fn all() -> Self {
        Permission::iter().collect()
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.0.get(&permission).copied().unwrap_or(false)
    }

    pub fn grant(&mut self, permission: Permission) {
        self.0.insert(permission, true);
    }

    pub fn granted(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0
            .iter()
            .filter_map(|(permission, on)| on.then_some(*permission))
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().map(|p| (p, true)).collect())
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffUser {
    /// Document id. Kept in the offline roster cache, left out of the stored body.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Argon2 PHC string.
    pub pin_hash: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub permissions: PermissionSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StaffUser {
    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut staff: StaffUser = doc.decode()?;
        staff.id = doc.id.clone();
        staff.created_at.get_or_insert(doc.create_time);
        staff.updated_at.get_or_insert(doc.update_time);
        Ok(staff)
    }

    pub fn role(&self) -> &str {
        self.role.as_deref().unwrap_or(DEFAULT_ROLE)
    }
}

/// Roster entry as returned by the API; never carries the PIN hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffSummary {
    pub id: String,
    pub name: String,
    pub role: String,
    pub active: bool,
    pub permissions: Vec<Permission>,
}

impl From<&StaffUser> for StaffSummary {
    fn from(staff: &StaffUser) -> Self {
        Self {
            id: staff.id.clone(),
            name: staff.name.clone(),
            role: staff.role().to_string(),
            active: staff.active,
            permissions: staff.permissions.granted().collect(),
        }
    }
}
