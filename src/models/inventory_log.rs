use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::store::{Document, StoreError};

pub const INVENTORY_LOGS_COLLECTION: &str = "inventoryLogs";

/// Kind of ledger mutation recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LogType {
    AddNewItem,
    #[serde(alias = "increase", alias = "add")]
    Topup,
    #[serde(alias = "minus")]
    Decrease,
    Transfer,
    TransferUndo,
    Delete,
    UpdatePar,
    UpdateMin,
    UpdateMax,
    /// Legacy or unrecognised type string.
    #[serde(other)]
    Other,
}

/// Coarse grouping used by log filters and the activity summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActivityKind {
    Add,
    Decrease,
    Transfer,
    Delete,
    Other,
}

impl LogType {
    pub fn activity(self) -> ActivityKind {
        match self {
            LogType::AddNewItem | LogType::Topup => ActivityKind::Add,
            LogType::Decrease => ActivityKind::Decrease,
            LogType::Transfer | LogType::TransferUndo => ActivityKind::Transfer,
            LogType::Delete => ActivityKind::Delete,
            LogType::UpdatePar | LogType::UpdateMin | LogType::UpdateMax | LogType::Other => {
                ActivityKind::Other
            }
        }
    }

    pub fn for_level(field: &str) -> Self {
        match field {
            "par" => LogType::UpdatePar,
            "min" => LogType::UpdateMin,
            _ => LogType::UpdateMax,
        }
    }
}

/// One append-only audit record. `item` is a display-name snapshot, not a
/// reference, so entries outlive renamed or deleted items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryLogEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "type")]
    pub log_type: LogType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, alias = "itemName")]
    pub item: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, alias = "fromLocation", skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, alias = "toLocation", skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Signed quantity delta actually applied.
    #[serde(default, alias = "qtyChange")]
    pub qty: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_qty: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_from: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_to: Option<i64>,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Assigned by the store on append; never written by the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl InventoryLogEntry {
    fn base(log_type: LogType, item_id: &str, item: &str) -> Self {
        Self {
            id: String::new(),
            log_type,
            item_id: Some(item_id.to_string()),
            item: item.to_string(),
            location: None,
            from: None,
            to: None,
            qty: 0,
            new_qty: None,
            before_from: None,
            before_to: None,
            reason: String::new(),
            actor: None,
            timestamp: None,
        }
    }

    /// Single-location entry (add, top-up, decrease, delete, level edits).
    pub fn at_location(
        log_type: LogType,
        item_id: &str,
        item: &str,
        location: Option<&str>,
        qty: i64,
        new_qty: Option<i64>,
    ) -> Self {
        Self {
            location: location.map(str::to_string),
            qty,
            new_qty,
            ..Self::base(log_type, item_id, item)
        }
    }

    /// Transfer (or transfer undo) entry carrying the pre-move quantities.
    #[allow(clippy::too_many_arguments)]
    pub fn movement(
        log_type: LogType,
        item_id: &str,
        item: &str,
        from: &str,
        to: &str,
        qty: i64,
        before_from: i64,
        before_to: i64,
        new_qty: i64,
    ) -> Self {
        Self {
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            qty,
            before_from: Some(before_from),
            before_to: Some(before_to),
            new_qty: Some(new_qty),
            ..Self::base(log_type, item_id, item)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_actor(mut self, actor: Option<&str>) -> Self {
        self.actor = actor.map(str::to_string);
        self
    }

    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut entry: InventoryLogEntry = doc.decode()?;
        entry.id = doc.id.clone();
        if entry.reason.is_empty() {
            // Older entries kept the reason under meta.message.
            if let Some(message) = doc.data.pointer("/meta/message").and_then(|v| v.as_str()) {
                entry.reason = message.to_string();
            }
        }
        Ok(entry)
    }

    /// Every location this entry touches.
    pub fn locations(&self) -> impl Iterator<Item = &str> {
        [&self.location, &self.from, &self.to]
            .into_iter()
            .filter_map(|l| l.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn doc(data: serde_json::Value) -> Document {
        Document {
            id: "log-1".into(),
            version: 1,
            create_time: Utc::now(),
            update_time: Utc::now(),
            data,
        }
    }

    #[test]
    fn legacy_fields_are_accepted() {
        let entry = InventoryLogEntry::from_document(&doc(json!({
            "type": "transfer",
            "itemName": "Gauze",
            "fromLocation": "A",
            "toLocation": "B",
            "qty": 3,
            "meta": {"message": "Transferred 3x Gauze"},
            "timestamp": "2024-05-01T10:00:00.000000Z"
        })))
        .unwrap();
        assert_eq!(entry.item, "Gauze");
        assert_eq!(entry.from.as_deref(), Some("A"));
        assert_eq!(entry.to.as_deref(), Some("B"));
        assert_eq!(entry.reason, "Transferred 3x Gauze");
        assert!(entry.timestamp.is_some());
    }

    #[test]
    fn unknown_and_aliased_types() {
        let increase: InventoryLogEntry =
            serde_json::from_value(json!({"type": "increase", "item": "x"})).unwrap();
        assert_eq!(increase.log_type, LogType::Topup);
        let odd: InventoryLogEntry =
            serde_json::from_value(json!({"type": "recount", "item": "x"})).unwrap();
        assert_eq!(odd.log_type, LogType::Other);
        assert_eq!(odd.log_type.activity(), ActivityKind::Other);
    }

    #[test]
    fn type_serialises_kebab_case() {
        let entry = InventoryLogEntry::at_location(
            LogType::AddNewItem,
            "id",
            "Gauze",
            Some("A"),
            5,
            Some(5),
        );
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "add-new-item");
        assert_eq!(LogType::TransferUndo.to_string(), "transfer-undo");
        assert!(value.get("timestamp").is_none());
    }
}
