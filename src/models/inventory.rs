use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::store::{Document, FieldPath, StoreError};

pub const INVENTORY_COLLECTION: &str = "inventory";

/// Fallback MAX when the derived default would be zero.
pub const FALLBACK_MAX: i64 = 9999;

/// Reads a stock number from a loosely typed value. Numbers and numeric
/// strings are accepted (fractions are floored); null and blank strings are
/// unset.
pub fn coerce_stock_value(field: &str, value: &Value) -> Result<Option<i64>, String> {
    let invalid = || format!("{} is not a number: {}", field, value);
    let floored = |f: f64| Some(f).filter(|f| f.is_finite()).map(|f| f.floor() as i64);
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(floored))
            .map(Some)
            .ok_or_else(invalid),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(floored))
                .map(Some)
                .ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}

/// Serde adapters that decode stock numbers through [`coerce_stock_value`].
mod lenient {
    use super::*;
    use serde::de::Error;

    pub fn qty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let value = Value::deserialize(deserializer)?;
        coerce_stock_value("qty", &value)
            .map(|qty| qty.unwrap_or(0).max(0))
            .map_err(D::Error::custom)
    }

    pub fn threshold<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        coerce_stock_value("threshold", &value).map_err(D::Error::custom)
    }
}

/// PAR / MIN / MAX thresholds. Missing values skip their classification rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevels {
    #[serde(
        default,
        deserialize_with = "lenient::threshold",
        skip_serializing_if = "Option::is_none"
    )]
    pub par: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient::threshold",
        skip_serializing_if = "Option::is_none"
    )]
    pub min: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient::threshold",
        skip_serializing_if = "Option::is_none"
    )]
    pub max: Option<i64>,
}

impl StockLevels {
    pub fn new(par: i64, min: i64, max: i64) -> Self {
        Self {
            par: Some(par),
            min: Some(min),
            max: Some(max),
        }
    }

    /// Defaults derived from a first stock-in quantity:
    /// `par = qty`, `min = floor(qty / 2)`, `max = qty * 2` (or 9999 when zero).
    pub fn derived_from(qty: i64) -> Self {
        let max = qty.saturating_mul(2);
        Self::new(qty, qty / 2, if max == 0 { FALLBACK_MAX } else { max })
    }

    /// Fills missing thresholds from `fallback`.
    pub fn or(self, fallback: StockLevels) -> Self {
        Self {
            par: self.par.or(fallback.par),
            min: self.min.or(fallback.min),
            max: self.max.or(fallback.max),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.par.is_none() && self.min.is_none() && self.max.is_none()
    }

    /// Requires non-negative values and `min <= par <= max` among those given.
    pub fn check(&self) -> Result<(), String> {
        for (name, value) in [("par", self.par), ("min", self.min), ("max", self.max)] {
            if matches!(value, Some(v) if v < 0) {
                return Err(format!("{} must not be negative", name));
            }
        }
        if let (Some(min), Some(par)) = (self.min, self.par) {
            if min > par {
                return Err(format!("min ({}) must not exceed par ({})", min, par));
            }
        }
        if let (Some(par), Some(max)) = (self.par, self.max) {
            if par > max {
                return Err(format!("par ({}) must not exceed max ({})", par, max));
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(format!("min ({}) must not exceed max ({})", min, max));
            }
        }
        Ok(())
    }
}

/// Stock of one item at one named location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationStock {
    #[serde(default, deserialize_with = "lenient::qty")]
    pub qty: i64,
    #[serde(
        default,
        deserialize_with = "lenient::threshold",
        skip_serializing_if = "Option::is_none"
    )]
    pub par: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient::threshold",
        skip_serializing_if = "Option::is_none"
    )]
    pub min: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient::threshold",
        skip_serializing_if = "Option::is_none"
    )]
    pub max: Option<i64>,
}

impl LocationStock {
    pub fn new(qty: i64, levels: StockLevels) -> Self {
        Self {
            qty,
            par: levels.par,
            min: levels.min,
            max: levels.max,
        }
    }

    pub fn levels(&self) -> StockLevels {
        StockLevels {
            par: self.par,
            min: self.min,
            max: self.max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    /// Document id; not part of the stored body.
    #[serde(skip)]
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::threshold",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_par: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient::threshold",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_min: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient::threshold",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_max: Option<i64>,
    #[serde(default)]
    pub locations: BTreeMap<String, LocationStock>,
}

impl InventoryItem {
    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut item: InventoryItem = doc.decode()?;
        item.id = doc.id.clone();
        Ok(item)
    }

    pub fn default_levels(&self) -> StockLevels {
        StockLevels {
            par: self.default_par,
            min: self.default_min,
            max: self.default_max,
        }
    }

    /// Thresholds in force at `location`: the location's own values, falling
    /// back to the item defaults.
    pub fn effective_levels(&self, location: &str) -> StockLevels {
        self.locations
            .get(location)
            .map(LocationStock::levels)
            .unwrap_or_default()
            .or(self.default_levels())
    }

    pub fn qty_at(&self, location: &str) -> Option<i64> {
        self.locations.get(location).map(|l| l.qty)
    }

    pub fn total_qty(&self) -> i64 {
        self.locations
            .values()
            .fold(0i64, |total, l| total.saturating_add(l.qty))
    }

    pub fn name_matches(&self, name: &str) -> bool {
        self.display_name.trim().to_lowercase() == name.trim().to_lowercase()
    }
}

/// Field paths into an inventory document.
pub mod paths {
    use super::FieldPath;

    pub fn location(name: &str) -> FieldPath {
        FieldPath::new(["locations", name])
    }

    pub fn qty(location_name: &str) -> FieldPath {
        location(location_name).child("qty")
    }

    pub fn level(location_name: &str, field: &str) -> FieldPath {
        location(location_name).child(field)
    }

    pub fn default_level(field: &str) -> FieldPath {
        let name = match field {
            "par" => "defaultPar",
            "min" => "defaultMin",
            _ => "defaultMax",
        };
        FieldPath::new([name])
    }
}
