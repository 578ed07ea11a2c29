//! Stock status classification shared by the dashboard, inventory list and
//! transfer preview.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter};

use crate::errors::ServiceError;
use crate::models::inventory::coerce_stock_value;
use crate::models::{InventoryItem, StockLevels};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StockStatus {
    Critical,
    Low,
    Ok,
    Overstock,
}

impl StockStatus {
    /// Higher is worse: critical > low > overstock > ok.
    pub fn severity(self) -> u8 {
        match self {
            StockStatus::Critical => 3,
            StockStatus::Low => 2,
            StockStatus::Overstock => 1,
            StockStatus::Ok => 0,
        }
    }

    pub fn is_alert(self) -> bool {
        matches!(self, StockStatus::Critical | StockStatus::Low)
    }
}

/// Classifies a quantity against its thresholds; the first matching rule
/// wins and a missing threshold skips its rule.
pub fn classify(qty: i64, levels: StockLevels) -> StockStatus {
    if matches!(levels.min, Some(min) if qty <= min) {
        StockStatus::Critical
    } else if matches!(levels.par, Some(par) if qty < par) {
        StockStatus::Low
    } else if matches!(levels.max, Some(max) if qty > max) {
        StockStatus::Overstock
    } else {
        StockStatus::Ok
    }
}

/// Status of `item` at `location` using location thresholds with item
/// defaults as fallback. An absent location counts as zero stock.
pub fn classify_location(item: &InventoryItem, location: &str) -> StockStatus {
    classify(
        item.qty_at(location).unwrap_or(0),
        item.effective_levels(location),
    )
}

/// Badge for an item: its worst location status.
pub fn worst_status(item: &InventoryItem) -> StockStatus {
    item.locations
        .keys()
        .map(|location| classify_location(item, location))
        .max_by_key(|status| status.severity())
        .unwrap_or(StockStatus::Ok)
}

/// Untyped entry point for loosely typed documents. Numbers and numeric
/// strings are accepted; null leaves a threshold unset.
pub fn classify_values(
    qty: &Value,
    par: &Value,
    min: &Value,
    max: &Value,
) -> Result<StockStatus, ServiceError> {
    let qty = coerce("qty", qty)?.ok_or_else(|| {
        ServiceError::InvalidStockLevels("qty is required".to_string())
    })?;
    let levels = StockLevels {
        par: coerce("par", par)?,
        min: coerce("min", min)?,
        max: coerce("max", max)?,
    };
    Ok(classify(qty, levels))
}

fn coerce(field: &str, value: &Value) -> Result<Option<i64>, ServiceError> {
    coerce_stock_value(field, value).map_err(ServiceError::InvalidStockLevels)
}
