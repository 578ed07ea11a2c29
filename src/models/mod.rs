//! Stored document shapes.

pub mod injury_report;
pub mod inventory;
pub mod inventory_log;
pub mod staff;

pub use injury_report::{CaseSeverity, Discharge, InjuryReport, InjuryReportInput};
pub use inventory::{InventoryItem, LocationStock, StockLevels};
pub use inventory_log::{ActivityKind, InventoryLogEntry, LogType};
pub use staff::{Permission, PermissionSet, StaffSummary, StaffUser};
