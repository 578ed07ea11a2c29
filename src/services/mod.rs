// Stock ledger and the operations built on it
pub mod inventory;
pub mod ledger;
pub mod transfer;

// Status classification shared by every view
pub mod status;

// Read-side views
pub mod dashboard;
pub mod inventory_logs;

// Staff roster and sign-in
pub mod staff;

// Injury reports
pub mod reports;
