//! HTTP handlers. Each module exposes a `router` for its resource group;
//! handlers only translate between JSON and the services on [`AppState`].

pub mod auth;
pub mod dashboard;
pub mod health;
pub mod inventory;
pub mod logs;
pub mod reports;
pub mod staff;
pub mod transfers;

pub use crate::AppState;
