//! Client-side query and silence engine for an Alertmanager dashboard.

pub mod app;
pub mod config;
pub mod fetch;
pub mod filters;
pub mod protocol;
pub mod query;
pub mod silence;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;
