//! Cost monitoring service: wires collection, alerting, notification and
//! on-demand calculations behind one [`state::AppState`].

pub mod config;
pub mod monitor;
pub mod rule_seed;
pub mod scheduler;
pub mod sources;
pub mod state;
