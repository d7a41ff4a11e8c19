//! Hostpanel server library.
//!
//! The serving layer around [`hostpanel_core`]: token authentication, the HTTP and
//! WebSocket API, and the configuration file model.

pub mod api;
pub mod auth;
pub mod config;

pub use config::AppConfig;
