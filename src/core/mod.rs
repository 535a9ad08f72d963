//! Core modules: store handle, schema, configuration, errors, logging, time.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod schemas;
pub mod store;
pub mod time;
