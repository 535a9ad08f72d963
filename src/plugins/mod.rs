//! Labbook subsystems built on the core store.

pub mod cache;
pub mod experiments;
pub mod transfer;
pub mod views;
