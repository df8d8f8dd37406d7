//! Pensieve API Library
//!
//! Exposes the control panel's backup scheduling core for use by tests
//! and external integrations.

// Allow dead code for library modules that may be used by API consumers
#![allow(dead_code)]

// Core modules
pub mod config;
pub mod error;

// Backup scheduling
pub mod backup;

// Database
pub mod db;

// Runtime support
pub mod logging;
pub mod shutdown;
