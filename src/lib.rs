//! botdeploy reconciles a chat-bot deployment directory into a running systemd
//! service. A run migrates legacy state into the managed data directory,
//! provisions the bot's runtime environment, installs the shipped unit file and
//! restarts the service, stopping early and successfully whenever credentials or
//! the unit definition are not in place yet.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Well-known names, paths and timings.
pub mod constants;

/// Credential file parsing.
pub mod env_file;

/// Error handling.
pub mod error;

/// Run lock.
pub mod lock;

/// Logging setup and log access.
pub mod logs;

/// Data directory preparation and legacy file migration.
pub mod migrate;

/// Reconciliation run sequencing.
pub mod orchestrator;

/// External command execution.
pub mod process;

/// Runtime environment provisioning.
pub mod provision;

/// Service manager integration and lifecycle state machine.
pub mod service;

/// Test doubles shared by unit and integration tests.
pub mod test_utils;

/// Unit definition parsing, rendering and installation.
pub mod unit;
