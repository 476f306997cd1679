//! Constants and default values for botdeploy.
//!
//! This module centralizes the fixed file names, permission modes, timings and
//! credential rules used across a reconciliation run.

use std::time::Duration;

// ============================================================================
// Credentials
// ============================================================================

/// Key holding the bot token in the credential file. Required and non-empty.
pub const TOKEN_KEY: &str = "TELEGRAM_BOT_TOKEN";

/// Key holding the administrator chat id. Passed through, never validated here.
pub const ADMIN_CHAT_KEY: &str = "ADMIN_CHAT_ID";

/// Values shipped in example credential files that must never reach the service.
pub const PLACEHOLDER_TOKENS: &[&str] = &[
    "PASTE_TELEGRAM_BOT_TOKEN_HERE",
    "REPLACE_ME",
    "0000000000",
    "YOUR_BOT_TOKEN",
    "changeme",
];

/// Loose shape of a bot token (`<bot id>:<secret>`). Mismatches only warn.
pub const TOKEN_SHAPE_PATTERN: &str = r"^\d+:[A-Za-z0-9_-]+$";

// ============================================================================
// Data Migration
// ============================================================================

/// Legacy state files historically written at the application root.
///
/// This is the union of every file name the bot has ever written there; the
/// configuration can replace it.
pub const DEFAULT_LEGACY_FILES: &[&str] = &[
    "orders.json",
    "prices.json",
    "user_logs.json",
    "orders.xlsx",
    "users.json",
    "referrals.json",
    "feedbacks.json",
    "bonuses.json",
    "settings.json",
    "all_orders.json",
];

/// Extra working directories the bot expects, relative to the application root.
pub const DEFAULT_RUNTIME_DIRS: &[&str] = &["clients", "clients/feedbacks"];

/// Prefix for the temporary copy used by cross-device moves.
pub const MIGRATION_TMP_PREFIX: &str = ".botdeploy-incoming-";

// ============================================================================
// File System Constants
// ============================================================================

/// Mode applied to every directory botdeploy creates.
pub const DIR_MODE: u32 = 0o755;

/// Mode applied to the installed unit file.
pub const UNIT_FILE_MODE: u32 = 0o644;

/// Name of the orchestrator's own append-only log file inside the log dir.
pub const DEPLOY_LOG_FILE: &str = "deploy.log";

/// Name of the JSON report written after every run.
pub const RUN_REPORT_FILE: &str = "last_run.json";

/// Name of the lock file serializing overlapping runs.
pub const LOCK_FILE: &str = "deploy.lock";

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "botdeploy.yaml";

/// Unit store consulted by systemd for administrator-installed units.
pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";

// ============================================================================
// Timing
// ============================================================================

/// How long a run waits for a concurrent run to release the lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between lock acquisition attempts.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Pause between `restart` and the single `verify` poll.
pub const DEFAULT_VERIFY_DELAY: Duration = Duration::from_secs(2);

// ============================================================================
// Diagnostics
// ============================================================================

/// Number of journal entries captured when the service fails.
pub const DEFAULT_TAIL_LINES: usize = 50;

/// Restart policy the shipped unit is expected to declare.
pub const EXPECTED_RESTART_POLICY: &str = "always";

/// Backoff written into generated unit definitions.
pub const DEFAULT_RESTART_SEC: u64 = 5;
