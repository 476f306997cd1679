//! Reader for `KEY=VALUE` credential files.
use std::{fs, io::ErrorKind, path::Path, sync::OnceLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::constants::{PLACEHOLDER_TOKENS, TOKEN_SHAPE_PATTERN};

/// Ordered key/value pairs parsed from an env file.
///
/// Keys keep the position of their first definition; a later definition of
/// the same key replaces the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvTable {
    entries: Vec<(String, String)>,
}

impl EnvTable {
    /// Parses env file contents.
    pub fn parse(content: &str) -> Self {
        let mut table = Self::default();
        for raw_line in content.lines() {
            if let Some((key, value)) = parse_line(raw_line) {
                table.insert(key, value);
            }
        }
        table
    }

    /// Loads and parses `path`. A missing file yields an empty table.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err),
        }
    }

    fn insert(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(existing, _)| existing == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    /// Value recorded for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// Iterates entries in definition order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no keys were parsed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Splits one line into a trimmed key and an unquoted value.
///
/// Comments, blank lines and lines without `=` yield `None`.
fn parse_line(raw_line: &str) -> Option<(&str, &str)> {
    let line = raw_line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    Some((key, strip_quotes(value.trim())))
}

/// Removes exactly one pair of matching single or double quotes.
fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2
            && let Some(inner) = value
                .strip_prefix(quote)
                .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Resolves `key` from the env file at `path`.
///
/// Returns an empty string when the file or the key is absent. An unreadable
/// file is logged and treated the same way.
pub fn read_value(path: &Path, key: &str) -> String {
    match EnvTable::load(path) {
        Ok(table) => table.get(key).unwrap_or_default().to_string(),
        Err(err) => {
            warn!("Failed to read env file {}: {}", path.display(), err);
            String::new()
        }
    }
}

/// Verdict on the bot token found in the credential file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenCheck {
    /// No credential file exists.
    MissingFile,
    /// The key is absent or resolves to an empty value.
    Empty,
    /// The value is one of the shipped placeholder strings.
    Placeholder(String),
    /// The token may be used to start the service.
    Usable {
        /// Whether the token looks like `<digits>:<secret>`.
        well_formed: bool,
    },
}

fn token_shape() -> &'static Regex {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE.get_or_init(|| Regex::new(TOKEN_SHAPE_PATTERN).expect("valid token pattern"))
}

/// Classifies the token stored under `key` in the credential file at `path`.
pub fn check_token(path: &Path, key: &str) -> TokenCheck {
    if !path.exists() {
        return TokenCheck::MissingFile;
    }

    let token = read_value(path, key);
    if token.is_empty() {
        return TokenCheck::Empty;
    }

    if PLACEHOLDER_TOKENS.contains(&token.as_str()) {
        return TokenCheck::Placeholder(token);
    }

    let well_formed = token_shape().is_match(&token);
    debug!("Token for {key} resolved (well_formed={well_formed})");
    TokenCheck::Usable { well_formed }
}
