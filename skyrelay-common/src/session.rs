//! Persisted session identifier.
//!
//! The session file is plain `KEY=value` text. Only `SESSION_ID` is
//! recognized; blank lines and `#` comments are ignored.

use std::path::Path;

use crate::error::{Error, Result};

const SESSION_KEY: &str = "SESSION_ID";

/// Session record read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    session_id: String,
}

impl SessionConfig {
    /// Create a session record, rejecting blank identifiers.
    pub fn new(session_id: impl Into<String>) -> Result<Self> {
        let session_id = session_id.into().trim().to_string();
        if session_id.is_empty() {
            return Err(Error::Session("session id is empty".to_string()));
        }
        Ok(Self { session_id })
    }

    /// The opaque session identifier.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Parse session file content.
    ///
    /// Returns `Ok(None)` when no `SESSION_ID` entry is present.
    pub fn parse(content: &str) -> Result<Option<Self>> {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                if key.trim() == SESSION_KEY {
                    return Self::new(value).map(Some);
                }
            }
        }
        Ok(None)
    }

    /// Load the session file. A missing file is not an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Render the file content.
    pub fn render(&self) -> String {
        format!(
            "{}={}\n# This file stores your relay session ID.\n",
            SESSION_KEY, self.session_id
        )
    }

    /// Write the session file, replacing any existing content.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.render())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_line() {
        let content = "# comment\n\nSESSION_ID= abc-123 \nOTHER=x\n";
        let session = SessionConfig::parse(content).unwrap().unwrap();
        assert_eq!(session.session_id(), "abc-123");
    }

    #[test]
    fn test_parse_value_with_equals() {
        let session = SessionConfig::parse("SESSION_ID=a=b").unwrap().unwrap();
        assert_eq!(session.session_id(), "a=b");
    }

    #[test]
    fn test_parse_missing_key() {
        assert_eq!(SessionConfig::parse("# nothing here\nFOO=1").unwrap(), None);
    }

    #[test]
    fn test_parse_blank_value() {
        assert!(matches!(
            SessionConfig::parse("SESSION_ID=   "),
            Err(Error::Session(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge-config.txt");

        assert_eq!(SessionConfig::load(&path).unwrap(), None);

        let session = SessionConfig::new("xyz").unwrap();
        session.save(&path).unwrap();

        let loaded = SessionConfig::load(&path).unwrap().unwrap();
        assert_eq!(loaded, session);
    }
}
