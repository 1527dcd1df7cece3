//! Settings file schema.
//!
//! ```toml
//! init_timeout_secs = 30
//! shutdown_timeout_secs = 10
//! eval_timeout_secs = 60
//!
//! [[connections]]
//! tag = "dev"
//! port = 5555
//!
//! [[connections]]
//! tag = "ui"
//! port = 9000
//! lang = "cljs"
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::{ConnectSpec, InitTimeout, ShutdownTimeout};
use crate::error::{ReplError, ReplResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplSettings {
    /// Connections opened at startup.
    #[serde(default)]
    pub connections: Vec<ConnectSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout_secs: Option<u64>,
    /// Unset or 0 waits for every reply until the connection closes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_timeout_secs: Option<u64>,
}

impl ReplSettings {
    pub fn from_toml_str(contents: &str) -> ReplResult<Self> {
        let settings: Self =
            toml::from_str(contents).map_err(|e| ReplError::config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> ReplResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
            .map_err(|e| ReplError::config(format!("{}: {}", path.display(), e)))
    }

    /// Every connection must resolve and tags must be unique.
    pub fn validate(&self) -> ReplResult<()> {
        let mut seen = HashSet::new();
        for spec in &self.connections {
            spec.resolve()?;
            if !seen.insert(spec.tag.as_str()) {
                return Err(ReplError::config(format!(
                    "duplicate connection tag {:?}",
                    spec.tag
                )));
            }
        }
        self.init_timeout()?;
        self.shutdown_timeout()?;
        Ok(())
    }

    pub fn init_timeout(&self) -> ReplResult<InitTimeout> {
        match self.init_timeout_secs {
            Some(secs) => InitTimeout::new(Duration::from_secs(secs)),
            None => Ok(InitTimeout::default()),
        }
    }

    pub fn shutdown_timeout(&self) -> ReplResult<ShutdownTimeout> {
        match self.shutdown_timeout_secs {
            Some(secs) => ShutdownTimeout::new(Duration::from_secs(secs)),
            None => Ok(ShutdownTimeout::default()),
        }
    }

    pub fn eval_timeout(&self) -> Option<Duration> {
        self.eval_timeout_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Variant;
    use std::io::Write;

    #[test]
    fn parses_connections_and_timeouts() {
        let settings = ReplSettings::from_toml_str(
            r#"
            init_timeout_secs = 5
            eval_timeout_secs = 60

            [[connections]]
            tag = "dev"
            port = 5555

            [[connections]]
            tag = "ui"
            host = "10.0.0.2"
            port = 9000
            lang = "cljs"
            "#,
        )
        .unwrap();

        assert_eq!(settings.connections.len(), 2);
        assert_eq!(settings.connections[1].variant, Some(Variant::ClojureScript));
        assert_eq!(settings.init_timeout().unwrap().as_duration(), Duration::from_secs(5));
        assert_eq!(settings.shutdown_timeout().unwrap(), ShutdownTimeout::default());
        assert_eq!(settings.eval_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn empty_file_is_default() {
        let settings = ReplSettings::from_toml_str("").unwrap();
        assert_eq!(settings, ReplSettings::default());
        assert_eq!(settings.eval_timeout(), None);
    }

    #[test]
    fn zero_eval_timeout_means_unbounded() {
        let settings = ReplSettings::from_toml_str("eval_timeout_secs = 0").unwrap();
        assert_eq!(settings.eval_timeout(), None);
    }

    #[test]
    fn rejects_invalid_settings() {
        let duplicate = "[[connections]]\ntag = \"a\"\nport = 1\n[[connections]]\ntag = \"a\"\nport = 2\n";
        let bad_lang = "[[connections]]\ntag = \"a\"\nport = 1\nlang = \"python\"\n";
        let bad_timeout = "init_timeout_secs = 0";
        let bad_pattern = "[[connections]]\ntag = \"a\"\nport = 1\nexpr = \"(\"\n";

        for contents in [duplicate, bad_lang, bad_timeout, bad_pattern] {
            assert!(
                ReplSettings::from_toml_str(contents).is_err(),
                "should reject: {}",
                contents
            );
        }
    }

    #[test]
    fn load_reads_file_and_names_it_in_errors() {
        let mut good = tempfile::NamedTempFile::new().unwrap();
        writeln!(good, "[[connections]]\ntag = \"dev\"\nport = 5555").unwrap();
        assert_eq!(ReplSettings::load(good.path()).unwrap().connections.len(), 1);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "connections = 3").unwrap();
        let err = ReplSettings::load(bad.path()).unwrap_err();
        assert!(err.to_string().contains(&bad.path().display().to_string()));
    }
}
