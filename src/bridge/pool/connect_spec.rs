//! Connect specifications and the resolved connection description.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ReplError, ReplResult};
use crate::protocol::Variant;

/// Host used when a connect spec does not name one.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// What the caller asks for when connecting.
///
/// Field names follow the settings file (`lang`, `expr`):
///
/// ```toml
/// [[connections]]
/// tag = "dev"
/// port = 5555
/// lang = "cljs"
/// expr = "\\.cljs$"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectSpec {
    pub tag: String,
    #[serde(default, rename = "lang", skip_serializing_if = "Option::is_none")]
    pub variant: Option<Variant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub port: u16,
    #[serde(default, rename = "expr", skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<String>,
}

impl ConnectSpec {
    pub fn new(tag: impl Into<String>, port: u16) -> Self {
        Self {
            tag: tag.into(),
            variant: None,
            host: None,
            port,
            path_pattern: None,
        }
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = Some(variant);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.path_pattern = Some(pattern.into());
        self
    }

    /// Apply defaults and compile the path matcher.
    pub fn resolve(&self) -> ReplResult<ConnectionInfo> {
        let tag = self.tag.trim();
        if tag.is_empty() {
            return Err(ReplError::config("connection tag must not be empty"));
        }
        let variant = self.variant.unwrap_or_default();
        let pattern = self
            .path_pattern
            .as_deref()
            .unwrap_or(variant.default_path_pattern());
        let path_matcher = Regex::new(pattern).map_err(|source| ReplError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(ConnectionInfo {
            tag: tag.to_string(),
            variant,
            host: self
                .host
                .clone()
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port,
            path_matcher,
        })
    }
}

/// A connect spec with every default applied.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub tag: String,
    pub variant: Variant,
    pub host: String,
    pub port: u16,
    pub path_matcher: Regex,
}

impl ConnectionInfo {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether this connection handles the file at `path`.
    pub fn matches(&self, path: &str) -> bool {
        self.path_matcher.is_match(path)
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}) for files matching '{}'",
            self.tag,
            self.addr(),
            self.variant,
            self.path_matcher.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn resolve_applies_defaults() {
        let info = ConnectSpec::new("dev", 5555).resolve().unwrap();

        assert_eq!(info.tag, "dev");
        assert_eq!(info.variant, Variant::Clojure);
        assert_eq!(info.host, DEFAULT_HOST);
        assert_eq!(info.addr(), "127.0.0.1:5555");
        assert_eq!(info.path_matcher.as_str(), Variant::Clojure.default_path_pattern());
    }

    #[rstest]
    #[case(Variant::Clojure, "src/app/core.clj", true)]
    #[case(Variant::Clojure, "src/app/core.cljc", true)]
    #[case(Variant::Clojure, "deps.edn", true)]
    #[case(Variant::Clojure, "src/app/ui.cljs", false)]
    #[case(Variant::ClojureScript, "src/app/ui.cljs", true)]
    #[case(Variant::ClojureScript, "src/app/core.cljc", true)]
    #[case(Variant::ClojureScript, "src/app/core.clj", false)]
    fn default_matcher_follows_variant(
        #[case] variant: Variant,
        #[case] path: &str,
        #[case] expected: bool,
    ) {
        let info = ConnectSpec::new("t", 1).with_variant(variant).resolve().unwrap();
        assert_eq!(info.matches(path), expected);
    }

    #[test]
    fn explicit_fields_win() {
        let info = ConnectSpec::new("ui", 9000)
            .with_variant(Variant::ClojureScript)
            .with_host("repl.local")
            .with_pattern(r"\.cljs$")
            .resolve()
            .unwrap();

        assert_eq!(
            info.to_string(),
            r"[ui] repl.local:9000 (cljs) for files matching '\.cljs$'"
        );
    }

    #[test]
    fn resolve_rejects_bad_pattern_and_empty_tag() {
        let bad = ConnectSpec::new("dev", 1).with_pattern("(").resolve();
        assert!(matches!(bad, Err(ReplError::InvalidPattern { .. })));

        let empty = ConnectSpec::new("  ", 1).resolve();
        assert!(matches!(empty, Err(ReplError::Config { .. })));
    }

    #[test]
    fn deserializes_settings_field_names() {
        let source = "tag = \"ui\"\nport = 9000\nlang = \"cljs\"\nexpr = \"\\\\.cljs$\"\n";
        let spec: ConnectSpec = toml::from_str(source).unwrap();

        assert_eq!(
            spec,
            ConnectSpec::new("ui", 9000)
                .with_variant(Variant::ClojureScript)
                .with_pattern(r"\.cljs$")
        );
    }
}
