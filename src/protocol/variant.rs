//! Protocol dialects spoken by remote prepls.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dialect of a connection. Affects defaults and the submission shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Variant {
    /// JVM Clojure. Each eval is a single self-contained submission.
    #[default]
    #[serde(rename = "clj")]
    Clojure,
    /// ClojureScript. The namespace must be switched with a separate
    /// submission before each eval, and that reply is discarded.
    #[serde(rename = "cljs")]
    ClojureScript,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown variant {0:?}, expected clj or cljs")]
pub struct ParseVariantError(String);

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Clojure => "clj",
            Variant::ClojureScript => "cljs",
        }
    }

    /// Path pattern used when a connect spec gives none.
    pub fn default_path_pattern(&self) -> &'static str {
        match self {
            Variant::Clojure => r"\.(cljc?|edn)$",
            Variant::ClojureScript => r"\.clj[sc]$",
        }
    }

    pub fn requires_double_submit(&self) -> bool {
        matches!(self, Variant::ClojureScript)
    }

    /// Namespace evaluated in when the editor cannot tell.
    pub fn default_namespace(&self) -> &'static str {
        match self {
            Variant::Clojure => "user",
            Variant::ClojureScript => "cljs.user",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clj" | "clojure" => Ok(Variant::Clojure),
            "cljs" | "clojurescript" => Ok(Variant::ClojureScript),
            other => Err(ParseVariantError(other.to_string())),
        }
    }
}
