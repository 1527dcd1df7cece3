//! Code generation for requests sent to a prepl.
//!
//! The registry and orchestrator only see the `CodeGenerator` trait. Every
//! generated payload is a single form terminated by `\n`, so each submission
//! yields exactly one `ret`.

use super::edn::{self, EdnError, Value};
use super::variant::Variant;

/// Where a piece of code came from, used to give evaluated code a namespace
/// and accurate line numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceOrigin {
    pub ns: Option<String>,
    pub path: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// Produces the source strings sent to a prepl.
pub trait CodeGenerator: Send + Sync {
    /// Sent once right after connecting.
    fn prelude(&self, variant: Variant) -> String;

    /// Wrap user code for evaluation.
    fn eval(&self, variant: Variant, code: &str, origin: &SourceOrigin) -> String;

    /// Directive that switches namespace. Submitted separately for dialects
    /// that require double submission.
    fn namespace_switch(&self, variant: Variant, ns: Option<&str>) -> String;

    fn doc(&self, variant: Variant, name: &str) -> String;

    fn completions(&self, variant: Variant, ns: Option<&str>, prefix: &str) -> String;

    /// Must evaluate to a `[file line column]` vector.
    fn definition(&self, variant: Variant, name: &str) -> String;

    fn run_tests(&self, variant: Variant, namespaces: &[String]) -> String;

    fn run_all_tests(&self, variant: Variant, pattern: Option<&str>) -> String;

    fn load_file(&self, variant: Variant, path: &str) -> String;

    /// Decode the `:val` text of a `ret`/`tap` frame into `(preamble, payload)`.
    fn parse_response(&self, val: &str) -> Result<(Option<Value>, Value), EdnError>;
}

/// Code generator for Clojure and ClojureScript prepls.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClojureCode;

/// Escape text so it can sit inside a Clojure string literal on one line.
pub fn escape_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

fn test_ns(variant: Variant) -> &'static str {
    match variant {
        Variant::Clojure => "clojure.test",
        Variant::ClojureScript => "cljs.test",
    }
}

fn repl_ns(variant: Variant) -> &'static str {
    match variant {
        Variant::Clojure => "clojure.repl",
        Variant::ClojureScript => "cljs.repl",
    }
}

impl CodeGenerator for ClojureCode {
    fn prelude(&self, variant: Variant) -> String {
        match variant {
            Variant::Clojure => {
                "(require 'clojure.repl 'clojure.string 'clojure.java.io 'clojure.test)\n".to_string()
            }
            Variant::ClojureScript => "(require 'cljs.repl 'clojure.string 'cljs.test)\n".to_string(),
        }
    }

    fn eval(&self, variant: Variant, code: &str, origin: &SourceOrigin) -> String {
        match variant {
            Variant::Clojure => {
                let ns = origin.ns.as_deref().unwrap_or(variant.default_namespace());
                let load = match origin.path.as_deref().filter(|p| !p.is_empty()) {
                    Some(path) => {
                        let file_name = path.rsplit('/').next().unwrap_or(path);
                        format!(
                            "(clojure.lang.Compiler/load rdr \"{}\" \"{}\")",
                            escape_string(path),
                            escape_string(file_name)
                        )
                    }
                    None => "(clojure.lang.Compiler/load rdr)".to_string(),
                };
                format!(
                    "(do (ns {ns}) (let [rdr (doto (clojure.lang.LineNumberingPushbackReader. (java.io.StringReader. \"{code}\")) (.setLineNumber {line}))] (binding [*default-data-reader-fn* tagged-literal] (let [res {load}] (if (seq? res) (doall res) res)))))\n",
                    ns = ns,
                    code = escape_string(code),
                    line = origin.line.unwrap_or(1),
                    load = load,
                )
            }
            Variant::ClojureScript => {
                // A trailing line comment would swallow the closing paren.
                let close = if code.contains(';') { "\n)" } else { ")" };
                format!("(do {}{}\n", code.trim_end(), close)
            }
        }
    }

    fn namespace_switch(&self, variant: Variant, ns: Option<&str>) -> String {
        format!("(in-ns '{})\n", ns.unwrap_or(variant.default_namespace()))
    }

    fn doc(&self, variant: Variant, name: &str) -> String {
        format!("(with-out-str ({}/doc {}))\n", repl_ns(variant), name)
    }

    fn completions(&self, variant: Variant, ns: Option<&str>, prefix: &str) -> String {
        let ns = ns.unwrap_or(variant.default_namespace());
        let vars = match variant {
            Variant::Clojure => format!("(ns-map '{})", ns),
            Variant::ClojureScript => format!("(ns-interns '{})", ns),
        };
        format!(
            "(sort (filter #(clojure.string/starts-with? % \"{}\") (map str (keys {}))))\n",
            escape_string(prefix),
            vars
        )
    }

    fn definition(&self, variant: Variant, name: &str) -> String {
        match variant {
            Variant::Clojure => format!(
                "(let [m (meta (resolve '{})) f (:file m)] (when f [(str (or (clojure.java.io/resource f) f)) (:line m) (:column m)]))\n",
                name
            ),
            Variant::ClojureScript => format!(
                "(let [m (meta (var {}))] [(:file m) (:line m) (:column m)])\n",
                name
            ),
        }
    }

    fn run_tests(&self, variant: Variant, namespaces: &[String]) -> String {
        let quoted = namespaces.join(" ");
        match variant {
            Variant::Clojure => format!(
                "(with-out-str (binding [clojure.test/*test-out* *out*] (apply clojure.test/run-tests (filter find-ns '[{}]))))\n",
                quoted
            ),
            Variant::ClojureScript => {
                let args: Vec<String> = namespaces.iter().map(|ns| format!("'{}", ns)).collect();
                format!("(with-out-str (cljs.test/run-tests {}))\n", args.join(" "))
            }
        }
    }

    fn run_all_tests(&self, variant: Variant, pattern: Option<&str>) -> String {
        let args = pattern
            .map(|p| format!(" #\"{}\"", p.replace('"', "\\\"")))
            .unwrap_or_default();
        match variant {
            Variant::Clojure => format!(
                "(with-out-str (binding [clojure.test/*test-out* *out*] (clojure.test/run-all-tests{})))\n",
                args
            ),
            Variant::ClojureScript => {
                format!("(with-out-str ({}/run-all-tests{}))\n", test_ns(variant), args)
            }
        }
    }

    fn load_file(&self, _variant: Variant, path: &str) -> String {
        format!("(load-file \"{}\")\n", escape_string(path))
    }

    fn parse_response(&self, val: &str) -> Result<(Option<Value>, Value), EdnError> {
        let mut forms = edn::read_all(val)?.into_iter();
        Ok(match (forms.next(), forms.next()) {
            (None, _) => (None, Value::Nil),
            (Some(only), None) => (None, only),
            (Some(preamble), Some(payload)) => (Some(preamble), payload),
        })
    }
}
