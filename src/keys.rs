//! Key Generator
//!
//! Deterministic, versioned cache keys built from structured parts. Keys for
//! unordered parameter sets (list and aggregate queries) sort parameters by
//! name and hash them, so equivalent queries share a key regardless of the
//! order their parameters were supplied in.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

// == Key Generator Config ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyGeneratorConfig {
    /// Leading segment, omitted when empty
    pub prefix: String,
    pub separator: String,
    /// Trailing version segment, omitted when empty
    pub version: String,
}

impl Default for KeyGeneratorConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            separator: ":".to_string(),
            version: "v1".to_string(),
        }
    }
}

// == Key Generator ==
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    config: KeyGeneratorConfig,
}

impl KeyGenerator {
    pub fn new(config: KeyGeneratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KeyGeneratorConfig {
        &self.config
    }

    /// Joins `parts` with the separator, wrapped in prefix and version.
    ///
    /// `generate(&["user", "42"])` is `user:42:v1` with the default config.
    pub fn generate<S: AsRef<str>>(&self, parts: &[S]) -> String {
        let sep = self.config.separator.as_str();
        let mut segments: Vec<&str> = Vec::with_capacity(parts.len() + 2);
        if !self.config.prefix.is_empty() {
            segments.push(&self.config.prefix);
        }
        segments.extend(parts.iter().map(|p| p.as_ref()));
        if !self.config.version.is_empty() {
            segments.push(&self.config.version);
        }
        segments.join(sep)
    }

    /// Key for a list query over `resource` with unordered `params`.
    pub fn list<I, K, V>(&self, resource: &str, params: I) -> String
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Display,
    {
        let digest = stable_hash(&canonical_params(params));
        self.generate(&["list", resource, digest.as_str()])
    }

    /// Key for an aggregate of `kind` over `resource` with unordered `params`.
    pub fn aggregate<I, K, V>(&self, resource: &str, kind: &str, params: I) -> String
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Display,
    {
        let digest = stable_hash(&canonical_params(params));
        self.generate(&["aggregate", resource, kind, digest.as_str()])
    }

    /// Key for a wrapped function call. `prefix` defaults to `method`.
    pub fn call<A: Display>(&self, prefix: Option<&str>, function: &str, args: &[A]) -> String {
        let mut parts = vec![prefix.unwrap_or("method").to_string(), function.to_string()];
        parts.extend(args.iter().map(ToString::to_string));
        self.generate(parts.as_slice())
    }

    /// Splits a key on the separator. Informational only: hashed segments
    /// cannot be decoded back into parameters.
    pub fn parse(&self, key: &str) -> Vec<String> {
        key.split(self.config.separator.as_str())
            .map(str::to_string)
            .collect()
    }
}

/// Renders params as `a=1&b=2`, sorted by name.
fn canonical_params<I, K, V>(params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Display,
{
    let mut pairs: Vec<(String, String)> = params
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.to_string()))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// 32-bit multiplicative string hash (`h * 31 + c`) rendered in base 36.
pub fn stable_hash(input: &str) -> String {
    let hash = input
        .encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32));
    to_base36(hash.unsigned_abs())
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
