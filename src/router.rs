//! Upstream routing table (client side): resolves an inbound virtual host
//! to an upstream base URL. Built once from the `--upstream` CLI mapping and
//! immutable for the lifetime of the process.

use std::collections::HashMap;

/// Key of the default entry (matches any host not explicitly mapped).
const DEFAULT_KEY: &str = "";

#[derive(Debug, Clone)]
pub struct UpstreamRouter {
    table: HashMap<String, String>,
}

impl UpstreamRouter {
    /// Parses the `upstream` CLI grammar:
    /// `upstream := entry ("," entry)*`, `entry := value | key "=" value`.
    /// A bare value sets the default (empty-key) entry. Whitespace around
    /// keys and values is trimmed.
    pub fn parse(spec: &str) -> Self {
        let mut table = HashMap::new();
        for entry in spec.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match entry.split_once('=') {
                Some((key, value)) => {
                    table.insert(key.trim().to_string(), value.trim().to_string());
                }
                None => {
                    table.insert(DEFAULT_KEY.to_string(), entry.to_string());
                }
            }
        }
        Self { table }
    }

    /// `resolve(host)`: exact match, then the default entry, then empty.
    pub fn resolve(&self, host: &str) -> &str {
        self.table
            .get(host)
            .or_else(|| self.table.get(DEFAULT_KEY))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn has_route_for(&self, host: &str) -> bool {
        !self.resolve(host).is_empty()
    }
}

/// Builds the forwarded URI: `base_url + path`, with the raw query appended
/// verbatim (including the `?`) when the original request carried one.
pub fn forwarded_uri(base_url: &str, target: &str) -> String {
    format!("{base_url}{target}")
}
