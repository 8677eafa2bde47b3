use crate::config::types::{Config, ForwardingEntry, ProxyMode};
use crate::utils::host::{is_loopback_host, normalize_host};
use crate::utils::validation::{is_empty_or_whitespace, validate_hostname_chars, validate_port_range};
use anyhow::{Result, anyhow};
use regex::Regex;
use std::collections::HashSet;

impl Config {
    /// Check everything that must hold before the proxy accepts a single connection.
    pub fn validate(&self) -> Result<()> {
        let problems = self.collect_problems();
        if problems.is_empty() {
            return Ok(());
        }
        Err(anyhow!("Invalid configuration:\n  - {}", problems.join("\n  - ")))
    }

    fn collect_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for (name, port) in [("plain_port", self.plain_port), ("tls_port", self.tls_port)] {
            if let Err(err) = validate_port_range(port) {
                problems.push(format!("{}: {}", name, err));
            }
        }
        if self.plain_port == self.tls_port {
            problems.push(format!("plain_port and tls_port must differ (both are {})", self.tls_port));
        }
        if let Err(err) = self.plain_addr() {
            problems.push(err.to_string());
        }
        if self.connect_timeout_secs == 0 {
            problems.push("connect_timeout_secs must be at least 1".to_string());
        }
        if self.sni_compat && self.default_sni_host.as_deref().is_none_or(is_empty_or_whitespace) {
            problems.push("sni_compat is enabled but default_sni_host is not set".to_string());
        }

        let defaults = self.forward_table.iter().filter(|e| e.is_default()).count();
        match defaults {
            0 => problems.push("forward_table has no 'default' entry".to_string()),
            1 => {}
            n => problems.push(format!("forward_table has {} 'default' entries, expected exactly one", n)),
        }

        let mut seen = HashSet::new();
        for entry in &self.forward_table {
            if let Err(err) = validate_port_range(entry.port) {
                problems.push(format!("'{}': {}", entry.match_key, err));
            }
            if let Some(problem) = plaintext_problem(entry) {
                problems.push(problem);
            }
            if entry.is_default() {
                if self.mode == ProxyMode::Passthrough && is_empty_or_whitespace(&entry.host) {
                    problems.push("'default': passthrough entries need an upstream host".to_string());
                }
                continue;
            }
            match self.mode {
                ProxyMode::Terminate => {
                    if !validate_hostname_chars(&entry.match_key) {
                        problems.push(format!("'{}' is not a valid hostname", entry.match_key));
                    }
                    if !seen.insert(normalize_host(&entry.match_key)) {
                        problems.push(format!("'{}' is listed more than once", entry.match_key));
                    }
                }
                ProxyMode::Passthrough => {
                    if let Err(err) = Regex::new(&entry.match_key) {
                        problems.push(format!("'{}' is not a valid pattern: {}", entry.match_key, err));
                    }
                    if is_empty_or_whitespace(&entry.host) {
                        problems.push(format!("'{}': passthrough entries need an upstream host", entry.match_key));
                    }
                }
            }
        }
        problems
    }
}

// Cleartext upstreams are only allowed on the local machine.
fn plaintext_problem(entry: &ForwardingEntry) -> Option<String> {
    if entry.tls {
        return None;
    }
    let target = if !entry.host.is_empty() && entry.override_url_host {
        entry.host.as_str()
    } else if entry.is_default() {
        // the request's own host; checked per request
        return None;
    } else {
        entry.match_key.as_str()
    };
    if is_loopback_host(target) {
        None
    } else {
        Some(format!("'{}': plaintext upstream {} is not a loopback address", entry.match_key, target))
    }
}
