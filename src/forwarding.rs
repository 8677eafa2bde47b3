//! Host → upstream routing.
//!
//! Two lookup strategies share one entry type: terminating mode matches exact
//! hostnames case-insensitively, passthrough mode tests regular expressions in
//! declaration order. Both always fall back to the `default` entry.

use crate::config::types::{DEFAULT_ENTRY, ForwardingEntry, ProxyMode};
use crate::utils::host::normalize_host;
use anyhow::{Context, Result, anyhow};
use regex::Regex;
use std::collections::HashMap;

/// Result of a routing lookup.
#[derive(Debug, Clone, Copy)]
pub struct RouteMatch<'a> {
    /// The name that was looked up, normalized the way the table compares it.
    pub key: &'a str,
    pub entry: &'a ForwardingEntry,
    pub is_default: bool,
}

/// Exact hostname table used by the TLS-terminating engine.
#[derive(Debug, Clone)]
pub struct ForwardingTable {
    entries: HashMap<String, ForwardingEntry>,
    default: ForwardingEntry,
}

/// Ordered regex table used by the passthrough engine.
#[derive(Debug, Clone)]
pub struct PatternTable {
    patterns: Vec<(Regex, ForwardingEntry)>,
    default: ForwardingEntry,
}

#[derive(Debug, Clone)]
pub enum RoutingTable {
    Exact(ForwardingTable),
    Pattern(PatternTable),
}

fn find_default(entries: &[ForwardingEntry]) -> Result<ForwardingEntry> {
    entries
        .iter()
        .find(|e| e.is_default())
        .cloned()
        .ok_or_else(|| anyhow!("Forwarding table has no '{}' entry", DEFAULT_ENTRY))
}

impl ForwardingTable {
    pub fn build(entries: &[ForwardingEntry]) -> Result<Self> {
        let default = find_default(entries)?;
        let entries = entries
            .iter()
            .filter(|e| !e.is_default())
            .map(|e| (normalize_host(e.get_match_key()), e.clone()))
            .collect();
        Ok(Self { entries, default })
    }

    pub fn lookup<'a>(&'a self, host: &'a str) -> RouteMatch<'a> {
        let key = normalize_host(host);
        match self.entries.get_key_value(&key) {
            Some((key, entry)) => RouteMatch { key, entry, is_default: false },
            None => RouteMatch { key: host, entry: &self.default, is_default: true },
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PatternTable {
    pub fn build(entries: &[ForwardingEntry]) -> Result<Self> {
        let default = find_default(entries)?;
        let mut patterns = Vec::with_capacity(entries.len());
        for entry in entries.iter().filter(|e| !e.is_default()) {
            let regex = Regex::new(entry.get_match_key()).with_context(|| format!("Invalid forwarding pattern '{}'", entry.get_match_key()))?;
            patterns.push((regex, entry.clone()));
        }
        Ok(Self { patterns, default })
    }

    /// First pattern in declaration order that matches `name` wins.
    pub fn lookup<'a>(&'a self, name: &'a str) -> RouteMatch<'a> {
        for (regex, entry) in &self.patterns {
            if regex.is_match(name) {
                return RouteMatch { key: name, entry, is_default: false };
            }
        }
        RouteMatch { key: name, entry: &self.default, is_default: true }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl RoutingTable {
    pub fn build(mode: ProxyMode, entries: &[ForwardingEntry]) -> Result<Self> {
        Ok(match mode {
            ProxyMode::Terminate => Self::Exact(ForwardingTable::build(entries)?),
            ProxyMode::Passthrough => Self::Pattern(PatternTable::build(entries)?),
        })
    }

    pub fn lookup<'a>(&'a self, name: &'a str) -> RouteMatch<'a> {
        match self {
            Self::Exact(table) => table.lookup(name),
            Self::Pattern(table) => table.lookup(name),
        }
    }

    /// Number of non-default routes.
    pub fn len(&self) -> usize {
        match self {
            Self::Exact(table) => table.len(),
            Self::Pattern(table) => table.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
