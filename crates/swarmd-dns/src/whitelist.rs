//! Forwarding whitelist. Hosts are stored lowercased with no trailing dot;
//! a query name is allowed if it (or any dot-boundary suffix of it)
//! matches a stored entry.

use std::collections::BTreeSet;

fn normalize(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

#[derive(Debug, Default)]
pub struct Whitelist {
    pub enabled: bool,
    hosts: BTreeSet<String>,
}

impl Whitelist {
    pub fn new(enabled: bool, hosts: impl IntoIterator<Item = String>) -> Self {
        Self {
            enabled,
            hosts: hosts.into_iter().map(|h| normalize(&h)).collect(),
        }
    }

    /// `enabled == false` allows everything; an enabled, empty whitelist
    /// blocks everything.
    pub fn is_allowed(&self, name: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let name = normalize(name);
        let labels: Vec<&str> = name.split('.').collect();
        (0..labels.len()).any(|start| self.hosts.contains(&labels[start..].join(".")))
    }

    pub fn add(&mut self, host: &str) {
        self.hosts.insert(normalize(host));
    }

    pub fn remove(&mut self, host: &str) -> bool {
        self.hosts.remove(&normalize(host))
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn list(&self) -> Vec<String> {
        self.hosts.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_whitelist_allows_everything() {
        let wl = Whitelist::new(false, []);
        assert!(wl.is_allowed("anything.example.com"));
    }

    #[test]
    fn enabled_empty_whitelist_blocks_everything() {
        let wl = Whitelist::new(true, []);
        assert!(!wl.is_allowed("example.com"));
    }

    #[test]
    fn exact_match_is_allowed() {
        let wl = Whitelist::new(true, ["example.com".to_string()]);
        assert!(wl.is_allowed("example.com."));
        assert!(wl.is_allowed("EXAMPLE.com"));
    }

    #[test]
    fn suffix_at_dot_boundary_is_allowed() {
        let wl = Whitelist::new(true, ["example.com".to_string()]);
        assert!(wl.is_allowed("api.example.com"));
        assert!(!wl.is_allowed("notexample.com"));
    }
}
