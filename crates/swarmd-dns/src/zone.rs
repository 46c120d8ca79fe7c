//! Cluster-zone name grammar.
//!
//! A record: `<service>.<namespace>.<zone>` or, Kubernetes-compatible,
//! `<service>.<namespace>.svc.<zone>`.
//! SRV record: `_<port-name>._<protocol>.<service>.<namespace>[.svc].<zone>`.
//! Names are case-insensitive.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AQuery {
    pub service: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvQuery {
    pub port_name: String,
    pub protocol: String,
    pub service: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterQuery {
    A(AQuery),
    Srv(SrvQuery),
    /// Syntactically within the zone but neither grammar matched
    /// (unsupported record shape, e.g. a bare zone query).
    Unrecognized,
}

fn strip_trailing_dot(s: &str) -> &str {
    s.strip_suffix('.').unwrap_or(s)
}

/// `true` iff `name` equals `zone` or ends with `.<zone>`, case-insensitively.
pub fn is_in_zone(name: &str, zone: &str) -> bool {
    let name = strip_trailing_dot(name).to_ascii_lowercase();
    let zone = strip_trailing_dot(zone).to_ascii_lowercase();
    name == zone || name.ends_with(&format!(".{zone}"))
}

/// Parses a cluster-zone-qualified name into an A or SRV query, stripping
/// the optional `svc` compatibility label.
pub fn parse(name: &str, zone: &str) -> ClusterQuery {
    let name = strip_trailing_dot(name).to_ascii_lowercase();
    let zone = strip_trailing_dot(zone).to_ascii_lowercase();

    let Some(prefix) = name
        .strip_suffix(&zone)
        .map(|p| p.trim_end_matches('.'))
    else {
        return ClusterQuery::Unrecognized;
    };
    if prefix.is_empty() {
        return ClusterQuery::Unrecognized;
    }

    let labels: Vec<&str> = prefix.split('.').collect();

    // `_<port-name>._<protocol>.<service>.<namespace>[.svc]`
    if labels.len() >= 4 && labels[0].starts_with('_') && labels[1].starts_with('_') {
        let port_name = labels[0].trim_start_matches('_').to_string();
        let protocol = labels[1].trim_start_matches('_').to_string();
        let rest = &labels[2..];
        let rest = strip_svc_suffix(rest);
        if rest.len() == 2 {
            return ClusterQuery::Srv(SrvQuery {
                port_name,
                protocol,
                service: rest[0].to_string(),
                namespace: rest[1].to_string(),
            });
        }
        return ClusterQuery::Unrecognized;
    }

    let rest = strip_svc_suffix(&labels);
    if rest.len() == 2 {
        return ClusterQuery::A(AQuery {
            service: rest[0].to_string(),
            namespace: rest[1].to_string(),
        });
    }
    ClusterQuery::Unrecognized
}

fn strip_svc_suffix<'a>(labels: &'a [&'a str]) -> &'a [&'a str] {
    match labels {
        [rest @ .., svc] if *svc == "svc" => rest,
        rest => rest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_in_zone_matches_exact_and_suffix() {
        assert!(is_in_zone("cluster.local", "cluster.local"));
        assert!(is_in_zone("web.default.cluster.local", "cluster.local"));
        assert!(!is_in_zone("example.com", "cluster.local"));
    }

    #[test]
    fn parses_bare_a_record_name() {
        let q = parse("web.default.cluster.local", "cluster.local");
        assert_eq!(
            q,
            ClusterQuery::A(AQuery {
                service: "web".into(),
                namespace: "default".into(),
            })
        );
    }

    #[test]
    fn parses_svc_compatible_a_record_name() {
        let q = parse("web.default.svc.cluster.local", "cluster.local");
        assert_eq!(
            q,
            ClusterQuery::A(AQuery {
                service: "web".into(),
                namespace: "default".into(),
            })
        );
    }

    #[test]
    fn parses_srv_record_name() {
        let q = parse("_http._tcp.web.default.cluster.local", "cluster.local");
        assert_eq!(
            q,
            ClusterQuery::Srv(SrvQuery {
                port_name: "http".into(),
                protocol: "tcp".into(),
                service: "web".into(),
                namespace: "default".into(),
            })
        );
    }

    #[test]
    fn parses_svc_compatible_srv_record_name() {
        let q = parse("_http._tcp.web.default.svc.cluster.local", "cluster.local");
        assert_eq!(
            q,
            ClusterQuery::Srv(SrvQuery {
                port_name: "http".into(),
                protocol: "tcp".into(),
                service: "web".into(),
                namespace: "default".into(),
            })
        );
    }

    #[test]
    fn names_are_case_insensitive() {
        let q = parse("WEB.DEFAULT.CLUSTER.LOCAL", "cluster.local");
        assert_eq!(
            q,
            ClusterQuery::A(AQuery {
                service: "web".into(),
                namespace: "default".into(),
            })
        );
    }

    #[test]
    fn bare_zone_query_is_unrecognized() {
        assert_eq!(parse("cluster.local", "cluster.local"), ClusterQuery::Unrecognized);
    }
}
