//! Stands in for a full Kubernetes manifest parser: accepts exactly the
//! Deployment/Service/Ingress subset this orchestrator supports.

use serde::Deserialize;

use swarmd_core::error::{Error, Result};
use swarmd_core::model::{Deployment, Ingress, Service};

#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
pub enum ManifestKind {
    Deployment(Deployment),
    Service(Service),
    Ingress(Ingress),
}

pub fn parse_manifest(bytes: &[u8]) -> Result<ManifestKind> {
    serde_yaml::from_slice(bytes)
        .map_err(|e| Error::InvalidInput(format!("malformed manifest: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_deployment_manifest() {
        let yaml = r#"
kind: Deployment
namespace: default
name: web
replicas_desired: 2
selector:
  app: web
template:
  id: null
  name: web
  namespace: default
  image: nginx
  state: Pending
  created_at: 2026-01-01T00:00:00Z
pods: []
"#;
        let parsed = parse_manifest(yaml.as_bytes()).unwrap();
        assert!(matches!(parsed, ManifestKind::Deployment(d) if d.name == "web" && d.replicas_desired == 2));
    }

    #[test]
    fn rejects_unknown_kind() {
        let yaml = "kind: Bogus\n";
        assert!(parse_manifest(yaml.as_bytes()).is_err());
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(parse_manifest(b"not: [valid").is_err());
    }
}
