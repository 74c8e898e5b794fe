//! Handler configuration
//!
//! The configuration file lists the DaemonSets every managed node must be
//! running before it accepts general workloads, and an optional node
//! selector restricting which nodes are managed. The file may be YAML or
//! JSON; JSON documents are valid YAML and go through the same decoder.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::selector::{is_label_name, NodeSelector, MAX_NAME_LEN};
use crate::{Error, Result, TAINT_KEY_PREFIX};

/// A required background workload, identified by name and namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadWatch {
    /// Name of the owning workload (DaemonSet)
    pub name: String,
    /// Namespace the workload's pods run in
    pub namespace: String,
}

impl WorkloadWatch {
    /// Create a new watch
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Workload identity used as the managed taint value: `<namespace>.<name>`
    pub fn identity(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// Canonical managed taint key: `readygate.dev/<namespace>.<name>`
    pub fn taint_key(&self) -> String {
        format!("{}/{}", TAINT_KEY_PREFIX, self.identity())
    }

    /// Recover the watch from a managed taint key.
    ///
    /// Namespaces never contain a `.`, so the first `.` separates namespace
    /// from name. Returns `None` for keys outside the managed prefix.
    pub fn from_taint_key(key: &str) -> Option<Self> {
        let identity = key
            .strip_prefix(TAINT_KEY_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))?;
        let (namespace, name) = identity.split_once('.')?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for WorkloadWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Raw handler configuration as read from disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerConfig {
    /// Required workloads, in the order their taints are appended
    #[serde(default)]
    pub daemonsets: Vec<WorkloadWatch>,
    /// Node selector expressions, combined into one conjunction
    #[serde(default)]
    pub node_selector: Vec<String>,
}

impl HandlerConfig {
    /// Read and parse a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("unable to read config file {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
    }

    /// Parse a YAML or JSON document
    pub fn parse(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| Error::config(format!("error parsing config: {}", e)))
    }

    /// Validate the configuration and build its immutable runtime form
    pub fn validate(self) -> Result<ValidatedConfig> {
        let mut seen = BTreeSet::new();
        for (i, watch) in self.daemonsets.iter().enumerate() {
            if watch.name.trim().is_empty() {
                return Err(Error::config_for_field(
                    format!("daemonsets[{i}].name"),
                    "must not be empty",
                ));
            }
            if watch.namespace.trim().is_empty() {
                return Err(Error::config_for_field(
                    format!("daemonsets[{i}].namespace"),
                    "must not be empty",
                ));
            }
            if watch.namespace.contains('.') {
                return Err(Error::config_for_field(
                    format!("daemonsets[{i}].namespace"),
                    format!("namespace {:?} must not contain '.'", watch.namespace),
                ));
            }
            // The identity is both the taint key's name part and the taint value
            let identity = watch.identity();
            if !is_label_name(&identity) {
                return Err(Error::config_for_field(
                    format!("daemonsets[{i}]"),
                    format!(
                        "{identity:?} is not a valid taint value (at most {MAX_NAME_LEN} \
                         alphanumerics, '-', '_' or '.', starting and ending alphanumeric)"
                    ),
                ));
            }
            if !seen.insert(watch) {
                return Err(Error::config_for_field(
                    format!("daemonsets[{i}]"),
                    format!("duplicate daemonset {watch}"),
                ));
            }
        }

        let selector = NodeSelector::parse_all(&self.node_selector)?;

        Ok(ValidatedConfig {
            watches: self.daemonsets,
            selector,
        })
    }
}

/// Configuration after validation; immutable for the process lifetime
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedConfig {
    /// Required workloads, in configured order
    pub watches: Vec<WorkloadWatch>,
    /// Nodes outside this selector are left alone
    pub selector: NodeSelector,
}

impl ValidatedConfig {
    /// Load, parse and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        HandlerConfig::from_file(path)?.validate()
    }

    /// Distinct namespaces across all watches, sorted
    pub fn namespaces(&self) -> BTreeSet<&str> {
        self.watches.iter().map(|w| w.namespace.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
daemonsets:
  - name: kiam
    namespace: kube-system
  - name: node-local-dns
    namespace: dns
nodeSelector:
  - node-role.kubernetes.io/node
  - "zone in (a, b)"
"#;

    #[test]
    fn story_yaml_config_loads_in_order() {
        let config = HandlerConfig::parse(YAML).unwrap().validate().unwrap();
        assert_eq!(
            config.watches,
            vec![
                WorkloadWatch::new("kube-system", "kiam"),
                WorkloadWatch::new("dns", "node-local-dns"),
            ]
        );
        assert_eq!(config.selector.requirements().len(), 2);
        assert_eq!(
            config.namespaces().into_iter().collect::<Vec<_>>(),
            vec!["dns", "kube-system"]
        );
    }

    #[test]
    fn json_config_uses_the_same_decoder() {
        let raw = r#"{"daemonsets":[{"name":"kiam","namespace":"kube-system"}]}"#;
        let config = HandlerConfig::parse(raw).unwrap().validate().unwrap();
        assert_eq!(config.watches.len(), 1);
        assert!(config.selector.selects_all());
    }

    #[test]
    fn config_file_is_read_from_disk() {
        let path = std::env::temp_dir().join(format!("readygate-config-{}.yaml", std::process::id()));
        std::fs::write(&path, YAML).unwrap();
        let config = ValidatedConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.watches.len(), 2);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = HandlerConfig::from_file("/nonexistent/readygate.yaml").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn duplicate_watches_are_rejected() {
        let config = HandlerConfig {
            daemonsets: vec![
                WorkloadWatch::new("kube-system", "kiam"),
                WorkloadWatch::new("kube-system", "kiam"),
            ],
            node_selector: vec![],
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.context(), Some("daemonsets[1]"));
    }

    #[test]
    fn dotted_namespace_is_rejected() {
        let config = HandlerConfig {
            daemonsets: vec![WorkloadWatch::new("kube.system", "kiam")],
            node_selector: vec![],
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.context(), Some("daemonsets[0].namespace"));
    }

    #[test]
    fn overlong_identity_is_rejected() {
        let config = HandlerConfig {
            daemonsets: vec![
                WorkloadWatch::new("kube-system", "kiam"),
                WorkloadWatch::new("kube-system", "a".repeat(60)),
            ],
            node_selector: vec![],
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.context(), Some("daemonsets[1]"));
    }

    #[test]
    fn identity_at_the_length_limit_is_accepted() {
        // "kube-system." is 12 characters
        let watch = WorkloadWatch::new("kube-system", "a".repeat(51));
        assert_eq!(watch.identity().len(), 63);
        let config = HandlerConfig {
            daemonsets: vec![watch],
            node_selector: vec![],
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn identity_with_invalid_characters_is_rejected() {
        let config = HandlerConfig {
            daemonsets: vec![WorkloadWatch::new("kube-system", "agent/v2")],
            node_selector: vec![],
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.context(), Some("daemonsets[0]"));
    }

    #[test]
    fn malformed_selector_fails_at_load_time() {
        let config = HandlerConfig {
            daemonsets: vec![],
            node_selector: vec!["zone in (a".to_string()],
        };
        assert!(matches!(config.validate(), Err(Error::Selector { .. })));
    }

    #[test]
    fn taint_key_round_trips() {
        let watch = WorkloadWatch::new("kube-system", "node.agent");
        assert_eq!(watch.taint_key(), "readygate.dev/kube-system.node.agent");
        assert_eq!(WorkloadWatch::from_taint_key(&watch.taint_key()), Some(watch));
    }

    #[test]
    fn foreign_keys_do_not_parse() {
        assert_eq!(WorkloadWatch::from_taint_key("other.co/cordon"), None);
        assert_eq!(WorkloadWatch::from_taint_key("readygate.devx/a.b"), None);
        assert_eq!(WorkloadWatch::from_taint_key("readygate.dev/nodot"), None);
    }
}
