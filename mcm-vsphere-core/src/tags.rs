//! Cluster and role tags used for listing and tag-based discovery.

use std::collections::BTreeMap;

pub const CLUSTER_TAG_PREFIX: &str = "kubernetes.io/cluster/";
pub const ROLE_TAG_PREFIX: &str = "kubernetes.io/role/";

/// Custom-field values of one machine: field name -> string value.
pub type TagValues = BTreeMap<String, String>;

/// The two distinguished tag keys of a machine class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRoleTags {
    pub cluster: String,
    pub role: String,
}

impl ClusterRoleTags {
    /// Picks the first cluster key and the first role key in key order.
    /// `None` unless both are present.
    pub fn from_tags(tags: &BTreeMap<String, String>) -> Option<Self> {
        let cluster = tags.keys().find(|k| k.starts_with(CLUSTER_TAG_PREFIX))?;
        let role = tags.keys().find(|k| k.starts_with(ROLE_TAG_PREFIX))?;
        Some(Self {
            cluster: cluster.clone(),
            role: role.clone(),
        })
    }

    /// Both keys must be present on the machine.
    pub fn matches(&self, values: &TagValues) -> bool {
        values.contains_key(&self.cluster) && values.contains_key(&self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(keys: &[&str]) -> BTreeMap<String, String> {
        keys.iter().map(|k| (k.to_string(), "1".to_string())).collect()
    }

    #[test]
    fn test_extracts_both_keys() {
        let crt = ClusterRoleTags::from_tags(&tags(&[
            "kubernetes.io/cluster/shoot--dev",
            "kubernetes.io/role/node",
            "team",
        ]))
        .unwrap();
        assert_eq!(crt.cluster, "kubernetes.io/cluster/shoot--dev");
        assert_eq!(crt.role, "kubernetes.io/role/node");
    }

    #[test]
    fn test_missing_role_gives_none() {
        assert!(ClusterRoleTags::from_tags(&tags(&["kubernetes.io/cluster/shoot--dev"])).is_none());
        assert!(ClusterRoleTags::from_tags(&tags(&["kubernetes.io/role/node"])).is_none());
        assert!(ClusterRoleTags::from_tags(&BTreeMap::new()).is_none());
    }

    #[test]
    fn test_prefix_must_be_at_start() {
        let t = tags(&["x/kubernetes.io/cluster/a", "kubernetes.io/role/node"]);
        assert!(ClusterRoleTags::from_tags(&t).is_none());
    }

    #[test]
    fn test_first_key_wins() {
        let crt = ClusterRoleTags::from_tags(&tags(&[
            "kubernetes.io/cluster/b",
            "kubernetes.io/cluster/a",
            "kubernetes.io/role/node",
        ]))
        .unwrap();
        assert_eq!(crt.cluster, "kubernetes.io/cluster/a");
    }

    #[test]
    fn test_match_requires_both() {
        let crt = ClusterRoleTags {
            cluster: "kubernetes.io/cluster/a".into(),
            role: "kubernetes.io/role/node".into(),
        };
        assert!(crt.matches(&tags(&["kubernetes.io/cluster/a", "kubernetes.io/role/node"])));
        assert!(!crt.matches(&tags(&["kubernetes.io/cluster/a"])));
        assert!(!crt.matches(&tags(&["kubernetes.io/role/node"])));
        assert!(!crt.matches(&tags(&["kubernetes.io/cluster/b", "kubernetes.io/role/node"])));
    }
}
