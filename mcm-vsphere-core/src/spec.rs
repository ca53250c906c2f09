//! Desired-state descriptor and credentials, as stored by the orchestrator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tags::ClusterRoleTags;

/// Provider spec of one machine class. Immutable input to every operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Opaque region, embedded in provider identifiers.
    pub region: String,
    pub datacenter: Option<String>,
    /// Inventory folder for new machines; lookups and scans are limited to it.
    pub folder: Option<String>,
    pub compute_cluster: Option<String>,
    pub resource_pool: Option<String>,
    pub host_system: Option<String>,
    pub datastore: Option<String>,
    pub datastore_cluster: Option<String>,
    pub network: String,
    /// Distributed switch uuid, when `network` is a distributed port group.
    pub switch_uuid: Option<String>,
    #[serde(rename = "templateVM")]
    pub template_vm: String,
    pub num_cpus: Option<u32>,
    /// Memory in MiB.
    pub memory: Option<u64>,
    /// System disk size in GiB.
    pub system_disk: Option<u64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl MachineSpec {
    pub fn scope(&self) -> PlacementScope {
        PlacementScope {
            datacenter: self.datacenter.clone(),
            folder: self.folder.clone(),
        }
    }

    pub fn cluster_role_tags(&self) -> Option<ClusterRoleTags> {
        ClusterRoleTags::from_tags(&self.tags)
    }
}

/// Datacenter/folder boundary for lookups and scans. `None` means the
/// platform default (first datacenter, whole VM tree).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PlacementScope {
    pub datacenter: Option<String>,
    pub folder: Option<String>,
}

impl PlacementScope {
    pub fn contains(&self, datacenter: &str, folder: &str) -> bool {
        let dc_ok = self.datacenter.as_deref().map_or(true, |dc| dc == datacenter);
        let folder_ok = self.folder.as_deref().map_or(true, |f| f == folder);
        dc_ok && folder_ok
    }
}

impl fmt::Display for PlacementScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.datacenter.as_deref().unwrap_or("*"),
            self.folder.as_deref().unwrap_or("*")
        )
    }
}

/// Platform credentials plus the cloud-init user data for new machines.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secrets {
    pub vsphere_host: String,
    pub vsphere_username: String,
    pub vsphere_password: String,
    #[serde(rename = "vsphereInsecureSSL", default)]
    pub vsphere_insecure_ssl: bool,
    #[serde(default)]
    pub user_data: String,
}

// Never print the password or user data.
impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("vsphere_host", &self.vsphere_host)
            .field("vsphere_username", &self.vsphere_username)
            .field("vsphere_password", &"<redacted>")
            .field("vsphere_insecure_ssl", &self.vsphere_insecure_ssl)
            .field("user_data", &format_args!("<{} bytes>", self.user_data.len()))
            .finish()
    }
}
