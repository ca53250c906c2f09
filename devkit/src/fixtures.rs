/*!
Fixtures partagées par les tests du provider et du plugin

- Provider spec complète (avec tags cluster/role) au format JSON de l'orchestrateur
- Secrets acceptés par le simulateur du harness
- Builder de commandes conformes au protocole du plugin
*/

use mcm_vsphere_core::{MachineSpec, Secrets};
use serde_json::Value;

pub const SAMPLE_TEMPLATE: &str = "ubuntu-22.04";
pub const SAMPLE_DATACENTER: &str = "dc1";
pub const SAMPLE_FOLDER: &str = "shoot--dev";
pub const SAMPLE_CLUSTER_TAG: &str = "kubernetes.io/cluster/shoot--dev";
pub const SAMPLE_ROLE_TAG: &str = "kubernetes.io/role/node";

/// Spec JSON telle que stockée par l'orchestrateur
pub fn sample_spec_json(region: &str) -> Value {
    serde_json::json!({
        "region": region,
        "datacenter": SAMPLE_DATACENTER,
        "folder": SAMPLE_FOLDER,
        "computeCluster": "cluster-a",
        "datastore": "ds-ssd-1",
        "network": "VM Network",
        "templateVM": SAMPLE_TEMPLATE,
        "numCpus": 2,
        "memory": 4096,
        "systemDisk": 20,
        "tags": {
            SAMPLE_CLUSTER_TAG: "1",
            SAMPLE_ROLE_TAG: "1",
            "team": "platform"
        }
    })
}

pub fn sample_spec(region: &str) -> MachineSpec {
    // La fixture est statique, un échec ici est un bug du devkit
    serde_json::from_value(sample_spec_json(region)).expect("sample spec fixture must parse")
}

/// Même spec sans les tags cluster/role (List dégradé en no-op)
pub fn untagged_spec(region: &str) -> MachineSpec {
    let mut spec = sample_spec(region);
    spec.tags.retain(|k, _| k == "team");
    spec
}

pub fn sample_secrets() -> Secrets {
    Secrets {
        vsphere_host: "vcenter.lab.local".to_string(),
        vsphere_username: "provider@vsphere.local".to_string(),
        vsphere_password: "s3cr3t".to_string(),
        vsphere_insecure_ssl: true,
        user_data: "#cloud-config\nhostname: worker\n".to_string(),
    }
}

/// Helper pour créer des commandes formatées selon le protocole du plugin
pub struct CommandBuilder {
    region: String,
}

impl CommandBuilder {
    pub fn new<S: Into<String>>(region: S) -> Self {
        Self { region: region.into() }
    }

    /// Commande create
    pub fn create(&self, request_id: &str, machine_name: &str) -> Value {
        serde_json::json!({
            "action": "create",
            "request_id": request_id,
            "machine_name": machine_name,
            "spec": sample_spec_json(&self.region),
            "secrets": serde_json::to_value(sample_secrets()).unwrap_or_default(),
        })
    }

    /// Commande delete / shutdown / status (mêmes champs)
    pub fn targeted(&self, action: &str, request_id: &str, machine_name: &str, provider_id: &str) -> Value {
        serde_json::json!({
            "action": action,
            "request_id": request_id,
            "machine_name": machine_name,
            "provider_id": provider_id,
            "spec": sample_spec_json(&self.region),
            "secrets": serde_json::to_value(sample_secrets()).unwrap_or_default(),
        })
    }

    /// Commande list
    pub fn list(&self, request_id: &str) -> Value {
        serde_json::json!({
            "action": "list",
            "request_id": request_id,
            "spec": sample_spec_json(&self.region),
            "secrets": serde_json::to_value(sample_secrets()).unwrap_or_default(),
        })
    }
}
