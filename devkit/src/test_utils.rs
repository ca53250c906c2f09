/*!
Test Harness pour le provider vSphere

Facilite l'écriture de tests du provider avec:
- Simulateur d'inventaire pré-configuré (template + identifiants)
- Raccourcis vers les cinq opérations de cycle de vie
- Assertions sur les appels vus par la plateforme et sur les sessions
*/

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use mcm_vsphere_core::simulator::{SimCall, Simulator};
use mcm_vsphere_core::{MachineProvider, MachineSpec, MachineStatus, ProviderError, ProviderId, Secrets};
use tokio_util::sync::CancellationToken;

use crate::fixtures::{sample_secrets, sample_spec, SAMPLE_DATACENTER, SAMPLE_TEMPLATE};

/// Harness de test complet autour de `MachineProvider<Simulator>`
pub struct TestHarness {
    pub simulator: Simulator,
    pub provider: MachineProvider<Simulator>,
    pub spec: MachineSpec,
    pub secrets: Secrets,
    pub cancel: CancellationToken,
}

impl TestHarness {
    /// Crée un harness avec la région "eu-1"
    pub fn new() -> Self {
        Self::with_region("eu-1")
    }

    pub fn with_region(region: &str) -> Self {
        env_logger::try_init().ok(); // Init logging pour tests

        let secrets = sample_secrets();
        let simulator = Simulator::new(SAMPLE_DATACENTER)
            .with_template(SAMPLE_TEMPLATE)
            .with_credentials(&secrets.vsphere_username, &secrets.vsphere_password);

        Self {
            provider: MachineProvider::new(simulator.clone()),
            simulator,
            spec: sample_spec(region),
            secrets,
            cancel: CancellationToken::new(),
        }
    }

    pub async fn create(&self, name: &str) -> Result<ProviderId, ProviderError> {
        self.provider.create_machine(name, &self.spec, &self.secrets, &self.cancel).await
    }

    pub async fn delete(&self, name: &str, provider_id: &str) -> Result<ProviderId, ProviderError> {
        self.provider
            .delete_machine(name, provider_id, &self.spec, &self.secrets, &self.cancel)
            .await
    }

    pub async fn shut_down(&self, name: &str, provider_id: &str) -> Result<ProviderId, ProviderError> {
        self.provider
            .shut_down_machine(name, provider_id, &self.spec, &self.secrets, &self.cancel)
            .await
    }

    pub async fn status(&self, name: &str, provider_id: &str) -> Result<MachineStatus, ProviderError> {
        self.provider
            .get_machine_status(name, provider_id, &self.spec, &self.secrets, &self.cancel)
            .await
    }

    pub async fn list(&self) -> Result<BTreeMap<ProviderId, String>, ProviderError> {
        self.provider.list_machines(&self.spec, &self.secrets, &self.cancel).await
    }

    /// Ajoute une machine hors provider, dans le scope et avec les tags de la spec
    pub fn add_tagged_machine(&self, name: &str) -> String {
        let tags: Vec<(&str, &str)> = self.spec.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        self.add_machine_with_tags(name, &tags)
    }

    /// Ajoute une machine hors provider dans le scope de la spec
    pub fn add_machine_with_tags(&self, name: &str, tags: &[(&str, &str)]) -> String {
        let scope = self.spec.scope();
        let datacenter = scope.datacenter.as_deref().unwrap_or(SAMPLE_DATACENTER);
        let folder = scope.folder.as_deref().unwrap_or(mcm_vsphere_core::simulator::DEFAULT_FOLDER);
        let machine = self.simulator.add_machine(name, datacenter, folder, tags);
        log::info!("🖥️ Added out-of-band machine {} ({})", name, machine.machine_id);
        machine.machine_id
    }

    /// Assert que toutes les sessions ouvertes ont été refermées
    pub fn assert_sessions_closed(&self) -> Result<()> {
        let open = self.simulator.sessions_open();
        if open != 0 {
            anyhow::bail!("{} platform session(s) left open", open);
        }
        log::info!("✅ All {} sessions closed", self.simulator.sessions_opened());
        Ok(())
    }

    /// Assert que la résolution est passée par l'identifiant, sans lookup par nom
    pub fn assert_resolved_by_id(&self) -> Result<()> {
        let calls = self.simulator.calls();
        if !calls.iter().any(|c| matches!(c, SimCall::LookupById { .. })) {
            anyhow::bail!("no lookup by id in {:?}", calls);
        }
        if let Some(c) = calls.iter().find(|c| matches!(c, SimCall::FindByName { .. })) {
            anyhow::bail!("unexpected name lookup {:?}", c);
        }
        Ok(())
    }

    /// Assert qu'un appel plateforme donné a eu lieu
    pub fn assert_called(&self, expected: &SimCall) -> Result<()> {
        let calls = self.simulator.calls();
        if calls.contains(expected) {
            return Ok(());
        }
        anyhow::bail!("expected call {:?} not found in {:?}", expected, calls);
    }

    /// Stats sur les appels collectés
    pub fn get_stats(&self) -> HarnessStats {
        let mut call_counts = HashMap::new();
        for call in self.simulator.calls() {
            let kind = match call {
                SimCall::Clone { .. } => "clone",
                SimCall::LookupById { .. } => "lookup_by_id",
                SimCall::FindByName { .. } => "find_by_name",
                SimCall::Scan => "scan",
                SimCall::TagValues { .. } => "tag_values",
                SimCall::PowerOff { .. } => "power_off",
                SimCall::Destroy { .. } => "destroy",
            };
            *call_counts.entry(kind).or_insert(0) += 1;
        }
        HarnessStats {
            sessions_opened: self.simulator.sessions_opened(),
            machines: self.simulator.machine_count(),
            call_counts,
        }
    }

    /// Oublie les appels enregistrés (l'inventaire est conservé)
    pub fn reset_calls(&self) {
        self.simulator.clear_calls();
        log::info!("🧹 Simulator call log reset");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct HarnessStats {
    pub sessions_opened: usize,
    pub machines: usize,
    pub call_counts: HashMap<&'static str, usize>,
}

impl HarnessStats {
    pub fn print(&self) {
        println!("📊 Harness Statistics:");
        println!("  Sessions opened: {}", self.sessions_opened);
        println!("  Machines in inventory: {}", self.machines);
        for (kind, count) in &self.call_counts {
            println!("    {}: {} calls", kind, count);
        }
    }
}
