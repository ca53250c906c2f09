//! In-memory vSphere inventory simulator
//!
//! Implements [`Platform`] over a shared inventory so the provider can run
//! without a vCenter: templates, datacenter/folder placement, custom fields
//! stored as raw typed values, power state. Every session call is recorded,
//! and failures can be injected one call at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PlatformError;
use crate::platform::{
    coerce_custom_fields, CustomFieldDef, CustomFieldValue, MachineRef, Platform, ScanControl,
    ScanVisitor, Session,
};
use crate::spec::{MachineSpec, PlacementScope, Secrets};
use crate::tags::TagValues;

pub const DEFAULT_FOLDER: &str = "vm";

/// Session-level call, in the order the simulator saw them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    Clone { name: String },
    LookupById { machine_id: String },
    FindByName { name: String },
    Scan,
    TagValues { handle: String },
    PowerOff { handle: String },
    Destroy { handle: String },
}

/// One simulated virtual machine.
#[derive(Debug, Clone)]
pub struct SimMachine {
    pub handle: String,
    pub machine_id: String,
    pub name: String,
    pub datacenter: String,
    pub folder: String,
    pub powered_on: bool,
    pub custom_values: Vec<CustomFieldValue>,
    /// Invisible to lookups and scans (clone finished but inventory lags).
    pub hidden: bool,
}

impl SimMachine {
    fn to_ref(&self) -> MachineRef {
        MachineRef {
            handle: self.handle.clone(),
            machine_id: self.machine_id.clone(),
            name: self.name.clone(),
        }
    }

    fn visible_in(&self, scope: &PlacementScope) -> bool {
        !self.hidden && scope.contains(&self.datacenter, &self.folder)
    }
}

#[derive(Debug, Default)]
struct Faults {
    reject_auth: bool,
    refuse_connect: bool,
    fail_next_clone: Option<String>,
    fail_next_power_off: Option<String>,
    fail_next_destroy: Option<String>,
    hide_next_clone: bool,
}

#[derive(Debug)]
struct Inventory {
    default_datacenter: String,
    templates: Vec<String>,
    machines: Vec<SimMachine>,
    field_defs: Vec<CustomFieldDef>,
    next_handle: u64,
    next_field_key: i32,
    credentials: Option<(String, String)>,
    latency: Option<Duration>,
    faults: Faults,
    calls: Vec<SimCall>,
    sessions_opened: usize,
    sessions_closed: usize,
}

impl Inventory {
    fn field_key(&mut self, name: &str) -> i32 {
        if let Some(def) = self.field_defs.iter().find(|d| d.name == name) {
            return def.key;
        }
        let key = self.next_field_key;
        self.next_field_key += 1;
        self.field_defs.push(CustomFieldDef {
            key,
            name: name.to_string(),
        });
        key
    }

    fn insert_machine(
        &mut self,
        name: &str,
        datacenter: &str,
        folder: &str,
        tags: &[(&str, &str)],
    ) -> SimMachine {
        let handle = format!("vm-{}", self.next_handle);
        self.next_handle += 1;
        let custom_values = tags
            .iter()
            .map(|(k, v)| CustomFieldValue::Text {
                key: self.field_key(k),
                value: v.to_string(),
            })
            .collect();
        let machine = SimMachine {
            handle,
            machine_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            datacenter: datacenter.to_string(),
            folder: folder.to_string(),
            powered_on: true,
            custom_values,
            hidden: false,
        };
        self.machines.push(machine.clone());
        machine
    }
}

/// Cheap to clone; clones share the inventory.
#[derive(Debug, Clone)]
pub struct Simulator {
    inventory: Arc<Mutex<Inventory>>,
}

impl Simulator {
    pub fn new(default_datacenter: &str) -> Self {
        Self {
            inventory: Arc::new(Mutex::new(Inventory {
                default_datacenter: default_datacenter.to_string(),
                templates: Vec::new(),
                machines: Vec::new(),
                field_defs: Vec::new(),
                next_handle: 1000,
                next_field_key: 100,
                credentials: None,
                latency: None,
                faults: Faults::default(),
                calls: Vec::new(),
                sessions_opened: 0,
                sessions_closed: 0,
            })),
        }
    }

    pub fn with_template(self, name: &str) -> Self {
        self.inventory.lock().templates.push(name.to_string());
        self
    }

    /// Only these credentials open a session. Without it, any are accepted.
    pub fn with_credentials(self, username: &str, password: &str) -> Self {
        self.inventory.lock().credentials = Some((username.to_string(), password.to_string()));
        self
    }

    /// Delay applied to every session call.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.inventory.lock().latency = Some(latency);
        self
    }

    /// Adds a machine out-of-band (not through a session).
    pub fn add_machine(&self, name: &str, datacenter: &str, folder: &str, tags: &[(&str, &str)]) -> MachineRef {
        self.inventory.lock().insert_machine(name, datacenter, folder, tags).to_ref()
    }

    /// Attaches a custom value of a non-string type.
    pub fn add_untyped_field(&self, machine_id: &str, field: &str, type_name: &str) {
        let mut inv = self.inventory.lock();
        let key = inv.field_key(field);
        if let Some(m) = inv.machines.iter_mut().find(|m| m.machine_id == machine_id) {
            m.custom_values.push(CustomFieldValue::Other {
                key,
                type_name: type_name.to_string(),
            });
        }
    }

    /// Deletes a machine out-of-band.
    pub fn remove_machine(&self, machine_id: &str) -> bool {
        let mut inv = self.inventory.lock();
        let before = inv.machines.len();
        inv.machines.retain(|m| m.machine_id != machine_id);
        inv.machines.len() < before
    }

    pub fn set_power(&self, machine_id: &str, on: bool) {
        if let Some(m) = self.inventory.lock().machines.iter_mut().find(|m| m.machine_id == machine_id) {
            m.powered_on = on;
        }
    }

    pub fn machine(&self, machine_id: &str) -> Option<SimMachine> {
        self.inventory.lock().machines.iter().find(|m| m.machine_id == machine_id).cloned()
    }

    pub fn machines_named(&self, name: &str) -> Vec<SimMachine> {
        self.inventory.lock().machines.iter().filter(|m| m.name == name).cloned().collect()
    }

    pub fn machine_count(&self) -> usize {
        self.inventory.lock().machines.len()
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.inventory.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inventory.lock().calls.clear();
    }

    pub fn sessions_opened(&self) -> usize {
        self.inventory.lock().sessions_opened
    }

    /// Sessions opened and not yet closed.
    pub fn sessions_open(&self) -> usize {
        let inv = self.inventory.lock();
        inv.sessions_opened - inv.sessions_closed
    }

    pub fn reject_auth(&self, reject: bool) {
        self.inventory.lock().faults.reject_auth = reject;
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.inventory.lock().faults.refuse_connect = refuse;
    }

    pub fn fail_next_clone(&self, reason: &str) {
        self.inventory.lock().faults.fail_next_clone = Some(reason.to_string());
    }

    pub fn fail_next_power_off(&self, reason: &str) {
        self.inventory.lock().faults.fail_next_power_off = Some(reason.to_string());
    }

    pub fn fail_next_destroy(&self, reason: &str) {
        self.inventory.lock().faults.fail_next_destroy = Some(reason.to_string());
    }

    /// The next cloned machine exists but no lookup can see it.
    pub fn hide_next_clone(&self) {
        self.inventory.lock().faults.hide_next_clone = true;
    }
}

#[async_trait]
impl Platform for Simulator {
    async fn open_session(&self, secrets: &Secrets) -> Result<Box<dyn Session>, PlatformError> {
        let mut inv = self.inventory.lock();
        if inv.faults.refuse_connect {
            return Err(PlatformError::Connect(format!("{}: connection refused", secrets.vsphere_host)));
        }
        let accepted = match &inv.credentials {
            Some((user, pass)) => *user == secrets.vsphere_username && *pass == secrets.vsphere_password,
            None => true,
        };
        if inv.faults.reject_auth || !accepted {
            return Err(PlatformError::Auth(format!(
                "cannot log in as {:?}",
                secrets.vsphere_username
            )));
        }
        inv.sessions_opened += 1;
        Ok(Box::new(SimSession {
            inventory: Arc::clone(&self.inventory),
            closed: AtomicBool::new(false),
        }))
    }
}

struct SimSession {
    inventory: Arc<Mutex<Inventory>>,
    closed: AtomicBool,
}

impl SimSession {
    /// Latency first (without holding the lock), then the closed check and
    /// the call record.
    async fn enter(&self, call: SimCall) -> Result<(), PlatformError> {
        let latency = self.inventory.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(PlatformError::Inventory("session is closed".into()));
        }
        self.inventory.lock().calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl Session for SimSession {
    async fn clone_template(
        &self,
        spec: &MachineSpec,
        name: &str,
        _user_data: &str,
    ) -> Result<MachineRef, PlatformError> {
        self.enter(SimCall::Clone { name: name.to_string() }).await?;
        let mut inv = self.inventory.lock();
        if let Some(reason) = inv.faults.fail_next_clone.take() {
            return Err(PlatformError::Clone(reason));
        }
        if !inv.templates.iter().any(|t| *t == spec.template_vm) {
            return Err(PlatformError::Clone(format!("template {:?} not found", spec.template_vm)));
        }
        let datacenter = spec.datacenter.clone().unwrap_or_else(|| inv.default_datacenter.clone());
        let folder = spec.folder.clone().unwrap_or_else(|| DEFAULT_FOLDER.to_string());
        if inv
            .machines
            .iter()
            .any(|m| m.name == name && m.datacenter == datacenter && m.folder == folder)
        {
            return Err(PlatformError::Clone(format!("name {name:?} already exists in {datacenter}/{folder}")));
        }

        let tags: Vec<(&str, &str)> = spec.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let hide = std::mem::take(&mut inv.faults.hide_next_clone);
        let mut machine = inv.insert_machine(name, &datacenter, &folder, &tags);
        if hide {
            machine.hidden = true;
            if let Some(m) = inv.machines.iter_mut().find(|m| m.handle == machine.handle) {
                m.hidden = true;
            }
        }
        info!(name, handle = %machine.handle, template = %spec.template_vm, "simulator cloned machine");
        Ok(machine.to_ref())
    }

    async fn lookup_by_id(
        &self,
        scope: &PlacementScope,
        machine_id: &str,
    ) -> Result<Option<MachineRef>, PlatformError> {
        self.enter(SimCall::LookupById { machine_id: machine_id.to_string() }).await?;
        let inv = self.inventory.lock();
        Ok(inv
            .machines
            .iter()
            .find(|m| m.machine_id == machine_id && m.visible_in(scope))
            .map(SimMachine::to_ref))
    }

    async fn find_by_name(
        &self,
        scope: &PlacementScope,
        name: &str,
    ) -> Result<Vec<MachineRef>, PlatformError> {
        self.enter(SimCall::FindByName { name: name.to_string() }).await?;
        let inv = self.inventory.lock();
        Ok(inv
            .machines
            .iter()
            .filter(|m| m.name == name && m.visible_in(scope))
            .map(SimMachine::to_ref)
            .collect())
    }

    async fn scan_tagged_machines(
        &self,
        scope: &PlacementScope,
        visitor: &mut ScanVisitor<'_>,
    ) -> Result<(), PlatformError> {
        self.enter(SimCall::Scan).await?;
        // Snapshot first; the visitor runs without the inventory lock.
        let snapshot: Vec<_> = {
            let inv = self.inventory.lock();
            inv.machines
                .iter()
                .filter(|m| m.visible_in(scope))
                .map(|m| (m.to_ref(), coerce_custom_fields(&inv.field_defs, &m.custom_values)))
                .collect()
        };
        for (machine, values) in &snapshot {
            if visitor(machine, values) == ScanControl::Stop {
                debug!("scan stopped by visitor");
                break;
            }
        }
        Ok(())
    }

    async fn tag_values(&self, machine: &MachineRef) -> Result<TagValues, PlatformError> {
        self.enter(SimCall::TagValues { handle: machine.handle.clone() }).await?;
        let inv = self.inventory.lock();
        let m = inv
            .machines
            .iter()
            .find(|m| m.handle == machine.handle)
            .ok_or_else(|| PlatformError::Inventory(format!("{} not found", machine.handle)))?;
        Ok(coerce_custom_fields(&inv.field_defs, &m.custom_values))
    }

    async fn power_off(&self, machine: &MachineRef) -> Result<(), PlatformError> {
        self.enter(SimCall::PowerOff { handle: machine.handle.clone() }).await?;
        let mut inv = self.inventory.lock();
        if let Some(reason) = inv.faults.fail_next_power_off.take() {
            return Err(PlatformError::PowerOp(reason));
        }
        let m = inv
            .machines
            .iter_mut()
            .find(|m| m.handle == machine.handle)
            .ok_or_else(|| PlatformError::PowerOp(format!("{} not found", machine.handle)))?;
        m.powered_on = false;
        Ok(())
    }

    async fn destroy(&self, machine: &MachineRef) -> Result<(), PlatformError> {
        self.enter(SimCall::Destroy { handle: machine.handle.clone() }).await?;
        let mut inv = self.inventory.lock();
        if let Some(reason) = inv.faults.fail_next_destroy.take() {
            return Err(PlatformError::Destroy(reason));
        }
        let idx = inv
            .machines
            .iter()
            .position(|m| m.handle == machine.handle)
            .ok_or_else(|| PlatformError::Destroy(format!("{} not found", machine.handle)))?;
        if inv.machines[idx].powered_on {
            return Err(PlatformError::Destroy(format!("{} is powered on", machine.handle)));
        }
        inv.machines.remove(idx);
        Ok(())
    }

    async fn close(&self) -> Result<(), PlatformError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.inventory.lock().sessions_closed += 1;
        }
        Ok(())
    }
}
