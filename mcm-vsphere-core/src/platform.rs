//! Virtualization platform collaborator contracts
//!
//! The core never talks to an SDK directly. A backend implements [`Platform`]
//! to open one [`Session`] per lifecycle operation; every inventory and power
//! call goes through that session, which is closed when the operation ends.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::PlatformError;
use crate::spec::{MachineSpec, PlacementScope, Secrets};
use crate::tags::TagValues;

/// Platform handle of one virtual machine. Never cached across operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineRef {
    /// Managed object reference, e.g. `vm-1042`.
    pub handle: String,
    /// Platform-stable BIOS uuid.
    pub machine_id: String,
    pub name: String,
}

/// Whether a scan keeps visiting machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Stop,
}

pub type ScanVisitor<'a> = dyn FnMut(&MachineRef, &TagValues) -> ScanControl + Send + 'a;

#[async_trait]
pub trait Platform: Send + Sync {
    async fn open_session(&self, secrets: &Secrets) -> Result<Box<dyn Session>, PlatformError>;
}

#[async_trait]
pub trait Session: Send + Sync {
    /// Clones `spec.template_vm` into a machine named `name`, applying the
    /// spec's tags and the user data.
    async fn clone_template(
        &self,
        spec: &MachineSpec,
        name: &str,
        user_data: &str,
    ) -> Result<MachineRef, PlatformError>;

    async fn lookup_by_id(
        &self,
        scope: &PlacementScope,
        machine_id: &str,
    ) -> Result<Option<MachineRef>, PlatformError>;

    /// All machines in scope with this display name. Names are not unique.
    async fn find_by_name(
        &self,
        scope: &PlacementScope,
        name: &str,
    ) -> Result<Vec<MachineRef>, PlatformError>;

    async fn scan_tagged_machines(
        &self,
        scope: &PlacementScope,
        visitor: &mut ScanVisitor<'_>,
    ) -> Result<(), PlatformError>;

    /// Current custom-field tags of one machine, coerced as in a scan.
    async fn tag_values(&self, machine: &MachineRef) -> Result<TagValues, PlatformError>;

    /// Graceful power-off. Already off is success.
    async fn power_off(&self, machine: &MachineRef) -> Result<(), PlatformError>;

    async fn destroy(&self, machine: &MachineRef) -> Result<(), PlatformError>;

    async fn close(&self) -> Result<(), PlatformError>;
}

/// Custom field definition as exposed by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFieldDef {
    pub key: i32,
    pub name: String,
}

/// Raw custom value attached to a machine. Only string values carry tags.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomFieldValue {
    Text { key: i32, value: String },
    Other { key: i32, type_name: String },
}

/// Converts raw custom values into [`TagValues`]. Values with an unknown key or
/// a non-string type are dropped.
pub fn coerce_custom_fields(defs: &[CustomFieldDef], values: &[CustomFieldValue]) -> TagValues {
    let mut out = TagValues::new();
    for value in values {
        match value {
            CustomFieldValue::Text { key, value } => {
                match defs.iter().find(|d| d.key == *key) {
                    Some(def) => {
                        out.insert(def.name.clone(), value.clone());
                    }
                    None => debug!(key, "dropping custom value with unknown field key"),
                }
            }
            CustomFieldValue::Other { key, type_name } => {
                debug!(key, type_name = %type_name, "dropping non-string custom value");
            }
        }
    }
    out
}
