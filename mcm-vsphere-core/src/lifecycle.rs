//! Lifecycle operations exposed to the plugin host
//!
//! Each operation opens its own platform session, resolves the machine
//! through the discovery engine when needed, performs the platform action and
//! re-encodes the result with the spec's region. Nothing is kept between
//! calls, so operations on different machines can run in parallel.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::codec::{self, ProviderId};
use crate::context::OperationContext;
use crate::discovery::{self, DiscoveryKey};
use crate::error::{Operation, ProviderError, Result};
use crate::platform::{Platform, Session};
use crate::session::SessionGuard;
use crate::spec::{MachineSpec, Secrets};

/// Outcome of a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "provider_id", rename_all = "snake_case")]
pub enum MachineStatus {
    Present(ProviderId),
    Absent,
}

pub struct MachineProvider<P> {
    platform: P,
}

impl<P: Platform> MachineProvider<P> {
    pub fn new(platform: P) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Clones a new machine from the spec's template. A machine that already
    /// carries this name is adopted instead of cloned again, but only when it
    /// has the spec's cluster and role tags; otherwise the name is taken.
    pub async fn create_machine(
        &self,
        name: &str,
        spec: &MachineSpec,
        secrets: &Secrets,
        cancel: &CancellationToken,
    ) -> Result<ProviderId> {
        let ctx = OperationContext::new(Operation::Create, cancel);
        let session = SessionGuard::open(&self.platform, secrets, &ctx).await?;
        let result = create_in(&*session, &ctx, name, spec, &secrets.user_data).await;
        session.release().await;
        result
    }

    /// Destroys the machine if it can be found. A machine that is already
    /// gone yields the empty identifier.
    pub async fn delete_machine(
        &self,
        name: &str,
        provider_id: &str,
        spec: &MachineSpec,
        secrets: &Secrets,
        cancel: &CancellationToken,
    ) -> Result<ProviderId> {
        let ctx = OperationContext::new(Operation::Delete, cancel);
        let session = SessionGuard::open(&self.platform, secrets, &ctx).await?;
        let result = delete_in(&*session, &ctx, DiscoveryKey::new(name, provider_id), spec).await;
        session.release().await;
        result
    }

    /// Requests a graceful power-off. Absent or already-off machines succeed.
    pub async fn shut_down_machine(
        &self,
        name: &str,
        provider_id: &str,
        spec: &MachineSpec,
        secrets: &Secrets,
        cancel: &CancellationToken,
    ) -> Result<ProviderId> {
        let ctx = OperationContext::new(Operation::ShutDown, cancel);
        let session = SessionGuard::open(&self.platform, secrets, &ctx).await?;
        let result = shut_down_in(&*session, &ctx, DiscoveryKey::new(name, provider_id), spec).await;
        session.release().await;
        result
    }

    pub async fn get_machine_status(
        &self,
        name: &str,
        provider_id: &str,
        spec: &MachineSpec,
        secrets: &Secrets,
        cancel: &CancellationToken,
    ) -> Result<MachineStatus> {
        let ctx = OperationContext::new(Operation::GetStatus, cancel);
        let session = SessionGuard::open(&self.platform, secrets, &ctx).await?;
        let result = discovery::resolve(&*session, &ctx, spec, DiscoveryKey::new(name, provider_id))
            .await
            .map(|found| match found {
                Some(r) => MachineStatus::Present(codec::encode(&spec.region, &r.machine.machine_id)),
                None => MachineStatus::Absent,
            });
        session.release().await;
        result
    }

    /// Every machine in scope carrying both cluster and role tags of the spec,
    /// as provider id -> machine name. Without both tags the result is empty
    /// and no session is opened.
    pub async fn list_machines(
        &self,
        spec: &MachineSpec,
        secrets: &Secrets,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<ProviderId, String>> {
        let ctx = OperationContext::new(Operation::List, cancel);
        let Some(tags) = spec.cluster_role_tags() else {
            info!("spec has no cluster/role tags, nothing to list");
            return Ok(BTreeMap::new());
        };
        let session = SessionGuard::open(&self.platform, secrets, &ctx).await?;
        let result = discovery::scan_cluster_machines(&*session, &ctx, spec, &tags).await;
        session.release().await;
        result
    }
}

async fn create_in(
    session: &dyn Session,
    ctx: &OperationContext,
    name: &str,
    spec: &MachineSpec,
    user_data: &str,
) -> Result<ProviderId> {
    let scope = spec.scope();
    if let Some(existing) = discovery::resolve_by_name(session, ctx, &scope, name).await? {
        // Only a machine of this cluster and role is ours to adopt.
        let values = ctx.call(session.tag_values(&existing)).await?;
        let owned = spec.cluster_role_tags().is_some_and(|tags| tags.matches(&values));
        if !owned {
            return Err(ProviderError::NameTaken {
                operation: ctx.operation(),
                name: name.to_string(),
                machine_id: existing.machine_id,
            });
        }
        warn!(name, machine_id = %existing.machine_id, "machine already exists, adopting it");
        return Ok(codec::encode(&spec.region, &existing.machine_id));
    }

    let cloned = ctx.call(session.clone_template(spec, name, user_data)).await?;
    info!(name, machine_id = %cloned.machine_id, template = %spec.template_vm, "cloned machine");

    // The clone must be visible through the same path later calls will use.
    let resolved = ctx.call(session.lookup_by_id(&scope, &cloned.machine_id)).await?;
    match resolved {
        Some(machine) => Ok(codec::encode(&spec.region, &machine.machine_id)),
        None => Err(ProviderError::CreatedMachineMissing {
            operation: ctx.operation(),
            name: name.to_string(),
            machine_id: cloned.machine_id,
        }),
    }
}

async fn delete_in(
    session: &dyn Session,
    ctx: &OperationContext,
    key: DiscoveryKey<'_>,
    spec: &MachineSpec,
) -> Result<ProviderId> {
    let Some(found) = discovery::resolve(session, ctx, spec, key).await? else {
        info!(name = key.name, "machine already gone, nothing to delete");
        return Ok(ProviderId::empty());
    };
    let machine = found.machine;
    ctx.call(session.power_off(&machine)).await?;
    ctx.call(session.destroy(&machine)).await?;
    info!(name = key.name, machine_id = %machine.machine_id, "deleted machine");
    Ok(codec::encode(&spec.region, &machine.machine_id))
}

async fn shut_down_in(
    session: &dyn Session,
    ctx: &OperationContext,
    key: DiscoveryKey<'_>,
    spec: &MachineSpec,
) -> Result<ProviderId> {
    let Some(found) = discovery::resolve(session, ctx, spec, key).await? else {
        info!(name = key.name, "machine not found, nothing to shut down");
        return Ok(ProviderId::empty());
    };
    ctx.call(session.power_off(&found.machine)).await?;
    info!(name = key.name, machine_id = %found.machine.machine_id, "machine powered off");
    Ok(codec::encode(&spec.region, &found.machine.machine_id))
}
