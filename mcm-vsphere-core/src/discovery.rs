//! Discovery engine
//!
//! Resolves a logical machine (name plus possibly stale provider identifier)
//! to the platform's current machine, in order:
//!
//! 1. direct lookup by the native id decoded from the identifier;
//! 2. lookup by display name, which must match zero or one machine;
//!
//! and, for listing, a full scan of the placement scope matching the
//! cluster/role tags. "Not found" is a value (`Ok(None)`), not an error.

use std::collections::BTreeMap;

use tracing::debug;

use crate::codec::{self, Decoded, ProviderId};
use crate::context::OperationContext;
use crate::error::ProviderError;
use crate::platform::{MachineRef, ScanControl, Session};
use crate::spec::{MachineSpec, PlacementScope};
use crate::tags::{ClusterRoleTags, TagValues};

/// Identity of a machine as the orchestrator knows it.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryKey<'a> {
    pub name: &'a str,
    /// Previously issued identifier; may be empty, stale or garbage.
    pub provider_id: &'a str,
}

impl<'a> DiscoveryKey<'a> {
    pub fn new(name: &'a str, provider_id: &'a str) -> Self {
        Self { name, provider_id }
    }

    pub fn by_name(name: &'a str) -> Self {
        Self { name, provider_id: "" }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    ProviderId,
    Name,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub machine: MachineRef,
    pub via: ResolvedVia,
}

pub async fn resolve(
    session: &dyn Session,
    ctx: &OperationContext,
    spec: &MachineSpec,
    key: DiscoveryKey<'_>,
) -> Result<Option<Resolved>, ProviderError> {
    let scope = spec.scope();

    match codec::decode(key.provider_id) {
        Decoded::Machine { region, machine_id } => {
            if region != spec.region {
                // Region is advisory; a stale one does not stop the lookup.
                debug!(
                    name = key.name,
                    id_region = region,
                    spec_region = %spec.region,
                    "provider id region differs from spec region, ignoring"
                );
            }
            if let Some(machine) = ctx.call(session.lookup_by_id(&scope, machine_id)).await? {
                debug!(name = key.name, machine_id, "resolved machine by provider id");
                return Ok(Some(Resolved {
                    machine,
                    via: ResolvedVia::ProviderId,
                }));
            }
            debug!(name = key.name, machine_id, "machine id not in scope, falling back to name");
        }
        Decoded::Malformed if !key.provider_id.is_empty() => {
            debug!(name = key.name, provider_id = key.provider_id, "malformed provider id, falling back to name");
        }
        Decoded::Malformed => {}
    }

    let found = resolve_by_name(session, ctx, &scope, key.name).await?;
    Ok(found.map(|machine| Resolved {
        machine,
        via: ResolvedVia::Name,
    }))
}

/// Name lookup; more than one match is an error, never a silent pick.
pub async fn resolve_by_name(
    session: &dyn Session,
    ctx: &OperationContext,
    scope: &PlacementScope,
    name: &str,
) -> Result<Option<MachineRef>, ProviderError> {
    let mut matches = ctx.call(session.find_by_name(scope, name)).await?;
    match matches.len() {
        0 => {
            debug!(name, %scope, "no machine with this name");
            Ok(None)
        }
        1 => Ok(matches.pop()),
        count => Err(ProviderError::AmbiguousName {
            operation: ctx.operation(),
            name: name.to_string(),
            count,
        }),
    }
}

/// Full scan of the spec's scope. Cost is linear in the number of machines.
pub async fn scan_cluster_machines(
    session: &dyn Session,
    ctx: &OperationContext,
    spec: &MachineSpec,
    tags: &ClusterRoleTags,
) -> Result<BTreeMap<ProviderId, String>, ProviderError> {
    let scope = spec.scope();
    let mut found = BTreeMap::new();
    let mut visited = 0usize;

    {
        let mut visitor = |machine: &MachineRef, values: &TagValues| {
            if ctx.is_cancelled() {
                return ScanControl::Stop;
            }
            visited += 1;
            if tags.matches(values) {
                let id = codec::encode(&spec.region, &machine.machine_id);
                if !id.is_empty() {
                    found.insert(id, machine.name.clone());
                }
            }
            ScanControl::Continue
        };
        ctx.call(session.scan_tagged_machines(&scope, &mut visitor)).await?;
    }

    if ctx.is_cancelled() {
        return Err(ctx.cancelled());
    }
    debug!(%scope, visited, matched = found.len(), "cluster scan complete");
    Ok(found)
}
