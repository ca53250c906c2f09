//! Provider identifier codec
//!
//! Maps `(region, machine id)` to the opaque `vsphere://{region}/{machine-id}`
//! string handed back to the orchestrator, and back again. Decoding never
//! fails: anything that does not look like an identifier we minted comes back
//! as [`Decoded::Malformed`] and the caller falls back to name discovery.

use std::fmt;

use serde::Serialize;

pub const PROVIDER_SCHEME: &str = "vsphere://";

/// Opaque machine handle returned to the orchestrator.
///
/// Only [`encode`] and [`ProviderId::empty`] construct one, so an identifier is
/// never minted for a machine without a native id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// The "no machine" identifier.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn decode(&self) -> Decoded<'_> {
        decode(&self.0)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        id.0
    }
}

/// Result of decoding a provider identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded<'a> {
    Machine { region: &'a str, machine_id: &'a str },
    Malformed,
}

impl<'a> Decoded<'a> {
    pub fn machine_id(&self) -> Option<&'a str> {
        match self {
            Decoded::Machine { machine_id, .. } => Some(machine_id),
            Decoded::Malformed => None,
        }
    }

    pub fn region(&self) -> Option<&'a str> {
        match self {
            Decoded::Machine { region, .. } => Some(region),
            Decoded::Malformed => None,
        }
    }
}

pub fn encode(region: &str, machine_id: &str) -> ProviderId {
    if machine_id.is_empty() {
        return ProviderId::empty();
    }
    ProviderId(format!("{PROVIDER_SCHEME}{region}/{machine_id}"))
}

pub fn decode(provider_id: &str) -> Decoded<'_> {
    let Some(rest) = provider_id.strip_prefix(PROVIDER_SCHEME) else {
        return Decoded::Malformed;
    };
    let mut parts = rest.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(region), Some(machine_id), None) if !region.is_empty() && !machine_id.is_empty() => {
            Decoded::Machine { region, machine_id }
        }
        _ => Decoded::Malformed,
    }
}
