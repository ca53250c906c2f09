/*!
# MCM vSphere DevKit - Harness et fixtures pour le développement du provider

Bibliothèque facilitant les tests du provider avec:
- Harness branché sur le simulateur d'inventaire (pas de vCenter requis)
- Fixtures de provider spec et de secrets
- Builders de commandes JSON pour le plugin MQTT
*/

pub mod fixtures;
pub mod test_utils;

pub use fixtures::{sample_secrets, sample_spec, untagged_spec, CommandBuilder, SAMPLE_TEMPLATE};
pub use test_utils::TestHarness;
