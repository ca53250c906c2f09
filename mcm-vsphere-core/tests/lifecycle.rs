//! Lifecycle scenarios against the simulated inventory.

use std::time::Duration;

use mcm_vsphere_core::simulator::SimCall;
use mcm_vsphere_core::{encode, MachineStatus, PlatformError, ProviderError, ProviderId};
use mcm_vsphere_devkit::{untagged_spec, TestHarness};

#[tokio::test]
async fn test_create_then_status_uses_identifier() {
    let harness = TestHarness::new();

    let id = harness.create("worker-0").await.unwrap();
    let machine = harness.simulator.machines_named("worker-0").pop().unwrap();
    assert_eq!(id, encode("eu-1", &machine.machine_id));
    assert!(machine.powered_on);

    harness.reset_calls();
    let status = harness.status("worker-0", id.as_str()).await.unwrap();
    assert_eq!(status, MachineStatus::Present(id));
    harness.assert_resolved_by_id().unwrap();
    harness.assert_sessions_closed().unwrap();
}

#[tokio::test]
async fn test_delete_by_name_without_identifier() {
    let harness = TestHarness::new();
    let machine_id = harness.add_tagged_machine("worker-1");

    let id = harness.delete("worker-1", "").await.unwrap();
    assert_eq!(id, encode("eu-1", &machine_id));
    assert!(harness.simulator.machine(&machine_id).is_none());
    harness
        .assert_called(&SimCall::FindByName { name: "worker-1".into() })
        .unwrap();
    harness.assert_sessions_closed().unwrap();
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let harness = TestHarness::new();
    let id = harness.create("worker-2").await.unwrap();

    assert_eq!(harness.delete("worker-2", id.as_str()).await.unwrap(), id);
    let again = harness.delete("worker-2", id.as_str()).await.unwrap();
    assert!(again.is_empty());
    assert_eq!(harness.simulator.machine_count(), 0);
    harness.assert_sessions_closed().unwrap();
}

#[tokio::test]
async fn test_status_of_missing_machine_is_absent() {
    let harness = TestHarness::new();
    let machine_id = harness.add_tagged_machine("worker-3");
    let id = encode("eu-1", &machine_id);
    assert!(harness.simulator.remove_machine(&machine_id));

    let status = harness.status("worker-3", id.as_str()).await.unwrap();
    assert_eq!(status, MachineStatus::Absent);
}

#[tokio::test]
async fn test_stale_identifier_resolves_by_name() {
    let harness = TestHarness::new();
    let machine_id = harness.add_tagged_machine("worker-4");
    let stale = encode("eu-1", "4c4c4544-0000-0000-0000-000000000000");

    let status = harness.status("worker-4", stale.as_str()).await.unwrap();
    assert_eq!(status, MachineStatus::Present(encode("eu-1", &machine_id)));
}

#[tokio::test]
async fn test_malformed_identifier_resolves_by_name() {
    let harness = TestHarness::new();
    let machine_id = harness.add_tagged_machine("worker-5");

    let status = harness.status("worker-5", "aws:///eu-1/i-123").await.unwrap();
    assert_eq!(status, MachineStatus::Present(encode("eu-1", &machine_id)));
    assert!(!harness
        .simulator
        .calls()
        .iter()
        .any(|c| matches!(c, SimCall::LookupById { .. })));
}

#[tokio::test]
async fn test_identifier_follows_spec_region() {
    let mut harness = TestHarness::new();
    let id = harness.create("worker-6").await.unwrap();
    let machine_id = id.decode().machine_id().unwrap().to_string();

    harness.spec.region = "eu-2".to_string();
    let status = harness.status("worker-6", id.as_str()).await.unwrap();
    assert_eq!(status, MachineStatus::Present(encode("eu-2", &machine_id)));
}

#[tokio::test]
async fn test_duplicate_names_fail_without_action() {
    let harness = TestHarness::new();
    harness.add_tagged_machine("worker-7");
    harness.add_tagged_machine("worker-7");

    let err = harness.delete("worker-7", "").await.unwrap_err();
    assert!(matches!(err, ProviderError::AmbiguousName { count: 2, .. }));
    assert_eq!(err.code(), "ambiguous_name");
    assert_eq!(harness.simulator.machine_count(), 2);
    assert!(!harness
        .simulator
        .calls()
        .iter()
        .any(|c| matches!(c, SimCall::PowerOff { .. } | SimCall::Destroy { .. })));
    harness.assert_sessions_closed().unwrap();
}

#[tokio::test]
async fn test_create_adopts_existing_machine() {
    let harness = TestHarness::new();
    let machine_id = harness.add_tagged_machine("worker-8");

    let id = harness.create("worker-8").await.unwrap();
    assert_eq!(id, encode("eu-1", &machine_id));
    assert_eq!(harness.simulator.machines_named("worker-8").len(), 1);
    assert!(!harness
        .simulator
        .calls()
        .iter()
        .any(|c| matches!(c, SimCall::Clone { .. })));
}

#[tokio::test]
async fn test_create_refuses_machine_of_another_cluster() {
    let harness = TestHarness::new();
    let foreign = harness.add_machine_with_tags(
        "worker-8b",
        &[
            ("kubernetes.io/cluster/other-shoot", "1"),
            ("kubernetes.io/role/node", "1"),
        ],
    );

    let err = harness.create("worker-8b").await.unwrap_err();
    match &err {
        ProviderError::NameTaken { name, machine_id, .. } => {
            assert_eq!(name, "worker-8b");
            assert_eq!(machine_id, &foreign);
        }
        other => panic!("expected name taken, got {other:?}"),
    }
    assert_eq!(err.code(), "name_taken");
    assert!(!harness
        .simulator
        .calls()
        .iter()
        .any(|c| matches!(c, SimCall::Clone { .. })));
    harness.assert_sessions_closed().unwrap();

    let machine = harness.simulator.machine(&foreign).unwrap();
    assert!(machine.powered_on);
    assert!(harness.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_refuses_untagged_machine_with_same_name() {
    let harness = TestHarness::new();
    harness.add_machine_with_tags("worker-8c", &[]);

    let err = harness.create("worker-8c").await.unwrap_err();
    assert!(matches!(err, ProviderError::NameTaken { .. }));
    assert_eq!(harness.simulator.machines_named("worker-8c").len(), 1);
}

#[tokio::test]
async fn test_create_fails_when_clone_is_not_visible() {
    let harness = TestHarness::new();
    harness.simulator.hide_next_clone();

    let err = harness.create("worker-9").await.unwrap_err();
    match &err {
        ProviderError::CreatedMachineMissing { name, .. } => assert_eq!(name, "worker-9"),
        other => panic!("expected created machine missing, got {other:?}"),
    }
    assert_eq!(err.code(), "created_machine_missing");
    harness.assert_sessions_closed().unwrap();
}

#[tokio::test]
async fn test_clone_failure_is_a_platform_error() {
    let harness = TestHarness::new();
    harness.simulator.fail_next_clone("datastore full");

    let err = harness.create("worker-10").await.unwrap_err();
    assert!(matches!(
        err,
        ProviderError::Platform { source: PlatformError::Clone(_), .. }
    ));
    assert_eq!(harness.simulator.machine_count(), 0);
    harness.assert_sessions_closed().unwrap();
}

#[tokio::test]
async fn test_bad_credentials_are_connection_errors() {
    let mut harness = TestHarness::new();
    harness.secrets.vsphere_password = "wrong".to_string();

    let err = harness.create("worker-11").await.unwrap_err();
    assert!(matches!(
        err,
        ProviderError::Connection { source: PlatformError::Auth(_), .. }
    ));
    assert_eq!(err.code(), "connection");
    assert_eq!(harness.simulator.sessions_opened(), 0);
    assert_eq!(harness.simulator.machine_count(), 0);
}

#[tokio::test]
async fn test_shut_down_is_idempotent() {
    let harness = TestHarness::new();
    let id = harness.create("worker-12").await.unwrap();

    assert_eq!(harness.shut_down("worker-12", id.as_str()).await.unwrap(), id);
    assert_eq!(harness.shut_down("worker-12", id.as_str()).await.unwrap(), id);
    let machine = harness.simulator.machines_named("worker-12").pop().unwrap();
    assert!(!machine.powered_on);

    let absent = harness.shut_down("ghost", "").await.unwrap();
    assert_eq!(absent, ProviderId::empty());
    harness.assert_sessions_closed().unwrap();
}

#[tokio::test]
async fn test_destroy_failure_keeps_machine() {
    let harness = TestHarness::new();
    let machine_id = harness.add_tagged_machine("worker-13");
    harness.simulator.fail_next_destroy("task failed");

    let err = harness.delete("worker-13", "").await.unwrap_err();
    assert!(matches!(
        err,
        ProviderError::Platform { source: PlatformError::Destroy(_), .. }
    ));
    assert_eq!(err.code(), "platform");
    let machine = harness.simulator.machine(&machine_id).unwrap();
    assert!(!machine.powered_on);
    harness.assert_sessions_closed().unwrap();
}

#[tokio::test]
async fn test_power_off_failure_surfaces() {
    let harness = TestHarness::new();
    harness.add_tagged_machine("worker-14");
    harness.simulator.fail_next_power_off("host unreachable");

    let err = harness.shut_down("worker-14", "").await.unwrap_err();
    assert!(matches!(
        err,
        ProviderError::Platform { source: PlatformError::PowerOp(_), .. }
    ));
}

#[tokio::test]
async fn test_list_requires_both_tags() {
    let harness = TestHarness::new();
    let created = harness.create("worker-15").await.unwrap();
    let tagged = harness.add_tagged_machine("worker-16");
    harness.add_machine_with_tags("cluster-only", &[("kubernetes.io/cluster/shoot--dev", "1")]);
    harness.add_machine_with_tags("untagged", &[]);

    let listed = harness.list().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed.get(&created).map(String::as_str), Some("worker-15"));
    assert_eq!(
        listed.get(&encode("eu-1", &tagged)).map(String::as_str),
        Some("worker-16")
    );
    harness.assert_sessions_closed().unwrap();
}

#[tokio::test]
async fn test_list_without_tags_opens_no_session() {
    let mut harness = TestHarness::new();
    harness.add_tagged_machine("worker-17");
    harness.spec = untagged_spec("eu-1");

    let listed = harness.list().await.unwrap();
    assert!(listed.is_empty());
    assert_eq!(harness.simulator.sessions_opened(), 0);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let harness = TestHarness::new();
    harness.cancel.cancel();

    let err = harness.status("worker-18", "").await.unwrap_err();
    assert!(matches!(err, ProviderError::Cancelled { .. }));
    assert_eq!(err.code(), "cancelled");
    assert_eq!(harness.simulator.sessions_opened(), 0);
}

#[tokio::test]
async fn test_cancel_during_slow_call_closes_session() {
    let harness = TestHarness::new();
    harness.add_tagged_machine("worker-19");
    let _ = harness.simulator.clone().with_latency(Duration::from_secs(5));

    let cancel = harness.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(2), harness.delete("worker-19", ""))
        .await
        .expect("cancellation should interrupt the platform call")
        .unwrap_err();
    assert!(matches!(err, ProviderError::Cancelled { .. }));
    assert_eq!(harness.simulator.machine_count(), 1);
    harness.assert_sessions_closed().unwrap();
}

#[tokio::test]
async fn test_operations_run_in_parallel() {
    let harness = TestHarness::new();

    let (a, b, c) = tokio::join!(
        harness.create("worker-a"),
        harness.create("worker-b"),
        harness.create("worker-c"),
    );
    let ids = [a.unwrap(), b.unwrap(), c.unwrap()];
    assert_eq!(harness.simulator.machine_count(), 3);
    assert_ne!(ids[0], ids[1]);
    assert_eq!(harness.list().await.unwrap().len(), 3);
    assert_eq!(harness.simulator.sessions_opened(), 4);
    harness.assert_sessions_closed().unwrap();
}
