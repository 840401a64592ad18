//! Integration tests for the Cartridge topology driver.
//!
//! The Lua side is replaced by a scripted transport, so these tests cover
//! argument shaping and error classification.

mod common;

use common::{ScriptedTransport, pod};
use serde_json::json;
use std::sync::Arc;
use tarantool_topology::{
    CartridgeTopology, FailoverMode, FailoverParams, JoinOutcome, JoinRequest, Topology,
    TopologyError,
};

fn driver(transport: ScriptedTransport) -> (CartridgeTopology, Arc<ScriptedTransport>) {
    let transport = Arc::new(transport);
    (CartridgeTopology::new(transport.clone()), transport)
}

fn join_request() -> JoinRequest {
    JoinRequest {
        alias: "storage-0".into(),
        uuid: "c0d3c0d3-0000-5000-8000-000000000000".into(),
        roles: vec!["vshard-storage".into()],
        weight: 100,
        vshard_group: "default".into(),
        all_rw: false,
    }
}

#[tokio::test]
async fn join_sends_single_replicaset() {
    let (topology, transport) = driver(ScriptedTransport::replying(json!({"res": true})));
    let uris = vec!["storage-0-0.cluster.tarantool.svc.cluster.local:3301".to_string()];

    let outcome = topology
        .join(&pod("storage-0-0"), &join_request(), &uris)
        .await
        .unwrap();
    assert_eq!(outcome, JoinOutcome::Joined);

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].pod, "storage-0-0");
    assert!(calls[0].script.contains("admin_edit_topology(args)"));
    assert_eq!(
        calls[0].args,
        vec![json!({
            "replicasets": [{
                "uuid": "c0d3c0d3-0000-5000-8000-000000000000",
                "alias": "storage-0",
                "roles": ["vshard-storage"],
                "weight": 100,
                "vshard_group": "default",
                "join_servers": [{"uri": "storage-0-0.cluster.tarantool.svc.cluster.local:3301"}]
            }]
        })]
    );
}

#[tokio::test]
async fn join_already_joined_is_benign() {
    let (topology, _) = driver(ScriptedTransport::replying(json!({
        "res": false,
        "err": {
            "class_name": "Invalid cluster topology config",
            "err": "Server \"storage-0-0\" is already joined"
        }
    })));

    let outcome = topology
        .join(&pod("storage-0-0"), &join_request(), &["uri".to_string()])
        .await
        .unwrap();
    assert_eq!(outcome, JoinOutcome::AlreadyJoined);
}

#[tokio::test]
async fn join_unknown_role() {
    let (topology, _) = driver(ScriptedTransport::replying(json!({
        "res": false,
        "err": {
            "class_name": "Invalid cluster topology config",
            "err": "replicasets[c0d3]: can not enable unknown role \"app.roles.missing\""
        }
    })));

    let err = topology
        .join(&pod("storage-0-0"), &join_request(), &["uri".to_string()])
        .await
        .unwrap_err();
    match err {
        TopologyError::UnknownRole(lua) => assert!(lua.err.contains("app.roles.missing")),
        other => panic!("expected UnknownRole, got {other:?}"),
    }
}

#[tokio::test]
async fn join_without_result_means_topology_is_down() {
    let (topology, _) = driver(ScriptedTransport::replying(json!({"res": false})));

    let err = topology
        .join(&pod("storage-0-0"), &join_request(), &["uri".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, TopologyError::TopologyIsDown));
}

#[tokio::test]
async fn set_weight_passes_uuid_and_weight() {
    let (topology, transport) = driver(ScriptedTransport::replying(json!({"res": true})));

    topology
        .set_weight(&pod("router-0-0"), "rs-uuid", 0)
        .await
        .unwrap();

    let calls = transport.calls();
    assert!(calls[0].script.contains("actual_weight ~= weight"));
    assert_eq!(calls[0].args, vec![json!("rs-uuid"), json!(0)]);
}

#[tokio::test]
async fn set_weight_guards() {
    let (topology, _) = driver(ScriptedTransport::replying(json!({
        "res": false,
        "err": {
            "class_name": "Invalid cluster topology config",
            "err": "At least one vshard-storage (default) must have weight > 0"
        }
    })));
    let err = topology
        .set_weight(&pod("router-0-0"), "rs-uuid", 0)
        .await
        .unwrap_err();
    assert!(matches!(err, TopologyError::LastStorageWeight));

    let (topology, _) = driver(ScriptedTransport::replying(json!({
        "res": false,
        "err": {"class_name": "Editing cluster topology failed", "err": "replicasets[rs-uuid] not in config"}
    })));
    let err = topology
        .set_weight(&pod("router-0-0"), "rs-uuid", 100)
        .await
        .unwrap_err();
    assert!(matches!(err, TopologyError::NotInConfig));
}

#[tokio::test]
async fn replicaset_roles_nil_is_empty() {
    let (topology, transport) = driver(ScriptedTransport::replying(json!(null)));

    let roles = topology
        .replicaset_roles(&pod("router-0-0"), "rs-uuid")
        .await
        .unwrap();
    assert!(roles.is_empty());
    assert_eq!(transport.calls()[0].args, vec![json!({"uuid": "rs-uuid"})]);
}

#[tokio::test]
async fn set_replicaset_roles_edits_topology() {
    let (topology, transport) = driver(ScriptedTransport::replying(json!({"res": true})));

    topology
        .set_replicaset_roles(
            &pod("router-0-0"),
            "rs-uuid",
            &["vshard-router".to_string(), "failover-coordinator".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(
        transport.calls()[0].args,
        vec![json!({
            "replicasets": [{"uuid": "rs-uuid", "roles": ["vshard-router", "failover-coordinator"]}]
        })]
    );
}

#[tokio::test]
async fn bootstrap_swallows_already_bootstrapped() {
    let (topology, _) = driver(ScriptedTransport::replying(json!({
        "res": null,
        "err": {"class_name": "Bootstrapping vshard failed", "err": "Cluster is already bootstrapped"}
    })));
    topology.bootstrap_vshard(&pod("router-0-0")).await.unwrap();

    let (topology, _) = driver(ScriptedTransport::replying(json!({
        "err": {
            "class_name": "Bootstrapping vshard failed",
            "err": "No remotes with role \"vshard-storage\" available"
        }
    })));
    let err = topology
        .bootstrap_vshard(&pod("router-0-0"))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("unable to bootstrap cluster"));
    assert!(err.lua_error().is_some());
}

#[tokio::test]
async fn cartridge_config_type_mismatch_is_empty() {
    // an empty Lua table comes back as a JSON array
    let (topology, transport) = driver(ScriptedTransport::replying(json!([])));

    let config = topology.cartridge_config(&pod("router-0-0")).await.unwrap();
    assert!(config.is_empty());

    let reserved = &transport.calls()[0].args[0];
    assert_eq!(reserved["topology"], json!(true));
    assert_eq!(reserved["vshard_groups.yml"], json!(true));
}

#[tokio::test]
async fn cartridge_config_sections() {
    let (topology, _) = driver(ScriptedTransport::replying(json!({
        "app": {"workers": 4},
        "custom.yml": "a: 1"
    })));

    let config = topology.cartridge_config(&pod("router-0-0")).await.unwrap();
    assert_eq!(config.len(), 2);
    assert_eq!(config["app"], json!({"workers": 4}));
}

#[tokio::test]
async fn apply_rejected_config() {
    let (topology, transport) = driver(ScriptedTransport::replying(json!(false)));
    let mut config = serde_json::Map::new();
    config.insert("app".into(), json!({"workers": 4}));

    let err = topology
        .apply_cartridge_config(&pod("router-0-0"), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, TopologyError::ConfigRejected));
    assert_eq!(transport.calls()[0].args[0], json!({"app": {"workers": 4}}));

    let (topology, _) = driver(ScriptedTransport::replying(json!(true)));
    topology
        .apply_cartridge_config(&pod("router-0-0"), &config)
        .await
        .unwrap();
}

#[tokio::test]
async fn failover_params_round_trip() {
    let params = FailoverParams {
        mode: FailoverMode::Eventual,
        timeout: 20,
        ..Default::default()
    };
    let (topology, transport) = driver(ScriptedTransport::replying(json!({"res": true})));
    topology
        .set_failover_params(&pod("router-0-0"), &params)
        .await
        .unwrap();
    assert_eq!(
        transport.calls()[0].args,
        vec![json!({"mode": "eventual", "failover_timeout": 20})]
    );

    let (topology, _) = driver(ScriptedTransport::replying(
        json!({"mode": "eventual", "failover_timeout": 20, "fencing_enabled": false}),
    ));
    assert_eq!(
        topology.failover_params(&pod("router-0-0")).await.unwrap(),
        params
    );
}

#[tokio::test]
async fn instance_state_probes() {
    let (topology, _) = driver(ScriptedTransport::replying(json!({"res": true})));
    assert!(topology.is_cartridge_started(&pod("a")).await.unwrap());
    assert!(topology.is_cartridge_configured(&pod("a")).await.unwrap());

    let (topology, _) = driver(ScriptedTransport::replying(json!({"res": false})));
    assert!(!topology.is_cartridge_started(&pod("a")).await.unwrap());

    let (topology, _) = driver(ScriptedTransport::replying(json!("")));
    assert_eq!(topology.instance_uuid(&pod("a")).await.unwrap(), "");
}

#[tokio::test]
async fn transport_failures_surface_unchanged() {
    let (topology, _) = driver(ScriptedTransport::new(|_, _| {
        Err(TopologyError::Transport("connection refused".into()))
    }));

    let err = topology.roles_hierarchy(&pod("a")).await.unwrap_err();
    assert!(err.is_transport());
}
