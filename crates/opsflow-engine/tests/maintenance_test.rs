mod common;

use chrono::{Duration, Utc};
use common::{RESOURCE_GROUP, SUBSCRIPTION, ScriptedEffector, engine, probe_templates};
use opsflow_engine::{Discovery, LiveProbe, export, reconcile};
use opsflow_state::{
    DependencyEdge, DependencyType, NewOperation, OperationMode, OperationStatus, ResourceRecord,
    ResourceScope,
};
use serde_json::json;

fn new_operation(definition_id: &str) -> NewOperation {
    NewOperation {
        definition_id: definition_id.to_string(),
        name: definition_id.to_string(),
        capability: None,
        action: None,
        target_resource: None,
        mode: OperationMode::Normal,
        total_steps: 1,
    }
}

#[tokio::test]
async fn test_reconcile_fails_orphaned_operations() {
    let temp_dir = tempfile::tempdir().unwrap();
    let engine = engine(ScriptedEffector::new(), temp_dir.path(), LiveProbe::disabled()).await;
    let store = engine.store();

    let running = store.create_operation(&new_operation("crashed")).await.unwrap();
    store.start_operation(&running.id, Utc::now()).await.unwrap();
    store
        .acquire_lock("definition/crashed", &running.id, Utc::now(), Duration::hours(1))
        .await
        .unwrap();
    let finished = store.create_operation(&new_operation("finished")).await.unwrap();
    store.complete_operation(&finished.id, Utc::now()).await.unwrap();

    // Nothing is old enough yet
    let report = reconcile(store, Duration::hours(6), Utc::now()).await.unwrap();
    assert!(report.is_empty());

    let later = Utc::now() + Duration::hours(7);
    let report = reconcile(store, Duration::hours(6), later).await.unwrap();
    assert_eq!(report.reconciled, vec![running.id.clone()]);
    assert_eq!(report.released_locks, 1);

    let row = store.get_operation(&running.id).await.unwrap().unwrap();
    assert_eq!(row.status, OperationStatus::Failed);
    assert_eq!(
        row.error.as_deref(),
        Some("reconciliation: orphaned operation (no terminal state after 21600s)")
    );
    let done = store.get_operation(&finished.id).await.unwrap().unwrap();
    assert_eq!(done.status, OperationStatus::Completed);

    let events = store.audit_events(10).await.unwrap();
    assert!(events
        .iter()
        .any(|e| e.kind == "operation_reconciled" && e.subject == running.id));

    // Second pass finds nothing
    let report = reconcile(store, Duration::hours(6), later).await.unwrap();
    assert!(report.is_empty());
}

#[tokio::test]
async fn test_reconcile_with_unbounded_window() {
    let temp_dir = tempfile::tempdir().unwrap();
    let engine = engine(ScriptedEffector::new(), temp_dir.path(), LiveProbe::disabled()).await;
    let store = engine.store();

    let running = store.create_operation(&new_operation("slow")).await.unwrap();
    store.start_operation(&running.id, Utc::now()).await.unwrap();

    let report = reconcile(store, opsflow_state::span_from_secs(u64::MAX), Utc::now())
        .await
        .unwrap();
    assert!(report.is_empty());
}

#[tokio::test]
async fn test_discovery_stores_listing_and_exports_cycle_safe_graph() {
    let temp_dir = tempfile::tempdir().unwrap();
    let output = temp_dir.path().join("discovery");
    let effector = ScriptedEffector::new();
    effector.set_listing(json!([
        {
            "id": "/subs/1/vnets/vnet-a",
            "name": "vnet-a",
            "type": "network/virtual-network",
            "location": "japaneast",
            "provisioningState": "Succeeded"
        },
        {
            "id": "/subs/1/nics/nic-a",
            "name": "nic-a",
            "type": "network/nic",
            "subnet": "/subs/1/vnets/vnet-a/subnets/default"
        },
        { "type": "ignored/without-name" }
    ]));
    let engine = engine(effector.clone(), temp_dir.path(), probe_templates()).await;
    let scope = ResourceScope::new(
        Some(SUBSCRIPTION.to_string()),
        Some(RESOURCE_GROUP.to_string()),
    );

    let discovery = Discovery {
        cache: engine.cache(),
        resolver: engine.resolver(),
        effector: engine.effector(),
        probe: engine.probe(),
    };
    let report = discovery.run(&scope, &output, false).await.unwrap();

    assert!(report.live);
    assert_eq!(report.refreshed, 2);
    assert_eq!(report.inferred_edges, 1);
    assert_eq!(report.graph.nodes.len(), 2);
    assert_eq!(report.graph.edges.len(), 1);
    assert_eq!(report.files.len(), 3);
    assert_eq!(
        effector.calls(),
        vec![vec!["list".to_string(), RESOURCE_GROUP.to_string()]]
    );

    // Add a cycle and re-export offline
    let vnet = report
        .graph
        .nodes
        .values()
        .find(|n| n.name == "vnet-a")
        .unwrap()
        .clone();
    let nic = report
        .graph
        .nodes
        .values()
        .find(|n| n.name == "nic-a")
        .unwrap()
        .clone();
    engine
        .store()
        .add_dependency(&DependencyEdge::new(&vnet.id, &nic.id, DependencyType::Optional))
        .await
        .unwrap();

    let report = discovery.run(&scope, &output, true).await.unwrap();
    assert!(!report.live);
    assert_eq!(report.refreshed, 0);
    assert_eq!(report.graph.edges.len(), 2);
    assert_eq!(report.graph.cycles().len(), 1);

    let json: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(output.join(export::JSON_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(json["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(json["cycles"].as_array().unwrap().len(), 1);
    let summary = std::fs::read_to_string(output.join(export::SUMMARY_FILE)).unwrap();
    assert!(summary.contains("| network/nic | 1 |"));
}

#[tokio::test]
async fn test_graph_follows_edges_out_of_scope() {
    let temp_dir = tempfile::tempdir().unwrap();
    let engine = engine(ScriptedEffector::new(), temp_dir.path(), LiveProbe::disabled()).await;

    let app = ResourceScope::new(Some(SUBSCRIPTION.to_string()), Some("rg-app".to_string()));
    let shared = ResourceScope::new(Some(SUBSCRIPTION.to_string()), Some("rg-shared".to_string()));
    let vm = engine
        .cache()
        .store(ResourceRecord::new("compute/virtual-machine", "vm", &app))
        .await
        .unwrap();
    let vnet = engine
        .cache()
        .store(ResourceRecord::new("network/virtual-network", "hub", &shared))
        .await
        .unwrap();
    engine
        .cache()
        .store(ResourceRecord::new("network/virtual-network", "unrelated", &shared))
        .await
        .unwrap();
    engine
        .store()
        .add_dependency(&DependencyEdge::new(&vm.id, &vnet.id, DependencyType::Required))
        .await
        .unwrap();

    let graph = engine.resolver().build_graph(&app).await.unwrap();
    assert_eq!(graph.nodes.len(), 2);
    assert!(graph.nodes.contains_key(&vnet.id));
    assert!(graph.cycles().is_empty());
}
