use opsflow_state::{NewOperation, OperationMode, ResourceRecord, ResourceScope, StateStore};
use serde_json::json;

pub async fn store() -> StateStore {
    StateStore::in_memory().await.unwrap()
}

pub fn scope() -> ResourceScope {
    ResourceScope::new(Some("sub-test".to_string()), Some("rg-test".to_string()))
}

pub fn resource(resource_type: &str, name: &str) -> ResourceRecord {
    ResourceRecord::new(resource_type, name, &scope())
        .with_properties(json!({ "provisioningState": "Succeeded" }))
}

#[allow(dead_code)]
pub fn new_operation(definition_id: &str, mode: OperationMode) -> NewOperation {
    NewOperation {
        definition_id: definition_id.to_string(),
        name: format!("Run {definition_id}"),
        capability: Some("networking".to_string()),
        action: Some("create".to_string()),
        target_resource: None,
        mode,
        total_steps: 2,
    }
}
