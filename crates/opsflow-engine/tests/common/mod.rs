#![allow(dead_code)]

use async_trait::async_trait;
use opsflow_core::{CommandLine, Definition, Variables};
use opsflow_engine::{
    Effector, EffectorError, EffectorOutput, Engine, EngineSettings, LiveProbe, TtlPolicy,
};
use opsflow_state::StateStore;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const SUBSCRIPTION: &str = "sub-test";
pub const RESOURCE_GROUP: &str = "rg-test";

/// Effector double driven by a script of expectations
///
/// - every invocation is recorded
/// - a command fails (exit 1) when any argument is listed in `failing`
/// - `probe <type> <name>` answers from `live` (exit 0 + JSON, or exit 1)
/// - `list` prints `listing`
#[derive(Default)]
pub struct ScriptedEffector {
    calls: Mutex<Vec<Vec<String>>>,
    failing: Mutex<BTreeSet<String>>,
    live: Mutex<BTreeMap<(String, String), serde_json::Value>>,
    listing: Mutex<Option<serde_json::Value>>,
}

impl ScriptedEffector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, arg: &str) {
        self.failing.lock().unwrap().insert(arg.to_string());
    }

    pub fn set_live(&self, resource_type: &str, name: &str, properties: serde_json::Value) {
        self.live
            .lock()
            .unwrap()
            .insert((resource_type.to_string(), name.to_string()), properties);
    }

    pub fn set_listing(&self, listing: serde_json::Value) {
        *self.listing.lock().unwrap() = Some(listing);
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Invocations other than probe/list
    pub fn step_calls(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|argv| argv[0] != "probe" && argv[0] != "list")
            .collect()
    }

    pub fn probe_calls(&self) -> usize {
        self.calls().iter().filter(|argv| argv[0] == "probe").count()
    }
}

#[async_trait]
impl Effector for ScriptedEffector {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, command: &CommandLine) -> Result<EffectorOutput, EffectorError> {
        let argv = command.argv().to_vec();
        self.calls.lock().unwrap().push(argv.clone());

        match argv[0].as_str() {
            "probe" => {
                let key = (argv[1].clone(), argv[2].clone());
                Ok(match self.live.lock().unwrap().get(&key) {
                    Some(properties) => EffectorOutput {
                        exit_code: Some(0),
                        stdout: properties.to_string(),
                        stderr: String::new(),
                    },
                    None => EffectorOutput {
                        exit_code: Some(1),
                        stdout: String::new(),
                        stderr: "ResourceNotFound".to_string(),
                    },
                })
            }
            "list" => Ok(EffectorOutput {
                exit_code: Some(0),
                stdout: self
                    .listing
                    .lock()
                    .unwrap()
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "[]".to_string()),
                stderr: String::new(),
            }),
            _ => {
                let failing = self.failing.lock().unwrap();
                if argv.iter().any(|arg| failing.contains(arg)) {
                    Ok(EffectorOutput {
                        exit_code: Some(1),
                        stdout: String::new(),
                        stderr: format!("{} failed", argv.join(" ")),
                    })
                } else {
                    Ok(EffectorOutput {
                        exit_code: Some(0),
                        stdout: "ok".to_string(),
                        stderr: String::new(),
                    })
                }
            }
        }
    }
}

pub fn probe_templates() -> LiveProbe {
    LiveProbe::new(
        Some(vec![
            "probe".to_string(),
            "${RESOURCE_TYPE}".to_string(),
            "${RESOURCE_NAME}".to_string(),
        ]),
        Some(vec!["list".to_string(), "${RESOURCE_GROUP}".to_string()]),
        Variables::new(),
    )
}

pub async fn engine(effector: Arc<ScriptedEffector>, rollback_dir: &Path, probe: LiveProbe) -> Engine {
    let store = StateStore::in_memory().await.unwrap();
    store.init_schema().await.unwrap();
    Engine::new(
        store,
        effector,
        probe,
        TtlPolicy::default(),
        EngineSettings {
            rollback_dir: rollback_dir.to_path_buf(),
            lock_lease: chrono::Duration::hours(1),
            subscription: Some(SUBSCRIPTION.to_string()),
        },
    )
}

pub fn definition(yaml: &str) -> Definition {
    Definition::from_yaml_str(yaml).unwrap()
}

pub fn variables(pairs: &[(&str, &str)]) -> Variables {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
