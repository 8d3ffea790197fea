//! opsflow Engine
//!
//! Executes operation definitions against the cloud through an [`Effector`],
//! keeping the state store current along the way.
//!
//! - [`cache`]: TTL-based read-through cache over stored resources
//! - [`resolver`]: dependency satisfaction and graph construction
//! - [`engine`]: the operation lifecycle
//! - [`rollback`]: reverse-order compensation and replayable scripts
//! - [`discovery`] / [`export`]: scope listing and graph exports
//! - [`reconcile`]: closing operations orphaned by a crash

pub mod cache;
pub mod discovery;
pub mod effector;
pub mod engine;
pub mod error;
pub mod export;
pub mod outcome;
pub mod reconcile;
pub mod resolver;
pub mod rollback;

pub use cache::{CacheLookup, DEFAULT_TTL_SECS, ResourceCache, TtlPolicy};
pub use discovery::{Discovery, DiscoveryReport, infer_references};
pub use effector::{Effector, EffectorOutput, LiveProbe, ProbeResult, ProcessEffector};
pub use engine::{Engine, EngineSettings, ExecutionPlan, ExecutionReport, Failure};
pub use error::{EffectorError, EngineError, Result};
pub use outcome::StepOutcome;
pub use reconcile::{ReconcileReport, reconcile};
pub use resolver::{
    DependencyResolver, Presence, ResourceGraph, Satisfaction, UnmetDependency, UnmetReason,
};
pub use rollback::{RollbackFailure, RollbackReport, ScriptContext};
