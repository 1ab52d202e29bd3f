//! warden-core: tamper-evident policy state and the checkers built on it.

pub mod action;
pub mod breaker;
pub mod clearance;
pub mod config;
pub mod context;
pub mod decision;
pub mod dispatcher;
mod error;
pub mod failure;
pub mod gate;
pub mod protect;
pub mod requirements;
pub mod revision;
pub mod signer;
pub mod store;
pub mod triggers;

pub use action::{ToolAction, ToolEvent};
pub use breaker::{BreakerPhase, BreakerState, CircuitBreaker, TRIP_THRESHOLD};
pub use clearance::{Clearance, ClearanceBlock, ClearanceVerdict, ClearanceViolation, ReleaseClearance};
pub use config::{Config, ConfigStore, ProjectManifest};
pub use context::{Clock, Context, FixedClock, SystemClock};
pub use decision::{Block, Decision, Verdict};
pub use dispatcher::{PolicyDispatcher, SessionReport};
pub use error::WardenError;
pub use gate::{GateState, GateVerdict, StartupGate};
pub use requirements::{PromptOutcome, PromptReport, RequirementSet, RequirementTracker, UserPrompt};
pub use revision::{GitRevisionProbe, RevisionProbe, StaticRevisionProbe};
pub use signer::{SecretKey, Signer};
pub use store::{DocumentState, IntegrityFailure, StateStore};
