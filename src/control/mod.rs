//! Decision, balancing and dispatch: the per-cycle control path.

pub mod balancer;
pub mod clock;
pub mod dispatcher;
pub mod efficiency;
pub mod engine;
pub mod optimizer;
pub mod types;

pub use balancer::{BalanceOutcome, LoadBalancer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{
    CommandAttempt, DispatchEvent, DispatchFailure, DispatchPolicy, Dispatcher,
};
pub use engine::{DecisionEngine, PolicyThresholds};
pub use optimizer::{ExecutionResult, OptimizationOutcome, Optimizer, Plan};
pub use types::{
    Command, ControlError, CycleRecord, Decision, DecisionReport, Mode, SystemSnapshot,
    SystemState,
};
