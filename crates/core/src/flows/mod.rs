pub mod engine;
pub mod states;

pub use engine::{CallFlow, FlowDefinition, FlowEngine, FlowTransitionError};
pub use states::{CallAction, CallContext, CallEvent, TransitionOutcome};
