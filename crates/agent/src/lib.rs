//! Session runtime for the front desk.
//!
//! One actor per live call owns the [`Session`](frontdesk_core::Session) and
//! processes its events in order:
//! 1. **Emergency scan** at ingress, on every partial and final fragment
//! 2. **Transition** through the audited state machine
//! 3. **Readback** answers handled deterministically
//! 4. **Oracle** (`llm`) proposes text or a tool call
//! 5. **Gate and dispatch** (`tools`) for authorized tool calls only
//!
//! # Safety Principle
//!
//! The oracle is strictly a conversationalist. It never decides who the
//! caller is, what they may see, or whether a slot is free. Those are
//! deterministic decisions made in `frontdesk-core`.

pub mod conversation;
pub mod llm;
pub mod prompt;
pub mod runtime;
pub mod thinking;
pub mod tools;
pub mod transport;

pub use llm::{OpenAiCompatibleOracle, Oracle, OracleError, OracleReply, ScriptedOracle};
pub use runtime::{Delivery, RuntimeSettings, SessionRegistry, SessionServices};
pub use tools::{ToolExecutor, ToolOutcome};
pub use transport::{BufferedTransport, Transport, TransportCommand, TransportError};
