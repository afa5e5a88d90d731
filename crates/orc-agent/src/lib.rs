//! orc-agent — AgentRegistry, AgentSession/StreamingSession (inline marker
//! parser and operation-block extraction), and the OutputMultiplexer.

pub mod marker;
pub mod multiplexer;
pub mod operations;
pub mod registry;
pub mod session;

pub use marker::{MarkerEvent, MarkerParser};
pub use multiplexer::{OutputKind, OutputMultiplexer};
pub use operations::{contains_plan, extract_operations, ExtractedOperations, FileEditOp, FileReadOp, FileWriteOp};
pub use registry::{AgentRegistry, RegistryError, RegistryResult};
pub use session::{run_turn, AgentSession, TurnOutcome};
