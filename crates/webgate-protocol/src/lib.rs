//! Wire-level contracts for the webgate protocol.
//!
//! Every frame exchanged with a client is one UTF-8 JSON object. Requests
//! carry a client-chosen `id`, a `method` discriminant, and method-specific
//! fields; replies echo the `id` and carry either a typed success payload or
//! a structured error block. This crate defines both sides plus the field
//! validation that turns free-form JSON into exhaustive typed commands.

pub mod command;
pub mod error;
pub mod response;

pub use command::{
    Action, CommandFrame, ExtractKind, MouseButton, RelativePosition, WaitCondition, WaitUntil,
    DEFAULT_TIMEOUT_MS,
};
pub use error::{ErrorBody, ErrorCode, ValidationError};
pub use response::{
    epoch_seconds, ClickPayload, ClosedPayload, ExtractPayload, ExtractedItem, FillPayload,
    NavigatePayload, Reply, ReplyPayload, SessionPayload, StateDiff, WaitPayload,
};
