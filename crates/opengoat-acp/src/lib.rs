//! ACP (Agent Client Protocol) façade: a JSON-lines stdin/stdout server
//! that republishes `opengoat_core`'s orchestrator as a streaming RPC
//! surface — session create/load/prompt/cancel/list.

pub mod bridge;
pub mod protocol;

pub use bridge::AcpBridge;
pub use protocol::{AcpError, AcpErrorCode, AcpMessage};
