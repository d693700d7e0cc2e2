//! Per-agent transcript engine: append, pruning, compaction, reset
//! policies, and the active-run claim.

mod engine;
mod model;

pub use engine::{
    CompactionResult, GetHistoryOptions, PrepareOptions, PrepareResult, SessionEngine, SessionHistory,
    SessionInfo,
};
pub use model::{
    acp_session_key, default_session_key, CompactionConfig, EntryKind, PruningConfig, ResetMode,
    ResetPolicy, SessionMetadata, SessionSummary, TranscriptEntry,
};
