use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetMode {
    Daily,
    Idle,
    Manual,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResetPolicy {
    pub mode: ResetMode,
    /// Local wall-clock hour at which a `daily` reset fires.
    pub at_hour: u8,
    pub idle_minutes: u32,
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self {
            mode: ResetMode::Manual,
            at_hour: 4,
            idle_minutes: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PruningConfig {
    pub max_messages: usize,
    pub max_chars: usize,
    pub keep_recent_messages: usize,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            max_messages: 200,
            max_chars: 200_000,
            keep_recent_messages: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompactionConfig {
    pub trigger_message_count: usize,
    pub trigger_chars: usize,
    pub keep_recent_messages: usize,
    pub summary_max_chars: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            trigger_message_count: 60,
            trigger_chars: 80_000,
            keep_recent_messages: 10,
            summary_max_chars: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    UserMessage,
    AssistantMessage,
    CompactionSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub ts: DateTime<Utc>,
    pub kind: EntryKind,
    pub content: String,
}

impl TranscriptEntry {
    pub fn user(content: impl Into<String>, ts: DateTime<Utc>) -> Self {
        Self { ts, kind: EntryKind::UserMessage, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>, ts: DateTime<Utc>) -> Self {
        Self { ts, kind: EntryKind::AssistantMessage, content: content.into() }
    }

    pub fn compaction_summary(content: impl Into<String>, ts: DateTime<Utc>) -> Self {
        Self { ts, kind: EntryKind::CompactionSummary, content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_key: String,
    pub session_id: Uuid,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub rotations: u32,
    pub compaction_count: u32,
    pub reset_policy: ResetPolicy,
    pub pruning: PruningConfig,
    pub compaction: CompactionConfig,
}

impl SessionMetadata {
    pub fn new(session_key: impl Into<String>, agent_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_key: session_key.into(),
            session_id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            created_at: now,
            last_activity_at: now,
            rotations: 0,
            compaction_count: 0,
            reset_policy: ResetPolicy::default(),
            pruning: PruningConfig::default(),
            compaction: CompactionConfig::default(),
        }
    }

    pub fn transcript_path_key(&self) -> &str {
        &self.session_key
    }
}

/// Default session-ref suffix used when the caller does not specify one.
pub fn default_session_key(agent_id: &str) -> String {
    format!("agent:{agent_id}:main")
}

pub fn acp_session_key(acp_session_id: &str) -> String {
    format!("acp:{acp_session_id}:main")
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_key: String,
    pub session_id: Uuid,
    pub agent_id: String,
    pub last_activity_at: DateTime<Utc>,
    pub message_count: usize,
}
