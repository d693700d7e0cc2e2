use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Whether an agent can delegate work to others or only receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Manager,
    Individual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub can_receive: bool,
    pub can_delegate: bool,
}

/// Where a provider invocation for this agent runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkspaceAccessPolicy {
    /// Leave `cwd` absent; the provider picks its own default.
    #[default]
    ProviderDefault,
    /// Run in this agent's workspace directory.
    AgentWorkspace,
    /// Run in whatever `cwd` the caller supplied.
    External,
}

/// An agent's identity, organizational position, and provider binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentManifest {
    pub id: String,
    pub display_name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub reports_to: Option<String>,
    pub provider: String,
    pub discoverable: bool,
    pub delegation: Delegation,
    pub tags: Vec<String>,
    pub skills: Vec<String>,
    pub priority: u8,
    #[serde(default)]
    pub workspace_access: WorkspaceAccessPolicy,
}

impl AgentManifest {
    pub fn is_head(&self) -> bool {
        self.reports_to.is_none()
    }

    pub fn is_manager(&self) -> bool {
        matches!(self.agent_type, AgentType::Manager)
    }
}

/// Normalizes a free-text display name (or raw id) into the slug form
/// `AgentManifest::id` requires: lowercase alphanumeric, single-dash
/// separators, at least one alphanumeric character.
pub fn normalize_agent_id(raw: &str) -> Result<String> {
    let mut slug = String::with_capacity(raw.len());
    let mut last_was_dash = true; // suppress a leading dash
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() || !slug.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::Validation(format!(
            "'{raw}' does not normalize to a valid agent id"
        )));
    }
    Ok(slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_mixed_case_and_spaces() {
        assert_eq!(normalize_agent_id("Research Analyst").unwrap(), "research-analyst");
    }

    #[test]
    fn collapses_repeated_separators() {
        assert_eq!(normalize_agent_id("QA  --  Lead!!").unwrap(), "qa-lead");
    }

    #[test]
    fn rejects_empty_or_non_alphanumeric() {
        assert!(normalize_agent_id("").is_err());
        assert!(normalize_agent_id("---").is_err());
        assert!(normalize_agent_id("!!!").is_err());
    }

    #[test]
    fn already_normalized_id_is_stable() {
        assert_eq!(normalize_agent_id("writer").unwrap(), "writer");
    }
}
