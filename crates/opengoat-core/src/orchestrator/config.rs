/// Tunables for the orchestrator that do not belong on any single agent.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrent provider invocations across all sessions.
    pub max_parallel_flows: usize,
    /// Case-insensitive substrings checked against a failed invocation's
    /// stdout/stderr to detect an "external agent not found" condition
    /// worth retrying after `createExternalAgent`.
    pub agent_not_found_markers: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_flows: 4,
            agent_not_found_markers: vec![
                "agent not found".to_string(),
                "no such agent".to_string(),
                "unknown agent".to_string(),
            ],
        }
    }
}
