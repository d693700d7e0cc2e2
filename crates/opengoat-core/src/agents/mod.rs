//! Agent directory: manifests, id normalization, reports-to graph,
//! provider binding.

mod manifest;
mod registry;

pub use manifest::{normalize_agent_id, AgentManifest, AgentType, Delegation, WorkspaceAccessPolicy};
pub use registry::{AgentRegistry, CreateAgentOptions};
