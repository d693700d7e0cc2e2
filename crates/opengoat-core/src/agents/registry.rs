use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::error::{Error, Result};
use crate::paths::{FsPort, HomeLayout};

use super::manifest::{AgentManifest, AgentType, Delegation, WorkspaceAccessPolicy};
use super::normalize_agent_id;

#[derive(Debug, Default, Clone)]
pub struct CreateAgentOptions {
    pub display_name: Option<String>,
    pub description: String,
    pub agent_type: Option<AgentType>,
    pub reports_to: Option<String>,
    pub provider: String,
    pub discoverable: bool,
    pub delegation: Delegation,
    pub tags: Vec<String>,
    pub skills: Vec<String>,
    pub priority: u8,
    pub workspace_access: Option<WorkspaceAccessPolicy>,
}

#[derive(Serialize, Deserialize)]
struct AgentsIndex {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    agents: Vec<String>,
    #[serde(rename = "updatedAt")]
    updated_at: chrono::DateTime<Utc>,
}

/// Owns agent manifests: creation, provider/manager mutation, deletion,
/// and the reports-to graph invariants (acyclic, exactly one head).
pub struct AgentRegistry {
    fs: Arc<dyn FsPort>,
    layout: HomeLayout,
    manifests: RwLock<HashMap<String, AgentManifest>>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl AgentRegistry {
    pub fn new(fs: Arc<dyn FsPort>, layout: HomeLayout) -> Self {
        Self {
            fs,
            layout,
            manifests: RwLock::new(HashMap::new()),
        }
    }

    /// Loads the agent index and each agent's config from disk into the
    /// in-memory cache. Safe to call on an empty home (no-op).
    pub async fn load(&self) -> Result<()> {
        let Some(raw) = self.fs.read_to_string(&self.layout.agents_file()).await? else {
            return Ok(());
        };
        let index: AgentsIndex = serde_json::from_str(&raw)?;
        let mut manifests = self.manifests.write().await;
        for id in index.agents {
            if let Some(raw) = self.fs.read_to_string(&self.layout.agent_config(&id)).await? {
                let manifest: AgentManifest = serde_json::from_str(&raw)?;
                manifests.insert(id, manifest);
            }
        }
        Ok(())
    }

    pub async fn list_agents(&self) -> Vec<AgentManifest> {
        let mut out: Vec<AgentManifest> = self.manifests.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn get(&self, id: &str) -> Option<AgentManifest> {
        self.manifests.read().await.get(id).cloned()
    }

    pub async fn head_id(&self) -> Option<String> {
        self.manifests
            .read()
            .await
            .values()
            .find(|m| m.is_head())
            .map(|m| m.id.clone())
    }

    #[instrument(skip(self, options))]
    pub async fn create_agent(&self, name: &str, options: CreateAgentOptions) -> Result<AgentManifest> {
        let id = normalize_agent_id(name)?;
        let mut manifests = self.manifests.write().await;
        if manifests.contains_key(&id) {
            return Err(Error::Conflict(format!("agent '{id}' already exists")));
        }

        let has_head = manifests.values().any(|m| m.is_head());
        let reports_to = if !has_head {
            None // first agent ever created becomes the organization head
        } else {
            options.reports_to.clone()
        };

        if let Some(manager_id) = &reports_to {
            if !manifests.contains_key(manager_id) {
                return Err(Error::NotFound(format!("manager '{manager_id}' does not exist")));
            }
        }

        let manifest = AgentManifest {
            id: id.clone(),
            display_name: options.display_name.clone().unwrap_or_else(|| name.to_string()),
            description: options.description,
            agent_type: options.agent_type.unwrap_or(AgentType::Individual),
            reports_to,
            provider: options.provider,
            discoverable: options.discoverable,
            delegation: options.delegation,
            tags: options.tags,
            skills: options.skills,
            priority: options.priority,
            workspace_access: options.workspace_access.unwrap_or_default(),
        };

        manifests.insert(id.clone(), manifest.clone());
        drop(manifests);
        self.persist(&manifest).await?;
        self.persist_index().await?;
        info!(agent = %id, "agent created");
        Ok(manifest)
    }

    pub async fn set_agent_provider(&self, id: &str, provider_id: &str) -> Result<()> {
        let mut manifests = self.manifests.write().await;
        let manifest = manifests
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("agent '{id}' not found")))?;
        manifest.provider = provider_id.to_string();
        let snapshot = manifest.clone();
        drop(manifests);
        self.persist(&snapshot).await
    }

    #[instrument(skip(self))]
    pub async fn set_agent_manager(&self, id: &str, reports_to: &str) -> Result<()> {
        let mut manifests = self.manifests.write().await;
        if !manifests.contains_key(id) {
            return Err(Error::NotFound(format!("agent '{id}' not found")));
        }
        if !manifests.contains_key(reports_to) {
            return Err(Error::NotFound(format!("agent '{reports_to}' not found")));
        }
        if id == reports_to {
            return Err(Error::Conflict(format!("'{id}' cannot report to itself")));
        }

        if would_cycle(&manifests, id, reports_to) {
            return Err(Error::Conflict(format!(
                "setting '{id}' to report to '{reports_to}' would create a cycle"
            )));
        }

        let manifest = manifests.get_mut(id).expect("checked above");
        manifest.reports_to = Some(reports_to.to_string());
        let snapshot = manifest.clone();
        drop(manifests);
        self.persist(&snapshot).await
    }

    #[instrument(skip(self))]
    pub async fn delete_agent(&self, id: &str) -> Result<()> {
        let mut manifests = self.manifests.write().await;
        let manifest = manifests
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("agent '{id}' not found")))?;
        if manifest.is_head() {
            return Err(Error::Conflict("cannot delete the organization head".into()));
        }
        manifests.remove(id);
        drop(manifests);
        self.fs.remove_file(&self.layout.agent_config(id)).await?;
        self.persist_index().await?;
        info!(agent = %id, "agent deleted");
        Ok(())
    }

    async fn persist(&self, manifest: &AgentManifest) -> Result<()> {
        let json = serde_json::to_string_pretty(manifest)?;
        self.fs.write_atomic(&self.layout.agent_config(&manifest.id), &json).await?;

        let workspace_json = json!({
            "schemaVersion": 1,
            "id": manifest.id,
            "displayName": manifest.display_name,
            "kind": "workspace",
        });
        self.fs
            .write_atomic(&self.layout.workspace_json(&manifest.id), &workspace_json.to_string())
            .await?;

        let agents_md = render_agents_md(manifest);
        self.fs.write_atomic(&self.layout.agents_md(&manifest.id), &agents_md).await?;
        Ok(())
    }

    async fn persist_index(&self) -> Result<()> {
        let manifests = self.manifests.read().await;
        let mut ids: Vec<String> = manifests.keys().cloned().collect();
        ids.sort();
        let index = AgentsIndex {
            schema_version: 1,
            agents: ids,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&index)?;
        self.fs.write_atomic(&self.layout.agents_file(), &json).await
    }
}

/// Builds `{agentId -> reportsTo}` across the current manifests overlaid
/// with the proposed edge, then walks from `from` looking for a revisit.
/// Never maintains a mutable graph across calls; truth always comes from
/// the manifests on hand.
fn would_cycle(manifests: &HashMap<String, AgentManifest>, from: &str, to: &str) -> bool {
    let mut edges: HashMap<&str, &str> = manifests
        .iter()
        .filter_map(|(id, m)| m.reports_to.as_deref().map(|r| (id.as_str(), r)))
        .collect();
    edges.insert(from, to);

    let mut visited = std::collections::HashSet::new();
    let mut current = to;
    loop {
        if current == from {
            return true;
        }
        if !visited.insert(current) {
            return false; // hit a different, pre-existing cycle; not this edge's fault
        }
        match edges.get(current) {
            Some(next) => current = next,
            None => return false,
        }
    }
}

fn render_agents_md(manifest: &AgentManifest) -> String {
    format!(
        "---\nid: {id}\ndisplayName: {display_name}\ntype: {agent_type:?}\nreportsTo: {reports_to}\nprovider: {provider}\ndiscoverable: {discoverable}\npriority: {priority}\ntags: {tags:?}\nskills: {skills:?}\n---\n\n# {display_name}\n\n{description}\n",
        id = manifest.id,
        display_name = manifest.display_name,
        agent_type = manifest.agent_type,
        reports_to = manifest.reports_to.as_deref().unwrap_or("null"),
        provider = manifest.provider,
        discoverable = manifest.discoverable,
        priority = manifest.priority,
        tags = manifest.tags,
        skills = manifest.skills,
        description = manifest.description,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::MemFs;

    fn registry() -> AgentRegistry {
        AgentRegistry::new(Arc::new(MemFs::new()), HomeLayout::new("/home".into()))
    }

    #[tokio::test]
    async fn first_created_agent_becomes_head() {
        let registry = registry();
        let ceo = registry
            .create_agent("CEO", CreateAgentOptions {
                agent_type: Some(AgentType::Manager),
                provider: "claude".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(ceo.is_head());
        assert_eq!(registry.head_id().await.as_deref(), Some("ceo"));
    }

    #[tokio::test]
    async fn second_agent_requires_existing_manager() {
        let registry = registry();
        registry
            .create_agent("CEO", CreateAgentOptions {
                agent_type: Some(AgentType::Manager),
                provider: "claude".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let err = registry
            .create_agent("writer", CreateAgentOptions {
                reports_to: Some("ghost".into()),
                provider: "claude".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn cannot_delete_head() {
        let registry = registry();
        registry
            .create_agent("CEO", CreateAgentOptions {
                agent_type: Some(AgentType::Manager),
                provider: "claude".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let err = registry.delete_agent("ceo").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn reports_to_graph_rejects_cycles() {
        let registry = registry();
        registry
            .create_agent("CEO", CreateAgentOptions {
                agent_type: Some(AgentType::Manager),
                provider: "claude".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        registry
            .create_agent("CTO", CreateAgentOptions {
                agent_type: Some(AgentType::Manager),
                reports_to: Some("ceo".into()),
                provider: "claude".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let err = registry.set_agent_manager("ceo", "cto").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn set_agent_manager_reassigns_reportee() {
        let registry = registry();
        registry
            .create_agent("CEO", CreateAgentOptions {
                agent_type: Some(AgentType::Manager),
                provider: "claude".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        registry
            .create_agent("CTO", CreateAgentOptions {
                agent_type: Some(AgentType::Manager),
                reports_to: Some("ceo".into()),
                provider: "claude".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        registry
            .create_agent("engineer", CreateAgentOptions {
                reports_to: Some("ceo".into()),
                provider: "claude".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        registry.set_agent_manager("engineer", "cto").await.unwrap();
        let engineer = registry.get("engineer").await.unwrap();
        assert_eq!(engineer.reports_to.as_deref(), Some("cto"));
    }
}
