//! Pure scoring function that decides which agent a head-agent prompt
//! should be routed to.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::agents::AgentManifest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingCandidate {
    pub agent_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub entry_agent_id: String,
    pub target_agent_id: String,
    pub confidence: f64,
    pub reason: String,
    pub rewritten_message: String,
    pub candidates: Vec<RoutingCandidate>,
}

pub struct RoutingService;

impl RoutingService {
    pub fn new() -> Self {
        Self
    }

    /// Decides a target agent for `message` sent to `entry_agent_id`.
    /// If the entry agent is not the organization head, it routes to
    /// itself unconditionally (confidence 1.0): only the head delegates.
    pub fn route(&self, entry_agent_id: &str, message: &str, manifests: &[AgentManifest]) -> RoutingDecision {
        let head_id = manifests.iter().find(|m| m.is_head()).map(|m| m.id.clone());
        let is_head = head_id.as_deref() == Some(entry_agent_id);

        if !is_head {
            return RoutingDecision {
                entry_agent_id: entry_agent_id.to_string(),
                target_agent_id: entry_agent_id.to_string(),
                confidence: 1.0,
                reason: "entry agent is not the organization head".into(),
                rewritten_message: message.to_string(),
                candidates: Vec::new(),
            };
        }

        let tokens = tokenize(message);
        let token_set: HashSet<&str> = tokens.iter().map(String::as_str).collect();

        let mut candidates: Vec<RoutingCandidate> = manifests
            .iter()
            .filter(|m| m.discoverable && !m.is_head())
            .map(|m| RoutingCandidate {
                agent_id: m.id.clone(),
                score: score_manifest(m, &token_set),
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| tie_break(manifests, &b.agent_id, &a.agent_id, &token_set))
        });

        let top = candidates.first().cloned();
        let (target, confidence, reason) = match top {
            Some(c) if c.score > 0.0 => {
                let confidence = (c.score / (tokens.len() as f64 + 1.0).max(4.0)).min(0.99);
                let reason = format!("best keyword/tag match with score {:.2}", c.score);
                (c.agent_id, confidence, reason)
            }
            _ => (
                entry_agent_id.to_string(),
                0.35,
                "no discoverable agent scored above zero; falling back to head".to_string(),
            ),
        };

        let rewritten_message = if target == entry_agent_id {
            message.to_string()
        } else {
            format!(
                "[Delegated to @{target}: {reason}]\n\n{message}"
            )
        };

        RoutingDecision {
            entry_agent_id: entry_agent_id.to_string(),
            target_agent_id: target,
            confidence,
            reason,
            rewritten_message,
            candidates,
        }
    }
}

impl Default for RoutingService {
    fn default() -> Self {
        Self::new()
    }
}

fn tokenize(message: &str) -> Vec<String> {
    message
        .split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() >= 2)
        .collect()
}

fn score_manifest(manifest: &AgentManifest, tokens: &HashSet<&str>) -> f64 {
    let mut corpus: Vec<String> = vec![manifest.id.clone(), manifest.display_name.to_lowercase()];
    corpus.extend(manifest.tags.iter().map(|t| t.to_lowercase()));
    let body_tokens: Vec<String> = tokenize(&manifest.description).into_iter().take(80).collect();
    corpus.extend(body_tokens);

    let corpus_tokens: HashSet<String> = corpus
        .iter()
        .flat_map(|s| tokenize(s))
        .collect();

    let matched = tokens.iter().filter(|t| corpus_tokens.contains(**t)).count() as f64;
    let explicit_name_match = has_explicit_name_match(manifest, tokens);
    let priority_bonus = (manifest.priority as f64 / 50.0).clamp(0.0, 3.0);

    2.0 * matched + if explicit_name_match { 4.0 } else { 0.0 } + priority_bonus
}

fn has_explicit_name_match(manifest: &AgentManifest, tokens: &HashSet<&str>) -> bool {
    tokens.contains(manifest.id.as_str())
        || tokenize(&manifest.display_name)
            .iter()
            .any(|t| tokens.contains(t.as_str()))
}

fn tie_break(
    manifests: &[AgentManifest],
    a_id: &str,
    b_id: &str,
    tokens: &HashSet<&str>,
) -> std::cmp::Ordering {
    let a = manifests.iter().find(|m| m.id == a_id);
    let b = manifests.iter().find(|m| m.id == b_id);
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        _ => return std::cmp::Ordering::Equal,
    };
    let a_explicit = has_explicit_name_match(a, tokens);
    let b_explicit = has_explicit_name_match(b, tokens);
    a_explicit
        .cmp(&b_explicit)
        .then(a.priority.cmp(&b.priority))
        .then(b.id.cmp(&a.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentType, Delegation};

    fn manifest(id: &str, head: bool, tags: &[&str], priority: u8) -> AgentManifest {
        AgentManifest {
            id: id.to_string(),
            display_name: id.to_string(),
            description: format!("handles {} work", tags.join(" ")),
            agent_type: AgentType::Individual,
            reports_to: if head { None } else { Some("ceo".to_string()) },
            provider: "claude".into(),
            discoverable: true,
            delegation: Delegation::default(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            skills: vec![],
            priority,
            workspace_access: crate::agents::WorkspaceAccessPolicy::default(),
        }
    }

    #[test]
    fn non_head_entry_routes_to_itself() {
        let manifests = vec![manifest("ceo", true, &[], 100), manifest("writer", false, &["docs"], 50)];
        let decision = RoutingService::new().route("writer", "please help", &manifests);
        assert_eq!(decision.target_agent_id, "writer");
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn head_entry_routes_by_keyword_match() {
        let manifests = vec![
            manifest("ceo", true, &[], 100),
            manifest("writer", false, &["docs", "markdown"], 50),
            manifest("engineer", false, &["code", "rust"], 50),
        ];
        let decision = RoutingService::new().route("ceo", "please draft the docs in markdown", &manifests);
        assert_eq!(decision.target_agent_id, "writer");
        assert!(decision.rewritten_message.contains("@writer"));
    }

    #[test]
    fn no_match_falls_back_to_head_with_low_confidence() {
        let manifests = vec![manifest("ceo", true, &[], 100), manifest("writer", false, &["docs"], 50)];
        let decision = RoutingService::new().route("ceo", "zzz qqq", &manifests);
        assert_eq!(decision.target_agent_id, "ceo");
        assert_eq!(decision.confidence, 0.35);
    }

    #[test]
    fn routing_is_idempotent_for_same_inputs() {
        let manifests = vec![
            manifest("ceo", true, &[], 100),
            manifest("writer", false, &["docs"], 50),
        ];
        let a = RoutingService::new().route("ceo", "write the docs", &manifests);
        let b = RoutingService::new().route("ceo", "write the docs", &manifests);
        assert_eq!(a.target_agent_id, b.target_agent_id);
        assert_eq!(
            a.candidates.iter().map(|c| c.agent_id.clone()).collect::<Vec<_>>(),
            b.candidates.iter().map(|c| c.agent_id.clone()).collect::<Vec<_>>()
        );
    }
}
