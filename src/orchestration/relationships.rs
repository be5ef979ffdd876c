//! Append-only log of inter-agent relationships.

use chrono::Utc;

use super::types::{AgentRelationship, RelationshipKind};

#[derive(Debug, Default)]
pub struct RelationshipLog {
    entries: Vec<AgentRelationship>,
}

impl RelationshipLog {
    pub fn add(
        &mut self,
        source_id: &str,
        target_id: &str,
        kind: RelationshipKind,
        task_description: Option<String>,
    ) -> AgentRelationship {
        let relationship = AgentRelationship {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            kind,
            task_description,
            created_at: Utc::now(),
        };
        self.entries.push(relationship.clone());
        relationship
    }

    /// Relabel every `waiting` edge from `source_id` as `completed`.
    /// Returns the relabelled edges.
    pub fn complete_waiting(&mut self, source_id: &str) -> Vec<AgentRelationship> {
        self.entries
            .iter_mut()
            .filter(|r| r.source_id == source_id && r.kind == RelationshipKind::Waiting)
            .map(|r| {
                r.kind = RelationshipKind::Completed;
                r.clone()
            })
            .collect()
    }

    pub fn all(&self) -> &[AgentRelationship] {
        &self.entries
    }

    pub fn active(&self) -> Vec<AgentRelationship> {
        self.entries
            .iter()
            .filter(|r| r.kind != RelationshipKind::Completed)
            .cloned()
            .collect()
    }
}
