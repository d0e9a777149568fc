//! Projects and the dashboard projection over them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::types::{NodeId, ProjectId, Timestamp};

/// Unit of persistence: a named history of generation nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub nodes: HashMap<NodeId, Node>,
    #[serde(
        default,
        with = "crate::timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<Timestamp>,
    #[serde(with = "crate::timestamp")]
    pub updated_at: Timestamp,
}

impl Project {
    /// Normalise every node received from the store.
    pub fn normalize(&mut self) {
        for node in self.nodes.values_mut() {
            node.normalize();
        }
    }

    /// The most recently created node, if any.
    pub fn latest_node(&self) -> Option<&Node> {
        self.nodes
            .values()
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)))
    }
}

/// Dashboard card for one project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub name: String,
    pub updated_at: Timestamp,
    pub generation_count: usize,
    /// Output of the latest node, if that node has one.
    pub thumbnail: Option<String>,
}

impl ProjectSummary {
    pub fn of(project: &Project) -> Self {
        Self {
            id: project.id.clone(),
            name: project.name.clone(),
            updated_at: project.updated_at,
            generation_count: project.nodes.len(),
            thumbnail: project
                .latest_node()
                .and_then(|n| n.image_filename.clone())
                .filter(|f| !f.is_empty()),
        }
    }
}

/// Summarise projects for the dashboard, most recently updated first.
pub fn summarize_projects(projects: &[Project]) -> Vec<ProjectSummary> {
    let mut summaries: Vec<ProjectSummary> = projects.iter().map(ProjectSummary::of).collect();
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    summaries
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::node::tests::node_at;

    fn project(id: &str, updated_secs: i64, nodes: Vec<Node>) -> Project {
        Project {
            id: id.into(),
            name: format!("Project {id}"),
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            created_at: None,
            updated_at: Utc.timestamp_opt(1_700_000_000 + updated_secs, 0).unwrap(),
        }
    }

    #[test]
    fn summaries_sorted_by_update_descending() {
        let projects = vec![project("a", 10, vec![]), project("b", 30, vec![]), project("c", 20, vec![])];
        let ids: Vec<_> = summarize_projects(&projects).into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn thumbnail_is_latest_node_output() {
        let mut older = node_at("old", 0);
        older.image_filename = Some("old.png".into());
        let mut newer = node_at("new", 5);
        newer.image_filename = Some("new.png".into());

        let summary = ProjectSummary::of(&project("p", 0, vec![older, newer]));

        assert_eq!(summary.generation_count, 2);
        assert_eq!(summary.thumbnail.as_deref(), Some("new.png"));
    }

    #[test]
    fn no_thumbnail_while_latest_is_pending() {
        let mut older = node_at("old", 0);
        older.image_filename = Some("old.png".into());
        let pending = node_at("pending", 5);

        let summary = ProjectSummary::of(&project("p", 0, vec![older, pending]));

        assert!(summary.thumbnail.is_none());
    }

    #[test]
    fn deserializes_store_payload() {
        let json = r#"{
            "id": "p1",
            "name": "Harbour",
            "created_at": "2024-01-01T09:00:00",
            "updated_at": "2024-01-02T09:00:00",
            "nodes": {
                "n1": {
                    "id": "n1",
                    "params": {"prompt": "boats", "seed": 1},
                    "timestamp": "2024-01-02T09:00:00"
                }
            }
        }"#;
        let mut project: Project = serde_json::from_str(json).unwrap();
        project.normalize();

        assert_eq!(project.nodes.len(), 1);
        assert!(project.created_at.is_some());
        assert_eq!(project.latest_node().map(|n| n.id.as_str()), Some("n1"));
    }
}
