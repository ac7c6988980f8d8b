use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Snapshot of a remote work item. A refresh produces a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemRecord {
    pub id: u32,
    pub title: String,
    pub state: String,
    /// Sanitized plain text.
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub creator: String,
    pub changed_by: String,
    pub created_at: String,
    pub modified_at: String,
    pub work_item_type: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub area_path: String,
    pub iteration_path: String,
    pub board_column: String,
    pub board_column_done: bool,
    pub url: String,
}

impl WorkItemRecord {
    /// Names of the fields that must be present for a record to be displayable.
    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.id == 0 {
            missing.push("id");
        }
        if self.title.trim().is_empty() {
            missing.push("title");
        }
        if self.state.trim().is_empty() {
            missing.push("state");
        }
        missing
    }

    /// Displayed fields whose values differ between two snapshots.
    pub fn changed_fields(&self, newer: &WorkItemRecord) -> Vec<&'static str> {
        let mut changed = Vec::new();
        macro_rules! cmp {
            ($($field:ident => $name:literal),* $(,)?) => {
                $(if self.$field != newer.$field { changed.push($name); })*
            };
        }
        cmp!(
            title => "title",
            state => "state",
            description => "description",
            acceptance_criteria => "acceptanceCriteria",
            assignee => "assignee",
            work_item_type => "workItemType",
            tags => "tags",
            area_path => "areaPath",
            iteration_path => "iterationPath",
            board_column => "boardColumn",
            board_column_done => "boardColumnDone",
        );
        changed
    }
}
