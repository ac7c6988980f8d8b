use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Canonical reference to one work item.
///
/// Equality and hashing consider only organization, project and id; the URL
/// the identifier was resolved from is provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
    pub organization: String,
    pub project: String,
    pub work_item_id: u32,
    pub source_url: String,
}

impl Identifier {
    pub fn new(
        organization: impl Into<String>,
        project: impl Into<String>,
        work_item_id: u32,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            organization: organization.into(),
            project: project.into(),
            work_item_id,
            source_url: source_url.into(),
        }
    }

    pub fn validate_structure(&self) -> Result<(), String> {
        if !is_valid_name(&self.organization) {
            return Err(format!("invalid organization name {:?}", self.organization));
        }
        if !is_valid_name(&self.project) {
            return Err(format!("invalid project name {:?}", self.project));
        }
        if self.work_item_id == 0 {
            return Err("work item id must be a positive integer".into());
        }
        if self.source_url.trim().is_empty() {
            return Err("source URL is empty".into());
        }
        Ok(())
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.organization == other.organization
            && self.project == other.project
            && self.work_item_id == other.work_item_id
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.organization.hash(state);
        self.project.hash(state);
        self.work_item_id.hash(state);
    }
}

/// Letters, digits, space, hyphen, underscore and period; non-empty.
pub fn is_valid_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
}
