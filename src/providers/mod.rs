pub mod azure_devops;

use async_trait::async_trait;

use crate::error::DomainError;
use crate::model::{Identifier, WorkItemRecord};

pub use azure_devops::AzureDevOpsClient;

/// Remote source of work items, as seen by the validator.
#[async_trait]
pub trait WorkItemApi: Send + Sync {
    /// True only when the remote answers 2xx. Never fails.
    async fn check_credential(&self, token: &str, organization: &str) -> bool;

    async fn fetch_work_item(
        &self,
        identifier: &Identifier,
        token: &str,
    ) -> Result<WorkItemRecord, DomainError>;
}
