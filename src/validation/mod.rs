use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{DomainError, ErrorCode};
use crate::model::{Identifier, WorkItemRecord};
use crate::providers::WorkItemApi;

pub const DEFAULT_BATCH_SIZE: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<WorkItemRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DomainError>,
}

impl ValidationResult {
    fn ok(record: WorkItemRecord) -> Self {
        Self {
            is_valid: true,
            data: Some(record),
            error: None,
        }
    }

    fn err(error: DomainError) -> Self {
        Self {
            is_valid: false,
            data: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<WorkItemRecord, DomainError> {
        match (self.data, self.error) {
            (Some(record), None) => Ok(record),
            (_, Some(error)) => Err(error),
            (None, None) => Err(DomainError::new(
                ErrorCode::ValidationError,
                "validation produced neither data nor error",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub record: WorkItemRecord,
    /// Empty when nothing displayed has changed.
    pub changed_fields: Vec<&'static str>,
}

pub struct Validator {
    api: Arc<dyn WorkItemApi>,
    batch_size: usize,
}

impl Validator {
    pub fn new(api: Arc<dyn WorkItemApi>) -> Self {
        Self::with_batch_size(api, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(api: Arc<dyn WorkItemApi>, batch_size: usize) -> Self {
        Self {
            api,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn validate(&self, identifier: &Identifier, token: &str) -> ValidationResult {
        if let Err(reason) = identifier.validate_structure() {
            debug!(%reason, "identifier failed structural check");
            return ValidationResult::err(DomainError::invalid_info(reason));
        }

        let fetch = AssertUnwindSafe(self.api.fetch_work_item(identifier, token)).catch_unwind();
        let record = match fetch.await {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => return ValidationResult::err(e),
            Err(_) => {
                warn!(id = identifier.work_item_id, "work item lookup panicked");
                return ValidationResult::err(DomainError::new(
                    ErrorCode::ValidationError,
                    "unexpected failure while fetching work item",
                ));
            }
        };

        let missing = record.missing_required_fields();
        if !missing.is_empty() {
            return ValidationResult::err(DomainError::invalid_data(format!(
                "work item response is missing {}",
                missing.join(", ")
            )));
        }
        ValidationResult::ok(record)
    }

    pub async fn exists(&self, identifier: &Identifier, token: &str) -> bool {
        self.validate(identifier, token).await.is_valid
    }

    /// Validates in groups of `batch_size`; groups run one after another,
    /// members of a group run together. Output order matches input order.
    pub async fn validate_batch(
        &self,
        identifiers: &[Identifier],
        token: &str,
    ) -> Vec<ValidationResult> {
        let mut results = Vec::with_capacity(identifiers.len());
        for (index, group) in identifiers.chunks(self.batch_size).enumerate() {
            debug!(group = index, size = group.len(), "validating batch group");
            let group_results =
                join_all(group.iter().map(|identifier| self.validate(identifier, token))).await;
            results.extend(group_results);
        }
        results
    }

    /// Refetches `identifier` and reports what changed relative to `previous`.
    pub async fn refresh(
        &self,
        previous: &WorkItemRecord,
        identifier: &Identifier,
        token: &str,
    ) -> Result<RefreshOutcome, DomainError> {
        let record = self.validate(identifier, token).await.into_result()?;
        let changed_fields = previous.changed_fields(&record);
        Ok(RefreshOutcome {
            record,
            changed_fields,
        })
    }
}

/// Longer guidance for the common failures; everything else keeps its own message.
pub fn friendly_message(error: &DomainError) -> String {
    match error.code {
        ErrorCode::InvalidPat => {
            "Your personal access token is invalid or has expired. Create a new token with \
             Work Items (Read) scope and save it again."
                .into()
        }
        ErrorCode::InsufficientPermissions => {
            "Your token cannot read this work item. Make sure it has Work Items (Read) scope \
             and that you have access to the project."
                .into()
        }
        ErrorCode::WorkItemNotFound => {
            "This work item could not be found. It may have been deleted or moved to another \
             project."
                .into()
        }
        ErrorCode::RateLimitExceeded => {
            "Azure DevOps is limiting requests right now. Wait a minute before refreshing again."
                .into()
        }
        ErrorCode::NetworkError => {
            "Could not reach Azure DevOps. Check your internet connection and try again.".into()
        }
        _ => error.user_message.clone(),
    }
}

#[cfg(test)]
mod tests;
