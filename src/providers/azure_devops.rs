use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::WorkItemApi;
use crate::error::{DomainError, ErrorCode};
use crate::model::{Identifier, WorkItemRecord};
use crate::util::html::{sanitize_html, split_criteria};

pub const DEFAULT_BASE_URL: &str = "https://dev.azure.com";
pub const API_VERSION: &str = "7.1";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const UNKNOWN: &str = "Unknown";

pub struct AzureDevOpsClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl AzureDevOpsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url: String = base_url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client,
        }
    }

    pub fn work_item_url(&self, identifier: &Identifier) -> String {
        format!(
            "{}/{}/{}/_apis/wit/workitems/{}?api-version={API_VERSION}",
            self.base_url,
            urlencoding::encode(&identifier.organization),
            urlencoding::encode(&identifier.project),
            identifier.work_item_id
        )
    }

    pub fn projects_url(&self, organization: &str) -> String {
        format!(
            "{}/{}/_apis/projects?api-version={API_VERSION}",
            self.base_url,
            urlencoding::encode(organization)
        )
    }

    /// Sends a GET and reads the body, bounded by the client timeout.
    async fn get(&self, url: &str, token: &str) -> Result<(u16, String), DomainError> {
        let request = self
            .client
            .get(url)
            .header(AUTHORIZATION, auth_header(token))
            .header(ACCEPT, "application/json");

        let exchange = async {
            let resp = request.send().await?;
            let status = resp.status().as_u16();
            let body = resp.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(DomainError::network(format!("Azure DevOps request failed: {e}"))),
            Err(_) => Err(DomainError::network(format!(
                "Azure DevOps request timed out after {}s",
                self.timeout.as_secs_f32()
            ))),
        }
    }
}

/// HTTP Basic with an empty user name and the token as password.
///
/// Anything outside `[A-Za-z0-9]` is removed from the token first, which
/// drops zero-width and other characters picked up by copy/paste.
pub fn auth_header(token: &str) -> String {
    let clean: String = token.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!(":{clean}"));
    format!("Basic {encoded}")
}

#[async_trait]
impl WorkItemApi for AzureDevOpsClient {
    async fn check_credential(&self, token: &str, organization: &str) -> bool {
        match self.get(&self.projects_url(organization), token).await {
            Ok((status, _)) => {
                debug!(organization, status, "credential check answered");
                (200..300).contains(&status)
            }
            Err(e) => {
                warn!(organization, error = %e, "credential check failed");
                false
            }
        }
    }

    async fn fetch_work_item(
        &self,
        identifier: &Identifier,
        token: &str,
    ) -> Result<WorkItemRecord, DomainError> {
        debug!(
            organization = %identifier.organization,
            project = %identifier.project,
            id = identifier.work_item_id,
            "fetching work item"
        );
        let (status, body) = self.get(&self.work_item_url(identifier), token).await?;

        if !(200..300).contains(&status) {
            let err = DomainError::from_status(status, &body);
            warn!(
                status,
                code = %err.code,
                id = identifier.work_item_id,
                "work item request rejected"
            );
            return Err(err);
        }

        record_from_body(&body, identifier)
    }
}

#[derive(Deserialize)]
struct WireWorkItem {
    id: Option<u32>,
    #[serde(default)]
    fields: Map<String, Value>,
}

/// Converts a work-item response body into a record.
pub fn record_from_body(
    body: &str,
    identifier: &Identifier,
) -> Result<WorkItemRecord, DomainError> {
    let wire: WireWorkItem = serde_json::from_str(body).map_err(|e| {
        DomainError::new(
            ErrorCode::ApiError,
            format!("Azure DevOps response was not a work item: {e}"),
        )
    })?;
    let fields = &wire.fields;

    let description = text_field(fields, "System.Description")
        .map(|html| sanitize_html(&html))
        .unwrap_or_default();
    let acceptance_criteria = text_field(fields, "Microsoft.VSTS.Common.AcceptanceCriteria")
        .map(|html| split_criteria(&html))
        .unwrap_or_default();
    let tags = text_field(fields, "System.Tags")
        .map(|raw| {
            raw.split(';')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_else(BTreeSet::new);

    Ok(WorkItemRecord {
        id: wire.id.unwrap_or_default(),
        title: text_field(fields, "System.Title").unwrap_or_default(),
        state: text_field(fields, "System.State").unwrap_or_default(),
        description,
        acceptance_criteria,
        assignee: identity_field(fields, "System.AssignedTo"),
        creator: identity_field(fields, "System.CreatedBy").unwrap_or_else(|| UNKNOWN.into()),
        changed_by: identity_field(fields, "System.ChangedBy").unwrap_or_else(|| UNKNOWN.into()),
        created_at: text_field(fields, "System.CreatedDate").unwrap_or_default(),
        modified_at: text_field(fields, "System.ChangedDate").unwrap_or_default(),
        work_item_type: text_field(fields, "System.WorkItemType")
            .unwrap_or_else(|| UNKNOWN.into()),
        tags,
        area_path: text_field(fields, "System.AreaPath").unwrap_or_default(),
        iteration_path: text_field(fields, "System.IterationPath").unwrap_or_default(),
        board_column: text_field(fields, "System.BoardColumn").unwrap_or_default(),
        board_column_done: bool_field(fields, "System.BoardColumnDone"),
        url: identifier.source_url.clone(),
    })
}

fn text_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    match fields.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Identity fields arrive either as `{ "displayName": .. }` or as a plain string.
fn identity_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    let value = fields.get(name)?;
    let display = match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => ["displayName", "uniqueName"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str))
            .map(String::from),
        _ => None,
    };
    display.filter(|d| !d.trim().is_empty())
}

fn bool_field(fields: &Map<String, Value>, name: &str) -> bool {
    match fields.get(name) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
