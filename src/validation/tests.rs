use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::*;

/// Records calls and tracks how many lookups are in flight at once.
#[derive(Default)]
struct MockApi {
    calls: Mutex<Vec<u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_with: Option<ErrorCode>,
    blank_title: bool,
    panic: bool,
    state: Mutex<String>,
}

impl MockApi {
    fn new() -> Self {
        Self {
            state: Mutex::new("Active".into()),
            ..Default::default()
        }
    }

    fn failing(code: ErrorCode) -> Self {
        Self {
            fail_with: Some(code),
            ..Self::new()
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn record(id: u32, state: &str) -> WorkItemRecord {
    WorkItemRecord {
        id,
        title: format!("Item {id}"),
        state: state.into(),
        description: String::new(),
        acceptance_criteria: vec![],
        assignee: None,
        creator: "Unknown".into(),
        changed_by: "Unknown".into(),
        created_at: String::new(),
        modified_at: String::new(),
        work_item_type: "Bug".into(),
        tags: BTreeSet::new(),
        area_path: String::new(),
        iteration_path: String::new(),
        board_column: String::new(),
        board_column_done: false,
        url: String::new(),
    }
}

#[async_trait]
impl WorkItemApi for MockApi {
    async fn check_credential(&self, _token: &str, _organization: &str) -> bool {
        true
    }

    async fn fetch_work_item(
        &self,
        identifier: &Identifier,
        _token: &str,
    ) -> Result<WorkItemRecord, DomainError> {
        self.calls.lock().unwrap().push(identifier.work_item_id);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        // Later items finish first so completion order differs from input order.
        let delay = 60u64.saturating_sub(u64::from(identifier.work_item_id) * 10);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panic {
            panic!("mock lookup exploded");
        }
        if let Some(code) = self.fail_with {
            return Err(DomainError::new(code, "mock failure"));
        }
        let mut item = record(identifier.work_item_id, &self.state.lock().unwrap());
        if self.blank_title {
            item.title = "  ".into();
        }
        Ok(item)
    }
}

fn identifier(id: u32) -> Identifier {
    Identifier::new(
        "acme",
        "Web",
        id,
        format!("https://dev.azure.com/acme/Web/_workitems/edit/{id}"),
    )
}

#[tokio::test]
async fn valid_identifier_returns_record() {
    let api = Arc::new(MockApi::new());
    let validator = Validator::new(api.clone());

    let result = validator.validate(&identifier(4), "pat").await;
    assert!(result.is_valid);
    assert_eq!(result.data.unwrap().id, 4);
    assert!(result.error.is_none());
    assert_eq!(api.call_count(), 1);
}

#[tokio::test]
async fn structural_failure_short_circuits() {
    let api = Arc::new(MockApi::new());
    let validator = Validator::new(api.clone());

    for bad in [
        Identifier::new("", "Web", 1, "u"),
        Identifier::new("acme", "We/b", 1, "u"),
        Identifier::new("acme", "Web", 0, "u"),
        Identifier::new("acme", "Web", 1, ""),
    ] {
        let result = validator.validate(&bad, "pat").await;
        assert!(!result.is_valid);
        assert!(result.data.is_none());
        assert_eq!(result.error.unwrap().code, ErrorCode::InvalidPbiInfo);
    }
    assert_eq!(api.call_count(), 0);
}

#[tokio::test]
async fn remote_errors_pass_through_unchanged() {
    for code in [
        ErrorCode::InvalidPat,
        ErrorCode::WorkItemNotFound,
        ErrorCode::RateLimitExceeded,
        ErrorCode::NetworkError,
    ] {
        let validator = Validator::new(Arc::new(MockApi::failing(code)));
        let err = validator.validate(&identifier(1), "pat").await.error.unwrap();
        assert_eq!(err, DomainError::new(code, "mock failure"));
    }
}

#[tokio::test]
async fn incomplete_record_is_invalid_data() {
    let api = MockApi {
        blank_title: true,
        ..MockApi::new()
    };
    let validator = Validator::new(Arc::new(api));
    let err = validator.validate(&identifier(1), "pat").await.error.unwrap();
    assert_eq!(err.code, ErrorCode::InvalidPbiData);
    assert!(err.message.contains("title"));
}

#[tokio::test]
async fn panicking_lookup_becomes_validation_error() {
    let api = MockApi {
        panic: true,
        ..MockApi::new()
    };
    let validator = Validator::new(Arc::new(api));
    let err = validator.validate(&identifier(1), "pat").await.error.unwrap();
    assert_eq!(err.code, ErrorCode::ValidationError);
    assert!(err.retryable());
}

#[tokio::test]
async fn exists_mirrors_validity() {
    let validator = Validator::new(Arc::new(MockApi::new()));
    assert!(validator.exists(&identifier(1), "pat").await);
    assert!(!validator.exists(&identifier(0), "pat").await);

    let failing = Validator::new(Arc::new(MockApi::failing(ErrorCode::WorkItemNotFound)));
    assert!(!failing.exists(&identifier(1), "pat").await);
}

#[tokio::test]
async fn batch_preserves_order_and_bounds_concurrency() {
    let api = Arc::new(MockApi::new());
    let validator = Validator::new(api.clone());
    let ids: Vec<Identifier> = (1..=5).map(identifier).collect();

    let results = validator.validate_batch(&ids, "pat").await;

    assert_eq!(results.len(), 5);
    let returned: Vec<u32> = results.iter().map(|r| r.data.as_ref().unwrap().id).collect();
    assert_eq!(returned, vec![1, 2, 3, 4, 5]);
    assert_eq!(api.call_count(), 5);
    assert!(api.max_in_flight.load(Ordering::SeqCst) <= 3);
    assert!(api.max_in_flight.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn zero_batch_size_runs_one_at_a_time() {
    let api = Arc::new(MockApi::new());
    let validator = Validator::with_batch_size(api.clone(), 0);
    let ids: Vec<Identifier> = (1..=3).map(identifier).collect();

    let results = validator.validate_batch(&ids, "pat").await;

    let returned: Vec<u32> = results.iter().map(|r| r.data.as_ref().unwrap().id).collect();
    assert_eq!(returned, vec![1, 2, 3]);
    assert_eq!(*api.calls.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(api.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn batch_mixes_valid_and_invalid_in_place() {
    let api = Arc::new(MockApi::new());
    let validator = Validator::with_batch_size(api.clone(), 2);
    let ids = vec![identifier(1), identifier(0), identifier(3)];

    let results = validator.validate_batch(&ids, "pat").await;
    let validity: Vec<bool> = results.iter().map(|r| r.is_valid).collect();
    assert_eq!(validity, vec![true, false, true]);
    assert_eq!(api.call_count(), 2);
    assert!(api.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn refresh_reports_changed_fields() {
    let api = Arc::new(MockApi::new());
    let validator = Validator::new(api.clone());
    let first = validator.validate(&identifier(2), "pat").await.into_result().unwrap();

    let unchanged = validator.refresh(&first, &identifier(2), "pat").await.unwrap();
    assert!(unchanged.changed_fields.is_empty());

    *api.state.lock().unwrap() = "Done".into();
    let changed = validator.refresh(&first, &identifier(2), "pat").await.unwrap();
    assert_eq!(changed.changed_fields, vec!["state"]);
    assert_eq!(changed.record.state, "Done");
    assert_eq!(first.state, "Active");
}

#[tokio::test]
async fn refresh_surfaces_typed_error() {
    let validator = Validator::new(Arc::new(MockApi::failing(ErrorCode::ServerError)));
    let previous = record(1, "Active");
    let err = validator.refresh(&previous, &identifier(1), "pat").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ServerError);
}

#[test]
fn friendly_messages_cover_common_codes() {
    let common = [
        ErrorCode::InvalidPat,
        ErrorCode::InsufficientPermissions,
        ErrorCode::WorkItemNotFound,
        ErrorCode::RateLimitExceeded,
        ErrorCode::NetworkError,
    ];
    for code in common {
        let err = DomainError::new(code, "diag");
        let message = friendly_message(&err);
        assert!(message.len() > err.user_message.len(), "{code}");
    }

    let other = DomainError::new(ErrorCode::ApiError, "diag").with_user_message("custom text");
    assert_eq!(friendly_message(&other), "custom text");
}
