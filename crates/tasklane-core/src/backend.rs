//! Access to the remote task collection.
//!
//! [`TaskBackend`] is the seam the session drives; [`HttpBackend`] speaks the REST
//! contract of the task service.

use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tasklane_shared::{ApiEnvelope, ErrorBody, TaskCreate, TaskDto, TaskPatch, TasksListArgs};
use tracing::{debug, instrument, warn};

use crate::error::SyncError;
use crate::task::{Filter, NewTask, Task, TaskId};

pub const FETCH_FAILED: &str = "Failed to fetch tasks.";
pub const ADD_FAILED: &str = "Failed to add task.";
pub const MARK_DONE_FAILED: &str = "Failed to mark task as done.";
pub const DELETE_FAILED: &str = "Failed to delete task.";
pub const UNEXPECTED_SHAPE: &str = "Unexpected response structure from backend.";

/// One page of a filtered listing.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPage {
    pub items: Vec<Task>,
    pub total_count: u64,
}

#[async_trait]
pub trait TaskBackend: Send + Sync {
    async fn list_tasks(
        &self,
        filter: Filter,
        page_index: u64,
        page_size: u64,
    ) -> Result<TaskPage, SyncError>;

    async fn create_task(&self, task: &NewTask) -> Result<(), SyncError>;

    async fn mark_done(&self, id: TaskId) -> Result<(), SyncError>;

    async fn delete_task(&self, id: TaskId) -> Result<(), SyncError>;
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(base_url.trim())
            .with_context(|| format!("invalid backend base URL: {base_url}"))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("backend base URL cannot carry a path: {base_url}"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tasklane/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        debug!(base = %base, timeout_secs = timeout.as_secs(), "configured HTTP backend");
        Ok(Self {
            client,
            base,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn list_url(&self, args: TasksListArgs) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("completed", &args.completed.to_string())
            .append_pair("page", &args.page.to_string())
            .append_pair("size", &args.size.to_string());
        url
    }

    fn item_url(&self, id: TaskId) -> Result<Url, SyncError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Network {
                status: None,
                message: format!("cannot address task {id} under {}", self.base),
            })?
            .pop_if_empty()
            .push(&id.to_string());
        Ok(url)
    }

    fn transport_error(&self, err: reqwest::Error, fallback: &str) -> SyncError {
        if err.is_timeout() {
            return SyncError::Timeout(self.timeout);
        }
        SyncError::Network {
            status: err.status().map(|s| s.as_u16()),
            message: format!("{fallback} ({err})"),
        }
    }

    /// Sends the request and returns the body of a 2xx response.
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        fallback: &str,
    ) -> Result<Vec<u8>, SyncError> {
        let response = request
            .send()
            .await
            .map_err(|err| self.transport_error(err, fallback))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(err, fallback))?;

        if !status.is_success() {
            return Err(http_error(status, &body, fallback));
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl TaskBackend for HttpBackend {
    #[instrument(skip(self))]
    async fn list_tasks(
        &self,
        filter: Filter,
        page_index: u64,
        page_size: u64,
    ) -> Result<TaskPage, SyncError> {
        let url = self.list_url(TasksListArgs {
            completed: filter.completed_flag(),
            page: page_index,
            size: page_size,
        });
        debug!(url = %url, "listing tasks");

        let body = self.execute(self.client.get(url), FETCH_FAILED).await?;
        decode_page(&body)
    }

    #[instrument(skip(self, task), fields(title_len = task.title.len()))]
    async fn create_task(&self, task: &NewTask) -> Result<(), SyncError> {
        let request = self.client.post(self.base.clone()).json(&TaskCreate::from(task));
        let body = self.execute(request, ADD_FAILED).await?;
        log_ack(&body);
        Ok(())
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn mark_done(&self, id: TaskId) -> Result<(), SyncError> {
        let request = self
            .client
            .put(self.item_url(id)?)
            .json(&TaskPatch { completed: true });
        let body = self.execute(request, MARK_DONE_FAILED).await?;
        log_ack(&body);
        Ok(())
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn delete_task(&self, id: TaskId) -> Result<(), SyncError> {
        let request = self.client.delete(self.item_url(id)?);
        let body = self.execute(request, DELETE_FAILED).await?;
        log_ack(&body);
        Ok(())
    }
}

/// Decodes a listing body; anything short of `status == 0` with both `object` and
/// `pagination.totalElements` present is a protocol error.
pub fn decode_page(body: &[u8]) -> Result<TaskPage, SyncError> {
    let envelope: ApiEnvelope<Vec<TaskDto>> = serde_json::from_slice(body)
        .map_err(|err| SyncError::Protocol(format!("{UNEXPECTED_SHAPE} ({err})")))?;

    let shape_error = |message: Option<String>| {
        SyncError::Protocol(message.unwrap_or_else(|| UNEXPECTED_SHAPE.to_string()))
    };

    if !envelope.is_ok() {
        return Err(shape_error(envelope.message));
    }
    let (Some(object), Some(pagination)) = (envelope.object, envelope.pagination) else {
        return Err(shape_error(envelope.message));
    };
    let Some(total_count) = pagination.total_elements else {
        return Err(shape_error(envelope.message));
    };

    let items = object
        .into_iter()
        .map(Task::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TaskPage { items, total_count })
}

fn http_error(status: StatusCode, body: &[u8], fallback: &str) -> SyncError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|body| body.message)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string());
    warn!(status = status.as_u16(), message = %message, "backend rejected request");
    SyncError::Network {
        status: Some(status.as_u16()),
        message,
    }
}

fn log_ack(body: &[u8]) {
    match serde_json::from_slice::<ApiEnvelope<serde_json::Value>>(body) {
        Ok(envelope) => debug!(status = ?envelope.status, message = ?envelope.message, "backend acknowledged"),
        Err(_) => debug!(bytes = body.len(), "backend acknowledged with non-envelope body"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    fn backend(base: &str) -> HttpBackend {
        HttpBackend::new(base, Duration::from_secs(5)).expect("backend")
    }

    #[test]
    fn list_url_carries_filter_and_cursor() {
        let url = backend("http://localhost:8080/api/v1/tasks").list_url(TasksListArgs {
            completed: false,
            page: 0,
            size: 5,
        });
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/v1/tasks?completed=false&page=0&size=5"
        );
    }

    #[test]
    fn item_url_appends_id_with_or_without_trailing_slash() {
        let plain = backend("http://localhost:8080/api/v1/tasks");
        let slashed = backend("http://localhost:8080/api/v1/tasks/");
        for b in [plain, slashed] {
            assert_eq!(
                b.item_url(TaskId(7)).expect("url").as_str(),
                "http://localhost:8080/api/v1/tasks/7"
            );
        }
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(HttpBackend::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpBackend::new("mailto:someone@example.com", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn decode_page_requires_status_object_and_pagination() {
        let missing_pagination = json!({ "status": 0, "object": [] }).to_string();
        let err = decode_page(missing_pagination.as_bytes()).expect_err("no pagination");
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.user_message(), UNEXPECTED_SHAPE);

        let failed = json!({ "status": 1, "message": "boom" }).to_string();
        let err = decode_page(failed.as_bytes()).expect_err("status 1");
        assert_eq!(err.user_message(), "boom");

        let garbage = decode_page(b"<html>").expect_err("not json");
        assert_eq!(garbage.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn http_error_prefers_backend_message() {
        let err = http_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            br#"{"message":"server error"}"#,
            MARK_DONE_FAILED,
        );
        assert_eq!(err.user_message(), "server error");
        assert_eq!(err.http_status(), Some(500));

        let err = http_error(StatusCode::BAD_GATEWAY, b"", FETCH_FAILED);
        assert_eq!(err.user_message(), FETCH_FAILED);
    }
}
