//! Wire types of the task backend's REST
//! contract.
//!
//! Every field the backend may omit is
//! optional here; deciding whether an
//! omission is fatal belongs to the caller.

use serde::{
  Deserialize,
  Serialize
};

/// `status` value the backend reports for
/// a successful call.
pub const STATUS_OK: i64 = 0;

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
)]
#[serde(rename_all = "camelCase")]
pub struct TaskDto {
  pub id:          Option<u64>,
  pub title:       Option<String>,
  pub description: Option<String>,
  #[serde(default)]
  pub completed:   bool,
  pub created_at:  Option<String>
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Default,
)]
#[serde(rename_all = "camelCase")]
pub struct PaginationDto {
  pub total_elements: Option<u64>,
  #[serde(default)]
  pub current_page:   u64,
  #[serde(default)]
  pub page_size:      u64,
  #[serde(default)]
  pub total_pages:    u64
}

/// Envelope wrapped around every backend
/// response body.
#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct ApiEnvelope<T> {
  pub status:     Option<i64>,
  #[serde(default)]
  pub message:    Option<String>,
  #[serde(default = "Option::default")]
  pub object:     Option<T>,
  #[serde(default)]
  pub pagination: Option<PaginationDto>
}

impl<T> ApiEnvelope<T> {
  pub fn is_ok(&self) -> bool {
    self.status == Some(STATUS_OK)
  }
}

/// Query string of the listing endpoint.
#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct TasksListArgs {
  pub completed: bool,
  pub page:      u64,
  pub size:      u64
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct TaskCreate {
  pub title:       String,
  pub description: String,
  pub completed:   bool
}

impl TaskCreate {
  pub fn pending(
    title: impl Into<String>,
    description: impl Into<String>
  ) -> Self {
    Self {
      title:       title.into(),
      description: description.into(),
      completed:   false
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct TaskPatch {
  pub completed: bool
}

/// Body returned alongside a non-2xx
/// status.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Default,
)]
pub struct ErrorBody {
  #[serde(default)]
  pub message: Option<String>
}
