//! List synchronization state machine.
//!
//! [`ListState`] holds what the task list shows and only changes through the
//! transitions below. Every transition that needs the network hands back a ticket;
//! the caller performs the request and feeds the result back through
//! [`ListState::apply_fetch`] or [`ListState::finish_mutation`].
//!
//! Each reset (filter switch, refresh, successful mutation) bumps `epoch` and
//! clears the accumulated list before the replacement request is issued. A fetch
//! result is only merged when its ticket is the one currently outstanding, so a
//! slow response from an abandoned epoch can never overwrite newer data.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::TaskPage;
use crate::error::{ErrorKind, SyncError};
use crate::task::{Filter, NewTask, Task, TaskForm, TaskId};

pub const DEFAULT_PAGE_SIZE: u64 = 5;

/// Tag attached to a list request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub epoch: u64,
    pub filter: Filter,
    pub page_index: u64,
    pub page_size: u64,
    pub request_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Create(NewTask),
    MarkDone(TaskId),
    Delete(TaskId),
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::Create(_) => "create",
            Mutation::MarkDone(_) => "mark_done",
            Mutation::Delete(_) => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationTicket {
    pub mutation: Mutation,
    pub request_id: Uuid,
}

/// What happened to a fetch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Merged { page_index: u64, received: usize },
    Stale,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The mutation was accepted; the list restarts with this fetch.
    Reload(FetchTicket),
    Failed,
}

/// The single error slot behind the modal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSlot {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ListState {
    active_filter: Filter,
    page_index: u64,
    page_size: u64,
    items: Vec<Task>,
    total_count: u64,
    epoch: u64,
    outstanding: Option<FetchTicket>,
    mutation: Option<Uuid>,
    error: Option<ErrorSlot>,
}

impl ListState {
    /// A zero page size is bumped to one.
    pub fn new(page_size: u64, filter: Filter) -> Self {
        Self {
            active_filter: filter,
            page_index: 0,
            page_size: page_size.max(1),
            items: Vec::new(),
            total_count: 0,
            epoch: 0,
            outstanding: None,
            mutation: None,
            error: None,
        }
    }

    pub fn active_filter(&self) -> Filter {
        self.active_filter
    }

    pub fn page_index(&self) -> u64 {
        self.page_index
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn items(&self) -> &[Task] {
        &self.items
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_loading(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn is_mutating(&self) -> bool {
        self.mutation.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.is_loading() || self.is_mutating()
    }

    /// "See More" condition.
    pub fn has_more(&self) -> bool {
        (self.items.len() as u64) < self.total_count
    }

    pub fn error(&self) -> Option<&ErrorSlot> {
        self.error.as_ref()
    }

    /// Initial load of the active filter.
    pub fn mount(&mut self) -> FetchTicket {
        info!(filter = %self.active_filter, "mounting task list");
        self.reset()
    }

    /// Switches tabs. Selecting the active tab again does nothing.
    pub fn switch_filter(&mut self, filter: Filter) -> Option<FetchTicket> {
        if filter == self.active_filter {
            debug!(filter = %filter, "filter already active");
            return None;
        }
        info!(from = %self.active_filter, to = %filter, "switching filter");
        self.active_filter = filter;
        Some(self.reset())
    }

    /// Reloads the active filter from page 0.
    pub fn refresh(&mut self) -> FetchTicket {
        info!(filter = %self.active_filter, "refreshing task list");
        self.reset()
    }

    /// Requests the next page. Returns `None`, without touching anything, when
    /// everything is loaded or another request is outstanding.
    pub fn advance_page(&mut self) -> Option<FetchTicket> {
        if !self.has_more() {
            debug!(
                loaded = self.items.len(),
                total = self.total_count,
                "no more pages"
            );
            return None;
        }
        if self.is_busy() {
            debug!("advance refused while a request is outstanding");
            return None;
        }
        self.page_index += 1;
        Some(self.issue_fetch())
    }

    /// Merges a list result into the state.
    pub fn apply_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<TaskPage, SyncError>,
    ) -> FetchOutcome {
        if self.outstanding.map(|t| t.request_id) != Some(ticket.request_id) {
            debug!(
                request_id = %ticket.request_id,
                ticket_epoch = ticket.epoch,
                current_epoch = self.epoch,
                ticket_filter = %ticket.filter,
                "discarding stale list response"
            );
            return FetchOutcome::Stale;
        }
        self.outstanding = None;

        let page = match result.and_then(|page| check_partition(ticket.filter, page)) {
            Ok(page) => page,
            Err(err) => {
                // the cursor only covers pages that were merged
                self.page_index = ticket.page_index.saturating_sub(1);
                self.report(err);
                return FetchOutcome::Failed;
            }
        };

        let received = page.items.len();
        if ticket.page_index == 0 {
            self.items = page.items;
        } else {
            self.items.extend(page.items);
        }

        let loaded = self.items.len() as u64;
        self.total_count = if loaded > page.total_count {
            warn!(
                loaded,
                reported = page.total_count,
                "backend total shrank below loaded items"
            );
            loaded
        } else {
            page.total_count
        };

        debug!(
            epoch = ticket.epoch,
            page = ticket.page_index,
            received,
            loaded = self.items.len(),
            total = self.total_count,
            "merged page"
        );
        FetchOutcome::Merged {
            page_index: ticket.page_index,
            received,
        }
    }

    /// Starts a create from the form contents. Blank input is reported locally and
    /// no ticket is returned.
    pub fn begin_create(&mut self, form: &TaskForm) -> Option<MutationTicket> {
        if self.is_busy() {
            debug!("create refused while a request is outstanding");
            return None;
        }
        match form.validate() {
            Ok(task) => self.begin_mutation(Mutation::Create(task)),
            Err(err) => {
                self.report(err);
                None
            }
        }
    }

    pub fn begin_mark_done(&mut self, id: TaskId) -> Option<MutationTicket> {
        self.begin_mutation(Mutation::MarkDone(id))
    }

    pub fn begin_delete(&mut self, id: TaskId) -> Option<MutationTicket> {
        self.begin_mutation(Mutation::Delete(id))
    }

    /// Completes a mutation. Success invalidates the list and restarts it.
    pub fn finish_mutation(
        &mut self,
        ticket: &MutationTicket,
        result: Result<(), SyncError>,
    ) -> MutationOutcome {
        if self.mutation == Some(ticket.request_id) {
            self.mutation = None;
        }

        match result {
            Ok(()) => {
                info!(
                    mutation = ticket.mutation.name(),
                    request_id = %ticket.request_id,
                    "mutation accepted, resynchronizing"
                );
                MutationOutcome::Reload(self.reset())
            }
            Err(err) => {
                self.report(err);
                MutationOutcome::Failed
            }
        }
    }

    /// Closes the error modal. Nothing is retried.
    pub fn dismiss_error(&mut self) {
        if self.error.take().is_some() {
            debug!("error dismissed");
        }
    }

    fn begin_mutation(&mut self, mutation: Mutation) -> Option<MutationTicket> {
        if self.is_busy() {
            debug!(mutation = mutation.name(), "mutation refused while a request is outstanding");
            return None;
        }
        let request_id = Uuid::new_v4();
        self.error = None;
        self.mutation = Some(request_id);
        Some(MutationTicket {
            mutation,
            request_id,
        })
    }

    fn reset(&mut self) -> FetchTicket {
        self.epoch += 1;
        self.page_index = 0;
        self.items.clear();
        self.issue_fetch()
    }

    fn issue_fetch(&mut self) -> FetchTicket {
        let ticket = FetchTicket {
            epoch: self.epoch,
            filter: self.active_filter,
            page_index: self.page_index,
            page_size: self.page_size,
            request_id: Uuid::new_v4(),
        };
        self.error = None;
        self.outstanding = Some(ticket);
        ticket
    }

    fn report(&mut self, err: SyncError) {
        warn!(kind = %err.kind(), status = ?err.http_status(), error = %err, "operation failed");
        self.error = Some(ErrorSlot {
            kind: err.kind(),
            message: err.user_message(),
        });
    }
}

impl Default for ListState {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, Filter::Pending)
    }
}

fn check_partition(filter: Filter, page: TaskPage) -> Result<TaskPage, SyncError> {
    match page.items.iter().find(|task| !filter.admits(task)) {
        Some(stray) => Err(SyncError::Protocol(format!(
            "backend returned task {} outside the {filter} filter",
            stray.id
        ))),
        None => Ok(page),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn task(id: u64, completed: bool) -> Task {
        Task {
            id: TaskId(id),
            title: format!("task {id}"),
            description: format!("details {id}"),
            completed,
            created_at: Utc
                .with_ymd_and_hms(2024, 5, 1, 9, 0, 0)
                .single()
                .expect("valid"),
        }
    }

    fn page(ids: std::ops::Range<u64>, completed: bool, total: u64) -> TaskPage {
        TaskPage {
            items: ids.map(|id| task(id, completed)).collect(),
            total_count: total,
        }
    }

    fn loaded(total: u64, first: std::ops::Range<u64>) -> ListState {
        let mut state = ListState::default();
        let ticket = state.mount();
        state.apply_fetch(ticket, Ok(page(first, false, total)));
        state
    }

    #[test]
    fn mount_replaces_and_reports_more() {
        let state = loaded(12, 0..5);
        assert_eq!(state.items().len(), 5);
        assert_eq!(state.total_count(), 12);
        assert!(state.has_more());
        assert!(!state.is_loading());
    }

    #[test]
    fn advance_appends_until_exhausted() {
        let mut state = loaded(12, 0..5);

        let second = state.advance_page().expect("second page");
        assert_eq!(second.page_index, 1);
        assert!(state.is_loading());
        state.apply_fetch(second, Ok(page(5..10, false, 12)));
        assert_eq!(state.items().len(), 10);
        assert!(state.has_more());

        let third = state.advance_page().expect("third page");
        state.apply_fetch(third, Ok(page(10..12, false, 12)));
        assert_eq!(state.items().len(), 12);
        assert!(!state.has_more());

        let ids: Vec<u64> = state.items().iter().map(|t| t.id.0).collect();
        assert_eq!(ids, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn advance_is_a_no_op_when_everything_is_loaded() {
        let mut state = loaded(3, 0..3);
        let before_page = state.page_index();
        assert!(state.advance_page().is_none());
        assert_eq!(state.page_index(), before_page);
        assert!(!state.is_loading());
    }

    #[test]
    fn advance_is_refused_while_loading() {
        let mut state = loaded(12, 0..5);
        let _pending = state.advance_page().expect("second page");
        assert!(state.advance_page().is_none());
        assert_eq!(state.page_index(), 1);
    }

    #[test]
    fn switch_clears_items_before_the_fetch_resolves() {
        let mut state = loaded(12, 0..5);
        let epoch = state.epoch();

        let ticket = state.switch_filter(Filter::Completed).expect("switch");
        assert_eq!(ticket.filter, Filter::Completed);
        assert_eq!(ticket.page_index, 0);
        assert!(state.items().is_empty());
        assert_eq!(state.page_index(), 0);
        assert!(state.epoch() > epoch);

        assert!(state.switch_filter(Filter::Completed).is_none());
    }

    #[test]
    fn stale_response_after_switch_is_discarded() {
        let mut state = loaded(12, 0..5);
        let old = state.advance_page().expect("page 1 of pending");
        let new = state.switch_filter(Filter::Completed).expect("switch");

        state.apply_fetch(new, Ok(page(100..102, true, 2)));
        let outcome = state.apply_fetch(old, Ok(page(5..10, false, 12)));

        assert_eq!(outcome, FetchOutcome::Stale);
        assert_eq!(state.items().len(), 2);
        assert!(state.items().iter().all(|t| t.completed));
        assert_eq!(state.total_count(), 2);
    }

    #[test]
    fn stale_failure_leaves_loading_and_error_alone() {
        let mut state = loaded(12, 0..5);
        let old = state.advance_page().expect("page 1");
        let _new = state.switch_filter(Filter::Completed).expect("switch");

        let outcome = state.apply_fetch(
            old,
            Err(SyncError::Network {
                status: Some(500),
                message: "late".into(),
            }),
        );
        assert_eq!(outcome, FetchOutcome::Stale);
        assert!(state.is_loading());
        assert!(state.error().is_none());
    }

    #[test]
    fn failed_fetch_keeps_items_and_clears_loading() {
        let mut state = loaded(12, 0..5);
        let ticket = state.advance_page().expect("page 1");
        let outcome = state.apply_fetch(
            ticket,
            Err(SyncError::Protocol("Unexpected response structure from backend.".into())),
        );
        assert_eq!(outcome, FetchOutcome::Failed);
        assert_eq!(state.items().len(), 5);
        assert!(!state.is_loading());
        assert_eq!(state.error().map(|e| e.kind), Some(ErrorKind::Protocol));
        assert_eq!(state.page_index(), 0);
    }

    #[test]
    fn retry_after_failed_page_requests_the_same_page() {
        let mut state = loaded(12, 0..5);
        let ticket = state.advance_page().expect("page 1");
        state.apply_fetch(
            ticket,
            Err(SyncError::Network {
                status: Some(500),
                message: "server error".into(),
            }),
        );
        state.dismiss_error();

        let retry = state.advance_page().expect("retry page 1");
        assert_eq!(retry.page_index, 1);
        state.apply_fetch(retry, Ok(page(5..10, false, 12)));
        let last = state.advance_page().expect("page 2");
        assert_eq!(last.page_index, 2);
        state.apply_fetch(last, Ok(page(10..12, false, 12)));

        let ids: Vec<u64> = state.items().iter().map(|t| t.id.0).collect();
        assert_eq!(ids, (0..12).collect::<Vec<_>>());
        assert!(!state.has_more());
    }

    #[test]
    fn page_from_the_wrong_partition_is_rejected_whole() {
        let mut state = ListState::default();
        let ticket = state.mount();
        let mut mixed = page(0..3, false, 3);
        mixed.items.push(task(9, true));

        assert_eq!(state.apply_fetch(ticket, Ok(mixed)), FetchOutcome::Failed);
        assert!(state.items().is_empty());
        assert_eq!(state.error().map(|e| e.kind), Some(ErrorKind::Protocol));
    }

    #[test]
    fn shrinking_total_is_raised_to_loaded_count() {
        let mut state = loaded(7, 0..5);
        let ticket = state.advance_page().expect("page 1");
        state.apply_fetch(ticket, Ok(page(5..7, false, 6)));
        assert_eq!(state.items().len(), 7);
        assert_eq!(state.total_count(), 7);
        assert!(!state.has_more());
    }

    #[test]
    fn blank_form_is_rejected_without_a_ticket() {
        let mut state = loaded(12, 0..5);
        let mut form = TaskForm::default();
        form.set_title("Plan weekend trip");

        assert!(state.begin_create(&form).is_none());
        assert!(!state.is_mutating());
        let slot = state.error().expect("validation error");
        assert_eq!(slot.kind, ErrorKind::Validation);
        assert_eq!(slot.message, "Task title and description cannot be empty.");
    }

    #[test]
    fn successful_mutation_starts_a_new_epoch() {
        let mut state = loaded(12, 0..5);
        let epoch = state.epoch();

        let ticket = state.begin_mark_done(TaskId(3)).expect("mark done");
        assert!(state.is_mutating());
        assert!(state.begin_delete(TaskId(4)).is_none());

        let outcome = state.finish_mutation(&ticket, Ok(()));
        let MutationOutcome::Reload(reload) = outcome else {
            panic!("expected reload, got {outcome:?}");
        };
        assert_eq!(reload.page_index, 0);
        assert_eq!(reload.filter, Filter::Pending);
        assert!(reload.epoch > epoch);
        assert!(state.items().is_empty());
        assert!(!state.is_mutating());
        assert!(state.is_loading());
    }

    #[test]
    fn failed_mutation_keeps_items_and_fills_the_slot() {
        let mut state = loaded(12, 0..5);
        let ticket = state.begin_mark_done(TaskId(7)).expect("mark done");
        let outcome = state.finish_mutation(
            &ticket,
            Err(SyncError::Network {
                status: Some(500),
                message: "server error".into(),
            }),
        );
        assert_eq!(outcome, MutationOutcome::Failed);
        assert_eq!(state.items().len(), 5);
        assert_eq!(state.error().map(|e| e.message.as_str()), Some("server error"));

        state.dismiss_error();
        assert!(state.error().is_none());
        assert_eq!(state.items().len(), 5);
    }

    #[test]
    fn new_operation_clears_previous_error() {
        let mut state = loaded(12, 0..5);
        let ticket = state.advance_page().expect("page 1");
        state.apply_fetch(ticket, Err(SyncError::Protocol("bad".into())));
        assert!(state.error().is_some());

        let _ = state.refresh();
        assert!(state.error().is_none());
    }

    #[test]
    fn zero_page_size_is_clamped() {
        assert_eq!(ListState::new(0, Filter::Pending).page_size(), 1);
    }
}
