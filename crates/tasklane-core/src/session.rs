//! Event-driven driver around [`ListState`].
//!
//! Intents are applied to the state synchronously. Requests run as spawned tasks
//! and report back over a channel, so the caller stays responsive while they are
//! in flight. Completions are applied one at a time by
//! [`Session::next_completion`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::backend::{TaskBackend, TaskPage};
use crate::error::SyncError;
use crate::state::{
    FetchOutcome, FetchTicket, ListState, Mutation, MutationOutcome, MutationTicket,
};
use crate::task::{Filter, TaskForm, TaskId};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub page_size: u64,
    pub request_timeout: Duration,
    pub filter: Filter,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            page_size: crate::state::DEFAULT_PAGE_SIZE,
            request_timeout: DEFAULT_TIMEOUT,
            filter: Filter::Pending,
        }
    }
}

#[derive(Debug)]
enum Completion {
    Fetch(FetchTicket, Result<TaskPage, SyncError>),
    Mutation(MutationTicket, Result<(), SyncError>),
}

/// Result of applying one completion.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Fetched(FetchOutcome),
    Mutated(MutationOutcome),
}

pub struct Session {
    state: ListState,
    form: TaskForm,
    backend: Arc<dyn TaskBackend>,
    request_timeout: Duration,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
    in_flight: usize,
}

impl Session {
    pub fn new(backend: Arc<dyn TaskBackend>, options: SessionOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: ListState::new(options.page_size, options.filter),
            form: TaskForm::default(),
            backend,
            request_timeout: options.request_timeout,
            tx,
            rx,
            in_flight: 0,
        }
    }

    pub fn state(&self) -> &ListState {
        &self.state
    }

    pub fn form(&self) -> &TaskForm {
        &self.form
    }

    /// Requests spawned but not yet applied, stale ones included.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn mount(&mut self) {
        let ticket = self.state.mount();
        self.spawn_fetch(ticket);
    }

    pub fn switch_filter(&mut self, filter: Filter) {
        if let Some(ticket) = self.state.switch_filter(filter) {
            self.spawn_fetch(ticket);
        }
    }

    pub fn refresh(&mut self) {
        let ticket = self.state.refresh();
        self.spawn_fetch(ticket);
    }

    /// Returns whether a request was issued.
    pub fn advance_page(&mut self) -> bool {
        match self.state.advance_page() {
            Some(ticket) => {
                self.spawn_fetch(ticket);
                true
            }
            None => false,
        }
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.form.set_title(title);
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.form.set_description(description);
    }

    /// Submits the form. Returns whether a request was issued.
    pub fn submit_form(&mut self) -> bool {
        match self.state.begin_create(&self.form) {
            Some(ticket) => {
                self.spawn_mutation(ticket);
                true
            }
            None => false,
        }
    }

    pub fn mark_done(&mut self, id: TaskId) -> bool {
        match self.state.begin_mark_done(id) {
            Some(ticket) => {
                self.spawn_mutation(ticket);
                true
            }
            None => false,
        }
    }

    pub fn delete(&mut self, id: TaskId) -> bool {
        match self.state.begin_delete(id) {
            Some(ticket) => {
                self.spawn_mutation(ticket);
                true
            }
            None => false,
        }
    }

    pub fn dismiss_error(&mut self) {
        self.state.dismiss_error();
    }

    /// Waits for the next request to finish and applies it. Returns `None` when
    /// nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<SessionEvent> {
        if self.in_flight == 0 {
            return None;
        }
        let completion = self.rx.recv().await?;
        self.in_flight -= 1;
        Some(self.apply(completion))
    }

    /// Applies completions until nothing is in flight, including the reloads that
    /// successful mutations trigger.
    pub async fn settle(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_completion().await {
            events.push(event);
        }
        events
    }

    fn apply(&mut self, completion: Completion) -> SessionEvent {
        match completion {
            Completion::Fetch(ticket, result) => {
                SessionEvent::Fetched(self.state.apply_fetch(ticket, result))
            }
            Completion::Mutation(ticket, result) => {
                let outcome = self.state.finish_mutation(&ticket, result);
                if let MutationOutcome::Reload(reload) = &outcome {
                    if matches!(ticket.mutation, Mutation::Create(_)) {
                        self.form.clear();
                    }
                    self.spawn_fetch(*reload);
                }
                SessionEvent::Mutated(outcome)
            }
        }
    }

    #[instrument(skip(self), fields(request_id = %ticket.request_id, epoch = ticket.epoch, filter = %ticket.filter, page = ticket.page_index))]
    fn spawn_fetch(&mut self, ticket: FetchTicket) {
        debug!("issuing list request");
        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        let limit = self.request_timeout;
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = bounded(
                limit,
                backend.list_tasks(ticket.filter, ticket.page_index, ticket.page_size),
            )
            .await;
            let _ = tx.send(Completion::Fetch(ticket, result));
        });
    }

    #[instrument(skip(self), fields(request_id = %ticket.request_id, mutation = ticket.mutation.name()))]
    fn spawn_mutation(&mut self, ticket: MutationTicket) {
        info!("issuing mutation");
        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        let limit = self.request_timeout;
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = match &ticket.mutation {
                Mutation::Create(task) => bounded(limit, backend.create_task(task)).await,
                Mutation::MarkDone(id) => bounded(limit, backend.mark_done(*id)).await,
                Mutation::Delete(id) => bounded(limit, backend.delete_task(*id)).await,
            };
            let _ = tx.send(Completion::Mutation(ticket, result));
        });
    }
}

async fn bounded<T>(
    limit: Duration,
    request: impl Future<Output = Result<T, SyncError>>,
) -> Result<T, SyncError> {
    match tokio::time::timeout(limit, request).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(limit)),
    }
}
