//! Conversation poller
//!
//! Sends user messages, starts a run, then polls it until it completes. When
//! the run asks for tool calls they are dispatched against the map and the
//! outputs go back upstream in a single batch.
//!
//! Only one run is ever in flight. Each poll task is tagged with its run id
//! and every side effect (tool dispatch, log append, state change) is applied
//! while holding the status channel's write lock and only if that run id is
//! still the current one, so a stale or cancelled task cannot touch state.

use crate::assistant::{AssistantApi, Role, Run, RunStatus, ThreadMessage, ToolCall, ToolOutput};
use crate::config::PollSettings;
use crate::error::{AssistantError, RunError};
use crate::log::{ConversationEntry, ConversationLog};
use crate::map::MapStore;
use crate::tools::ToolRegistry;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, warn};

pub const ASSISTANT_NAME: &str = "Wanderlust";
pub const ASSISTANT_INSTRUCTIONS: &str = "You are a friendly travel guide. \
When the user asks about a place, call update_map to center the map on it with a sensible zoom \
(2 for continents, 5 for countries, 10-12 for cities, 15+ for landmarks). \
Call add_marker to pin specific points of interest with a short label. \
Keep answers brief and mention what you put on the map.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PollerState {
    #[default]
    Idle,
    /// Message and run creation are in flight; the run slot is taken
    Submitting,
    AwaitingRun {
        run_id: String,
    },
    Completed {
        run_id: String,
    },
}

impl PollerState {
    pub fn run_id(&self) -> Option<&str> {
        match self {
            PollerState::AwaitingRun { run_id } | PollerState::Completed { run_id } => Some(run_id),
            PollerState::Idle | PollerState::Submitting => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        !matches!(self, PollerState::Idle)
    }
}

/// Poller state plus the error banner shown to the user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: PollerState,
    pub banner: Option<String>,
}

struct Shared {
    api: Arc<dyn AssistantApi>,
    thread_id: String,
    assistant_id: String,
    tools: ToolRegistry,
    log: ConversationLog,
    status: watch::Sender<SessionStatus>,
    settings: PollSettings,
    poll_task: Mutex<Option<(String, JoinHandle<()>)>>,
}

/// One chat session bound to a remote thread. Cheap to clone.
#[derive(Clone)]
pub struct Conversation {
    shared: Arc<Shared>,
}

impl Conversation {
    /// Create the remote thread and a session around it
    pub async fn start(
        api: Arc<dyn AssistantApi>,
        assistant_id: impl Into<String>,
        tools: ToolRegistry,
        settings: PollSettings,
    ) -> Result<Self, AssistantError> {
        let thread = api.create_thread().await?;
        info!(thread_id = %thread.id, "Created conversation thread");
        Ok(Self::with_thread(api, thread.id, assistant_id, tools, settings))
    }

    pub fn with_thread(
        api: Arc<dyn AssistantApi>,
        thread_id: impl Into<String>,
        assistant_id: impl Into<String>,
        tools: ToolRegistry,
        settings: PollSettings,
    ) -> Self {
        let (status, _rx) = watch::channel(SessionStatus::default());
        Self {
            shared: Arc::new(Shared {
                api,
                thread_id: thread_id.into(),
                assistant_id: assistant_id.into(),
                tools,
                log: ConversationLog::new(),
                status,
                settings,
                poll_task: Mutex::new(None),
            }),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.shared.thread_id
    }

    pub fn log(&self) -> &ConversationLog {
        &self.shared.log
    }

    pub fn map(&self) -> &MapStore {
        self.shared.tools.map()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.shared.status.borrow().state.is_busy()
    }

    pub fn dismiss_banner(&self) {
        self.shared.status.send_if_modified(|status| status.banner.take().is_some());
    }

    /// Resolves once no run is in flight
    pub async fn wait_until_idle(&self) {
        let mut rx = self.subscribe_status();
        // Sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|status| !status.state.is_busy()).await;
    }

    /// Post a user message and start a run for it. Returns the run id.
    pub async fn submit(&self, text: &str) -> Result<String, RunError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RunError::EmptyMessage);
        }

        let reserved = self.shared.status.send_if_modified(|status| {
            if status.state == PollerState::Idle {
                status.state = PollerState::Submitting;
                status.banner = None;
                true
            } else {
                false
            }
        });
        if !reserved {
            warn!("Rejected message while a run is in progress");
            return Err(RunError::Busy);
        }

        self.shared.log.append(ConversationEntry::user(text));

        let run = match self.create_run(text).await {
            Ok(run) => run,
            Err(err) => {
                error!(error = %err, "Failed to start run");
                self.shared.status.send_modify(|status| {
                    status.state = PollerState::Idle;
                    status.banner = Some(err.to_string());
                });
                return Err(err.into());
            }
        };

        info!(run_id = %run.id, "Run started");
        self.shared.status.send_modify(|status| {
            status.state = PollerState::AwaitingRun {
                run_id: run.id.clone(),
            };
        });
        self.spawn_poll(run.id.clone());
        Ok(run.id)
    }

    /// Abandon the in-flight run, if any
    pub async fn cancel(&self) {
        let mut cancelled = None;
        self.shared.status.send_if_modified(|status| match &status.state {
            PollerState::AwaitingRun { run_id } => {
                cancelled = Some(run_id.clone());
                status.state = PollerState::Idle;
                true
            }
            _ => false,
        });
        let Some(run_id) = cancelled else {
            return;
        };

        if let Some((task_run_id, handle)) = self.take_poll_task() {
            debug!(run_id = %task_run_id, "Aborting poll task");
            handle.abort();
        }
        self.shared
            .log
            .append(ConversationEntry::error("Run cancelled"));
        info!(%run_id, "Run cancelled by user");

        if let Err(err) = self.shared.api.cancel_run(&self.shared.thread_id, &run_id).await {
            warn!(%run_id, error = %err, "Remote cancel failed");
        }
    }

    async fn create_run(&self, text: &str) -> Result<Run, AssistantError> {
        let shared = &self.shared;
        shared
            .api
            .create_message(&shared.thread_id, Role::User, text)
            .await?;
        let tools = shared.tools.definitions();
        shared
            .api
            .create_run(&shared.thread_id, &shared.assistant_id, &tools)
            .await
    }

    fn spawn_poll(&self, run_id: String) {
        let this = self.clone();
        let task_run_id = run_id.clone();
        let handle = tokio::spawn(async move {
            let _ = this.run_to_completion(&task_run_id).await;
        });

        let mut slot = self
            .shared
            .poll_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some((stale_run_id, stale)) = slot.replace((run_id, handle)) {
            debug!(run_id = %stale_run_id, "Aborting stale poll task");
            stale.abort();
        }
    }

    fn take_poll_task(&self) -> Option<(String, JoinHandle<()>)> {
        self.shared
            .poll_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn is_current(&self, run_id: &str) -> bool {
        self.shared.status.borrow().state.run_id() == Some(run_id)
    }

    /// Run `f` under the status lock, but only while `run_id` is current
    fn with_current_run<R>(&self, run_id: &str, f: impl FnOnce() -> R) -> Option<R> {
        let mut out = None;
        self.shared.status.send_if_modified(|status| {
            if status.state.run_id() == Some(run_id) {
                out = Some(f());
            }
            false
        });
        out
    }

    /// Poll `run_id` to the end and publish the outcome.
    /// Outcomes of runs that are no longer current are dropped.
    pub async fn run_to_completion(&self, run_id: &str) -> Result<(), RunError> {
        let result = self.drive_run(run_id).await;
        let log = &self.shared.log;

        match result {
            Ok(Some(reply)) => {
                // The reply and the state change land together, so a cancel
                // either precedes both or sees the run already completed
                let completed = self.shared.status.send_if_modified(|status| {
                    if status.state.run_id() != Some(run_id) {
                        return false;
                    }
                    log.append(reply);
                    status.state = PollerState::Completed {
                        run_id: run_id.to_string(),
                    };
                    true
                });
                if completed {
                    info!(run_id, "Run completed");
                    self.shared.status.send_if_modified(|status| {
                        if status.state.run_id() != Some(run_id) {
                            return false;
                        }
                        status.state = PollerState::Idle;
                        true
                    });
                }
                Ok(())
            }
            Ok(None) => {
                debug!(run_id, "Run superseded; nothing to publish");
                Ok(())
            }
            Err(err) => {
                let surfaced = self.shared.status.send_if_modified(|status| {
                    if status.state.run_id() != Some(run_id) {
                        return false;
                    }
                    log.append(ConversationEntry::error(err.to_string()));
                    status.state = PollerState::Idle;
                    status.banner = Some(err.to_string());
                    true
                });
                if surfaced {
                    error!(run_id, error = %err, "Run ended with an error");
                } else {
                    debug!(run_id, error = %err, "Dropping error from stale run");
                }
                Err(err)
            }
        }
    }

    /// Poll until the run settles, bounded by `max_run_wait` including any
    /// request still in flight. `Ok(None)` means the run stopped being current.
    async fn drive_run(&self, run_id: &str) -> Result<Option<ConversationEntry>, RunError> {
        let started = Instant::now();
        let deadline = started + self.shared.settings.max_run_wait;
        match timeout_at(deadline, self.poll_run(run_id)).await {
            Ok(result) => result,
            Err(_) => Err(RunError::Timeout {
                run_id: run_id.to_string(),
                waited: started.elapsed(),
            }),
        }
    }

    async fn poll_run(&self, run_id: &str) -> Result<Option<ConversationEntry>, RunError> {
        let shared = &self.shared;
        let api = &shared.api;
        let thread_id = shared.thread_id.as_str();
        let settings = shared.settings;
        let mut transport_failures = 0u32;
        let mut dispatched_tools = false;
        // Call ids already answered; a poll can still report them before the submit lands
        let mut answered: HashSet<String> = HashSet::new();

        loop {
            if !self.is_current(run_id) {
                debug!(run_id, "Run superseded; stopping poll");
                return Ok(None);
            }

            match api.retrieve_run(thread_id, run_id).await {
                Ok(run) => {
                    transport_failures = 0;
                    debug!(run_id, status = run.status.as_str(), "Polled run");

                    match run.status {
                        RunStatus::RequiresAction => {
                            let pending: Vec<ToolCall> = run
                                .pending_tool_calls()
                                .iter()
                                .filter(|call| !answered.contains(&call.id))
                                .cloned()
                                .collect();
                            if pending.is_empty() {
                                sleep(settings.poll_interval).await;
                                continue;
                            }
                            let Some(outputs) = self.dispatch_tool_calls(run_id, &pending) else {
                                return Ok(None);
                            };
                            answered.extend(pending.into_iter().map(|call| call.id));
                            dispatched_tools |= !outputs.is_empty();
                            let outputs = outputs.as_slice();
                            self.with_retries("submit tool outputs", move || {
                                api.submit_tool_outputs(thread_id, run_id, outputs)
                            })
                            .await?;
                        }
                        RunStatus::Completed => {
                            let messages = self
                                .with_retries("list messages", move || api.list_messages(thread_id))
                                .await?;
                            let text = latest_reply(&messages, run_id);
                            return Ok(Some(ConversationEntry::assistant(text, dispatched_tools)));
                        }
                        status if status.is_failure() => {
                            return Err(RunError::Failed {
                                run_id: run_id.to_string(),
                                status: status.as_str().to_string(),
                                reason: run.failure_reason(),
                            });
                        }
                        _ => {}
                    }
                }
                // The run may not be visible right after creation
                Err(err) if err.is_not_found() => {
                    debug!(run_id, "Run not found yet; retrying");
                }
                Err(err) if err.is_retryable() && transport_failures < settings.max_transport_retries => {
                    transport_failures += 1;
                    warn!(run_id, attempt = transport_failures, error = %err, "Poll failed; retrying");
                }
                Err(err) => return Err(err.into()),
            }

            sleep(settings.poll_interval).await;
        }
    }

    /// Dispatch every pending call in order. `None` if the run stopped being
    /// current before dispatch.
    fn dispatch_tool_calls(&self, run_id: &str, calls: &[ToolCall]) -> Option<Vec<ToolOutput>> {
        let tools = &self.shared.tools;
        let log = &self.shared.log;

        self.with_current_run(run_id, || {
            calls
                .iter()
                .map(|call| match tools.dispatch(call) {
                    Ok(output) => {
                        log.append(ConversationEntry::ToolResult {
                            call_id: output.tool_call_id.clone(),
                            tool: call.function.name.clone(),
                            output: output.output.clone(),
                        });
                        output
                    }
                    Err(err) => {
                        warn!(run_id, call_id = %call.id, error = %err, "Tool call failed");
                        log.append(ConversationEntry::error(err.to_string()));
                        ToolOutput {
                            tool_call_id: call.id.clone(),
                            output: format!("Error: {err}"),
                        }
                    }
                })
                .collect()
        })
    }

    async fn with_retries<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, AssistantError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AssistantError>>,
    {
        let settings = self.shared.settings;
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < settings.max_transport_retries => {
                    attempt += 1;
                    warn!(what, attempt, error = %err, "Request failed; retrying");
                    sleep(settings.poll_interval).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Text of the assistant's reply for `run_id`. Messages are newest first;
/// nothing older than the newest user message belongs to this turn.
fn latest_reply(messages: &[ThreadMessage], run_id: &str) -> String {
    messages
        .iter()
        .take_while(|m| m.role != Role::User)
        .find(|m| m.role == Role::Assistant && m.run_id.as_deref().map_or(true, |id| id == run_id))
        .map(ThreadMessage::text)
        .unwrap_or_default()
}

/// Use the configured assistant, or create one with the map tools attached.
/// The flag is true when a new assistant was created.
pub async fn ensure_assistant(
    api: &dyn AssistantApi,
    configured: Option<String>,
    model: &str,
    tools: &[Value],
) -> Result<(String, bool), AssistantError> {
    if let Some(id) = configured {
        return Ok((id, false));
    }
    let assistant = api
        .create_assistant(model, ASSISTANT_NAME, ASSISTANT_INSTRUCTIONS, tools)
        .await?;
    info!(assistant_id = %assistant.id, model, "Created assistant");
    Ok((assistant.id, true))
}
