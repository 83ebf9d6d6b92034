//! Scripted assistants API for tests
//!
//! Runs are played back from a queue; once the queue is drained the last
//! snapshot repeats, so a run can be parked in `in_progress` indefinitely.

use crate::assistant::{
    Assistant, AssistantApi, MessageContent, RequiredAction, Role, Run, RunLastError, RunStatus,
    SubmitToolOutputs, TextValue, Thread, ThreadMessage, ToolCall, ToolOutput,
};
use crate::error::AssistantError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn run(status: RunStatus) -> Run {
    Run {
        id: "run_scripted".to_string(),
        status,
        required_action: None,
        last_error: None,
    }
}

pub fn run_requiring(calls: Vec<ToolCall>) -> Run {
    Run {
        required_action: Some(RequiredAction {
            submit_tool_outputs: Some(SubmitToolOutputs { tool_calls: calls }),
        }),
        ..run(RunStatus::RequiresAction)
    }
}

pub fn failed_run(code: &str, message: &str) -> Run {
    Run {
        last_error: Some(RunLastError {
            code: Some(code.to_string()),
            message: Some(message.to_string()),
        }),
        ..run(RunStatus::Failed)
    }
}

pub fn message(role: Role, text: &str) -> ThreadMessage {
    ThreadMessage {
        id: format!("msg_{}", text.len()),
        role,
        run_id: None,
        content: vec![MessageContent::Text {
            text: TextValue {
                value: text.to_string(),
            },
        }],
    }
}

pub struct MockAssistant {
    runs: Mutex<VecDeque<Result<Run, AssistantError>>>,
    last_run: Mutex<Option<Run>>,
    messages: Mutex<Vec<ThreadMessage>>,
    submit_errors: Mutex<VecDeque<AssistantError>>,
    create_message_error: Mutex<Option<AssistantError>>,
    run_counter: AtomicUsize,
    stall_retrieve: AtomicBool,
    /// Method names in call order
    pub calls: Mutex<Vec<String>>,
    /// Every batch passed to `submit_tool_outputs`
    pub submitted: Mutex<Vec<Vec<ToolOutput>>>,
    /// Content of every created message
    pub created_messages: Mutex<Vec<String>>,
}

impl MockAssistant {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(VecDeque::new()),
            last_run: Mutex::new(None),
            messages: Mutex::new(vec![message(Role::Assistant, "Done.")]),
            submit_errors: Mutex::new(VecDeque::new()),
            create_message_error: Mutex::new(None),
            run_counter: AtomicUsize::new(0),
            stall_retrieve: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            created_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn with_runs(self, runs: Vec<Run>) -> Self {
        self.runs.lock().unwrap().extend(runs.into_iter().map(Ok));
        self
    }

    pub fn queue_run(&self, run: Run) {
        self.runs.lock().unwrap().push_back(Ok(run));
    }

    pub fn queue_error(&self, error: AssistantError) {
        self.runs.lock().unwrap().push_back(Err(error));
    }

    pub fn queue_submit_error(&self, error: AssistantError) {
        self.submit_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_create_message(&self, error: AssistantError) {
        *self.create_message_error.lock().unwrap() = Some(error);
    }

    /// Make every `retrieve_run` hang, like a request that never gets a response
    pub fn stall_retrieve(&self) {
        self.stall_retrieve.store(true, Ordering::SeqCst);
    }

    /// Newest first, like the real list endpoint
    pub fn set_messages(&self, messages: Vec<ThreadMessage>) {
        *self.messages.lock().unwrap() = messages;
    }

    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }
}

impl Default for MockAssistant {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssistantApi for MockAssistant {
    async fn create_thread(&self) -> Result<Thread, AssistantError> {
        self.record("create_thread");
        Ok(Thread {
            id: "thread_mock".to_string(),
        })
    }

    async fn create_message(
        &self,
        _thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ThreadMessage, AssistantError> {
        self.record("create_message");
        if let Some(err) = self.create_message_error.lock().unwrap().take() {
            return Err(err);
        }
        self.created_messages.lock().unwrap().push(content.to_string());
        Ok(message(role, content))
    }

    async fn create_run(
        &self,
        _thread_id: &str,
        _assistant_id: &str,
        _tools: &[Value],
    ) -> Result<Run, AssistantError> {
        self.record("create_run");
        let n = self.run_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Run {
            id: format!("run_{n}"),
            ..run(RunStatus::Queued)
        })
    }

    async fn retrieve_run(&self, _thread_id: &str, _run_id: &str) -> Result<Run, AssistantError> {
        self.record("retrieve_run");
        if self.stall_retrieve.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let next = self.runs.lock().unwrap().pop_front();
        match next {
            Some(Ok(run)) => {
                *self.last_run.lock().unwrap() = Some(run.clone());
                Ok(run)
            }
            Some(Err(err)) => Err(err),
            None => self
                .last_run
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| AssistantError::not_found("no run scripted")),
        }
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        _run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, AssistantError> {
        self.record("submit_tool_outputs");
        if let Some(err) = self.submit_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.submitted.lock().unwrap().push(outputs.to_vec());
        Ok(run(RunStatus::Queued))
    }

    async fn list_messages(&self, _thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError> {
        self.record("list_messages");
        Ok(self.messages.lock().unwrap().clone())
    }

    async fn cancel_run(&self, _thread_id: &str, _run_id: &str) -> Result<Run, AssistantError> {
        self.record("cancel_run");
        Ok(run(RunStatus::Cancelling))
    }

    async fn create_assistant(
        &self,
        _model: &str,
        _name: &str,
        _instructions: &str,
        _tools: &[Value],
    ) -> Result<Assistant, AssistantError> {
        self.record("create_assistant");
        Ok(Assistant {
            id: "asst_created".to_string(),
        })
    }
}
