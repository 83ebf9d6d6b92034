use super::{Assistant, AssistantApi, Role, Run, Thread, ThreadMessage, ToolOutput};
use crate::error::AssistantError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Upper bound for any single HTTP request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct CreateMessageRequest<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Serialize)]
struct CreateRunRequest<'a> {
    assistant_id: &'a str,
    tools: &'a [Value],
}

#[derive(Serialize)]
struct SubmitToolOutputsRequest<'a> {
    tool_outputs: &'a [ToolOutput],
}

#[derive(Serialize)]
struct CreateAssistantRequest<'a> {
    model: &'a str,
    name: &'a str,
    instructions: &'a str,
    tools: &'a [Value],
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

/// Client for the OpenAI assistants (v2) endpoints
#[derive(Clone)]
pub struct OpenAiAssistants {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiAssistants {
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, DEFAULT_API_BASE)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                warn!(error = %err, "Failed to build HTTP client with timeout; using defaults");
                Client::new()
            });
        Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("OpenAI-Beta", "assistants=v2")
            .header("Content-Type", "application/json")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, AssistantError> {
        let response = self.authorized(request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(AssistantError::from_status(status, &text));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| AssistantError::decode(format!("{e}: {body}")))
    }
}

#[async_trait]
impl AssistantApi for OpenAiAssistants {
    async fn create_thread(&self) -> Result<Thread, AssistantError> {
        self.send(self.client.post(self.url("threads")).json(&serde_json::json!({})))
            .await
    }

    async fn create_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ThreadMessage, AssistantError> {
        let request = CreateMessageRequest { role, content };
        self.send(
            self.client
                .post(self.url(&format!("threads/{thread_id}/messages")))
                .json(&request),
        )
        .await
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        tools: &[Value],
    ) -> Result<Run, AssistantError> {
        let request = CreateRunRequest { assistant_id, tools };
        self.send(
            self.client
                .post(self.url(&format!("threads/{thread_id}/runs")))
                .json(&request),
        )
        .await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        self.send(
            self.client
                .get(self.url(&format!("threads/{thread_id}/runs/{run_id}"))),
        )
        .await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, AssistantError> {
        let request = SubmitToolOutputsRequest {
            tool_outputs: outputs,
        };
        self.send(
            self.client
                .post(self.url(&format!(
                    "threads/{thread_id}/runs/{run_id}/submit_tool_outputs"
                )))
                .json(&request),
        )
        .await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError> {
        let list: MessageList = self
            .send(
                self.client
                    .get(self.url(&format!("threads/{thread_id}/messages")))
                    .query(&[("order", "desc"), ("limit", "20")]),
            )
            .await?;
        Ok(list.data)
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        self.send(
            self.client
                .post(self.url(&format!("threads/{thread_id}/runs/{run_id}/cancel"))),
        )
        .await
    }

    async fn create_assistant(
        &self,
        model: &str,
        name: &str,
        instructions: &str,
        tools: &[Value],
    ) -> Result<Assistant, AssistantError> {
        let request = CreateAssistantRequest {
            model,
            name,
            instructions,
            tools,
        };
        self.send(self.client.post(self.url("assistants")).json(&request))
            .await
    }
}
