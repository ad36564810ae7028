//! Anthropic Messages API client.

use crate::model::{
    Completion, CompletionRequest, Message, ModelClient, ModelError, Part, Role, TokenUsage,
    ToolCall, ToolSpec,
};
use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OAUTH_BETA_HEADER: &str = "oauth-2025-04-20";

/// Authentication mode for the Anthropic API.
///
/// `ApiKey` is sent as `x-api-key`; `OauthToken` as a bearer token.
#[derive(Clone)]
pub enum AnthropicAuth {
    ApiKey(String),
    OauthToken(String),
}

impl std::fmt::Debug for AnthropicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AnthropicAuth({self})")
    }
}

impl std::fmt::Display for AnthropicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => write!(f, "api_key"),
            Self::OauthToken(_) => write!(f, "oauth_token"),
        }
    }
}

impl AnthropicAuth {
    fn apply_headers(&self, req: RequestBuilder) -> RequestBuilder {
        match self {
            Self::ApiKey(key) => req.header("x-api-key", key),
            Self::OauthToken(token) => req
                .header("Authorization", format!("Bearer {token}"))
                .header("anthropic-beta", OAUTH_BETA_HEADER),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Vec<ApiContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiResponseBlock>,
    usage: ApiUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u64,
    output_tokens: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`AnthropicClient`].
#[derive(Debug, Clone)]
pub struct AnthropicClientBuilder {
    auth: AnthropicAuth,
    model: String,
    max_tokens: u32,
    base_url: String,
}

impl AnthropicClientBuilder {
    pub fn new(auth: AnthropicAuth, model: impl Into<String>) -> Self {
        Self {
            auth,
            model: model.into(),
            max_tokens: 4096,
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Point the client at a different endpoint (proxies, gateways).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn build(self) -> AnthropicClient {
        AnthropicClient {
            http: reqwest::Client::new(),
            auth: self.auth,
            model: self.model,
            max_tokens: self.max_tokens,
            base_url: self.base_url,
        }
    }
}

/// Model client for the Anthropic Messages API.
pub struct AnthropicClient {
    http: reqwest::Client,
    auth: AnthropicAuth,
    model: String,
    max_tokens: u32,
    base_url: String,
}

impl AnthropicClient {
    pub fn builder(auth: AnthropicAuth, model: impl Into<String>) -> AnthropicClientBuilder {
        AnthropicClientBuilder::new(auth, model)
    }

    fn role_to_api(role: Role) -> &'static str {
        match role {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn part_to_api(part: &Part) -> ApiContentBlock {
        match part {
            Part::Text { text } => ApiContentBlock::Text { text: text.clone() },
            Part::ToolCall(call) => ApiContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            },
            Part::ToolResult(result) => ApiContentBlock::ToolResult {
                tool_use_id: result.tool_call_id.clone(),
                content: result.outcome.to_text(),
                is_error: result.outcome.is_error(),
            },
        }
    }

    /// Convert messages, merging consecutive same-role messages since the API
    /// requires strict user/assistant alternation.
    fn messages_to_api(messages: &[Message]) -> Vec<ApiMessage> {
        let mut api: Vec<ApiMessage> = Vec::with_capacity(messages.len());
        for msg in messages {
            let role = Self::role_to_api(msg.role);
            let blocks = msg.parts.iter().map(Self::part_to_api);
            if let Some(last) = api.last_mut().filter(|last| last.role == role) {
                last.content.extend(blocks);
            } else {
                api.push(ApiMessage {
                    role,
                    content: blocks.collect(),
                });
            }
        }
        api
    }

    fn tool_to_api(spec: &ToolSpec) -> ApiTool<'_> {
        ApiTool {
            name: &spec.name,
            description: &spec.description,
            input_schema: &spec.input_schema,
        }
    }

    fn response_to_message(blocks: Vec<ApiResponseBlock>) -> Message {
        let parts = blocks
            .into_iter()
            .filter_map(|block| match block {
                ApiResponseBlock::Text { text } => Some(Part::Text { text }),
                ApiResponseBlock::ToolUse { id, name, input } => {
                    Some(Part::ToolCall(ToolCall { id, name, input }))
                }
                ApiResponseBlock::Unknown => None,
            })
            .collect();

        Message::from_parts(Role::Assistant, parts)
    }
}

impl std::fmt::Display for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "anthropic({}, auth={})", self.model, self.auth)
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, ModelError> {
        let api_request = ApiRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: request.temperature,
            messages: Self::messages_to_api(request.messages),
            system: request.system,
            tools: request.tools.iter().map(Self::tool_to_api).collect(),
        };

        let req = self
            .http
            .post(&self.base_url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .header("accept", "application/json");

        let response = self
            .auth
            .apply_headers(req)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, body });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        debug!(
            model = %self.model,
            stop_reason = ?api_response.stop_reason,
            input_tokens = api_response.usage.input_tokens,
            output_tokens = api_response.usage.output_tokens,
            "completion received"
        );

        Ok(Completion {
            message: Self::response_to_message(api_response.content),
            usage: TokenUsage::new(
                api_response.usage.input_tokens,
                api_response.usage.output_tokens,
            ),
        })
    }
}
