//! Google Gemini `generateContent` backend.

use std::time::Duration;

use crate::model::{
    Backend, Message, ModelError, ModelRequest, ModelResponse, Part, Role, ToolCall, ToolSpec,
    Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiSystemInstruction>,
}

#[derive(Debug, Serialize)]
struct ApiContent {
    role: &'static str,
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize)]
struct ApiSystemInstruction {
    parts: Vec<ApiPart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<ApiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<ApiFunctionResponse>,
    /// Set on reasoning summaries; never sent back.
    #[serde(default, skip_serializing)]
    thought: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiTool {
    function_declarations: Vec<ApiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct ApiFunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    usage_metadata: ApiUsage,
    #[serde(default)]
    prompt_feedback: Option<ApiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiCandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCandidateContent {
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating a Gemini backend.
#[derive(Clone)]
pub struct GeminiBackendBuilder {
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
    system: Option<String>,
}

impl GeminiBackendBuilder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            system: None,
        }
    }

    /// Override the API host (e.g. a proxy or a local mock).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn build(self) -> GeminiBackend {
        GeminiBackend {
            client: reqwest::Client::new(),
            api_key: self.api_key,
            model: self.model,
            base_url: self.base_url,
            timeout: self.timeout,
            system: self.system,
        }
    }
}

/// Gemini API backend.
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
    system: Option<String>,
}

impl GeminiBackend {
    pub fn builder(api_key: impl Into<String>, model: impl Into<String>) -> GeminiBackendBuilder {
        GeminiBackendBuilder::new(api_key, model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn role_to_api(role: Role) -> &'static str {
        match role {
            Role::User | Role::Tool => "user",
            Role::Model => "model",
        }
    }

    fn part_to_api(part: &Part) -> ApiPart {
        match part {
            Part::Text(text) => ApiPart {
                text: Some(text.clone()),
                ..ApiPart::default()
            },
            Part::ToolCall(call) => ApiPart {
                function_call: Some(ApiFunctionCall {
                    name: call.name.clone(),
                    args: call.arguments.clone(),
                }),
                ..ApiPart::default()
            },
            Part::ToolResult(result) => ApiPart {
                function_response: Some(ApiFunctionResponse {
                    name: result.name.clone(),
                    response: json!({ "content": result.outcome.content() }),
                }),
                ..ApiPart::default()
            },
        }
    }

    /// Messages without parts (an empty model reply) are left out; the API
    /// rejects contents with no parts.
    fn messages_to_api(messages: &[Message]) -> Vec<ApiContent> {
        messages
            .iter()
            .filter(|m| !m.parts.is_empty())
            .map(|m| ApiContent {
                role: Self::role_to_api(m.role),
                parts: m.parts.iter().map(Self::part_to_api).collect(),
            })
            .collect()
    }

    fn tools_to_api(specs: &[ToolSpec]) -> Vec<ApiTool> {
        if specs.is_empty() {
            return Vec::new();
        }
        let function_declarations = specs
            .iter()
            .map(|spec| ApiFunctionDeclaration {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: has_properties(&spec.parameters).then(|| spec.parameters.clone()),
            })
            .collect();
        vec![ApiTool {
            function_declarations,
        }]
    }

    fn response_to_message(parts: Vec<ApiPart>) -> Message {
        let parts = parts
            .into_iter()
            .filter(|part| !part.thought)
            .filter_map(|part| {
                if let Some(call) = part.function_call {
                    Some(Part::ToolCall(ToolCall {
                        name: call.name,
                        arguments: call.args,
                    }))
                } else {
                    part.text.map(Part::Text)
                }
            })
            .collect();
        Message::model(parts)
    }

    fn build_request(&self, request: &ModelRequest<'_>) -> ApiRequest {
        ApiRequest {
            contents: Self::messages_to_api(request.messages),
            tools: Self::tools_to_api(request.tools),
            system_instruction: self.system.as_ref().map(|s| ApiSystemInstruction {
                parts: vec![ApiPart {
                    text: Some(s.clone()),
                    ..ApiPart::default()
                }],
            }),
        }
    }
}

/// Gemini rejects object schemas with an empty `properties` map.
fn has_properties(schema: &Value) -> bool {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|props| !props.is_empty())
}

impl std::fmt::Display for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gemini({})", self.model)
    }
}

impl Backend for GeminiBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let api_request = self.build_request(&request);

        tracing::debug!(
            model = %self.model,
            contents = api_request.contents.len(),
            tools = request.tools.len(),
            "sending generateContent request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .timeout(self.timeout)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("{status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let usage = Usage {
            input_tokens: api_response.usage_metadata.prompt_token_count,
            output_tokens: api_response.usage_metadata.candidates_token_count,
        };

        let Some(candidate) = api_response.candidates.into_iter().next() else {
            let reason = api_response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates returned".to_string());
            return Err(ModelError::Blocked(reason));
        };

        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        if parts.is_empty() {
            tracing::warn!(
                finish_reason = candidate.finish_reason.as_deref().unwrap_or("unknown"),
                "model returned an empty candidate"
            );
        }

        Ok(ModelResponse {
            message: Self::response_to_message(parts),
            usage,
        })
    }
}
