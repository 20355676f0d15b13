//! Supervisory agent router — single-shot query classification plus persona
//! responses, both over the Gemini `generateContent` API.
//!
//! The classifier sends one prompt-templated request with two declared tools
//! (`get_user_location`, `fetch_contextual_data`) that the model may invoke
//! zero or more times before returning a structured JSON decision. A malformed
//! or missing decision is `Ok(None)` — the caller substitutes the general
//! category with [`FALLBACK_FEEDBACK`]. There is no retry policy.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::SupervisorConfig;
use crate::models::SessionCategory;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Feedback string substituted when classification yields no usable result.
pub const FALLBACK_FEEDBACK: &str =
    "The agent could not analyze the query. Proceeding as general query.";

const SUPERVISOR_SYSTEM_PROMPT: &str = r#"You are a highly intelligent Supervisory AI agent for a smart farming application.
Analyze the user's query and return the following JSON object exactly in this structure:

{
  "agent_required": "<crop_advisor | resource_manager | plant_doctor | general_query>",
  "query_for_next_agent": "<refined query for the selected agent>",
  "supporting_info": {
     "agricultural_context": "<short context>",
     "market_context": "<short context>"
  }
}

Rules:
- Choose the most suitable agent.
- Always fill ALL fields.
- If 'crop_advisor' or 'resource_manager', call your tools to get context before answering.
- If 'plant_doctor', skip fetching context."#;

// ============================================================================
// Classification result types
// ============================================================================

/// Fixed set of response personas the classifier can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCategory {
    CropAdvisor,
    PlantDoctor,
    ResourceManager,
    GeneralQuery,
}

impl AgentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentCategory::CropAdvisor => "crop_advisor",
            AgentCategory::PlantDoctor => "plant_doctor",
            AgentCategory::ResourceManager => "resource_manager",
            AgentCategory::GeneralQuery => "general_query",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportingInfo {
    pub agricultural_context: String,
    pub market_context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub agent_required: AgentCategory,
    pub query_for_next_agent: String,
    #[serde(default)]
    pub supporting_info: Option<SupportingInfo>,
}

// ============================================================================
// Error type
// ============================================================================

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Model returned no candidates")]
    EmptyResponse,

    #[error("Tool-call rounds exhausted after {rounds} iterations")]
    ToolRoundsExhausted { rounds: u32 },
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDeclarations>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

fn text_part(text: impl Into<String>) -> Part {
    Part {
        text: Some(text.into()),
        function_call: None,
        function_response: None,
    }
}

fn user_content(text: impl Into<String>) -> Content {
    Content {
        role: Some("user".to_string()),
        parts: vec![text_part(text)],
    }
}

fn tool_declarations() -> Vec<ToolDeclarations> {
    vec![ToolDeclarations {
        function_declarations: vec![
            FunctionDeclaration {
                name: "get_user_location".to_string(),
                description: "Get the user's current GPS location.".to_string(),
                parameters: None,
            },
            FunctionDeclaration {
                name: "fetch_contextual_data".to_string(),
                description:
                    "Fetch agricultural and market data for a specific location.".to_string(),
                parameters: Some(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "location": { "type": "string" }
                    },
                    "required": ["location"]
                })),
            },
        ],
    }]
}

/// Execute a builtin tool. Both tools return fixed strings standing in for
/// location and government-API lookups.
fn run_tool(call: &FunctionCall) -> serde_json::Value {
    match call.name.as_str() {
        "get_user_location" => {
            tracing::debug!("Tool called: get_user_location");
            serde_json::json!({ "result": "Nashik, Maharashtra, India" })
        }
        "fetch_contextual_data" => {
            let location = call.args["location"].as_str().unwrap_or("unknown");
            tracing::debug!(location = location, "Tool called: fetch_contextual_data");
            serde_json::json!({
                "result": format!(
                    "Agricultural Context: Soil Type: Black Cotton Soil, Avg Temp: 28°C, \
                     Rainfall Forecast: Light showers.\n\
                     Market Context: Current Mandi Prices ({}): Grapes - ₹80/kg, Onions - ₹25/kg.",
                    location
                )
            })
        }
        other => {
            tracing::warn!(tool = other, "Model requested unknown tool");
            serde_json::json!({ "error": format!("unknown tool: {}", other) })
        }
    }
}

// ============================================================================
// SupervisorClient
// ============================================================================

#[derive(Clone)]
pub struct SupervisorClient {
    client: Client,
    api_key: String,
    model: String,
    max_tool_rounds: u32,
    base_url: String,
}

impl SupervisorClient {
    pub fn new(config: &SupervisorConfig) -> Result<Self, SupervisorError> {
        Self::with_base_url(config, GEMINI_BASE_URL.to_string())
    }

    /// Create a client against a custom endpoint (for testing).
    pub fn with_base_url(
        config: &SupervisorConfig,
        base_url: String,
    ) -> Result<Self, SupervisorError> {
        let api_key = match &config.api_key {
            Some(k) if !k.is_empty() => k.clone(),
            _ => return Err(SupervisorError::MissingApiKey),
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            max_tool_rounds: config.max_tool_rounds,
            base_url,
        })
    }

    /// Classify a free-text query into an agent decision. `Ok(None)` means the
    /// model produced nothing parseable; the caller decides the fallback.
    pub async fn classify(&self, query: &str) -> Result<Option<AnalysisResult>, SupervisorError> {
        let mut contents = vec![user_content(query)];

        for _ in 0..self.max_tool_rounds {
            let content = self
                .generate(SUPERVISOR_SYSTEM_PROMPT, &contents, true)
                .await?;

            let calls: Vec<FunctionCall> = content
                .parts
                .iter()
                .filter_map(|p| p.function_call.clone())
                .collect();

            if calls.is_empty() {
                let text: String = content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect();
                return Ok(parse_analysis(&text));
            }

            // Feed tool results back and let the model continue.
            contents.push(content.clone());
            let responses: Vec<Part> = calls
                .iter()
                .map(|call| Part {
                    text: None,
                    function_call: None,
                    function_response: Some(FunctionResponse {
                        name: call.name.clone(),
                        response: run_tool(call),
                    }),
                })
                .collect();
            contents.push(Content {
                role: Some("user".to_string()),
                parts: responses,
            });
        }

        Err(SupervisorError::ToolRoundsExhausted {
            rounds: self.max_tool_rounds,
        })
    }

    /// One persona response: a single call with a persona system prompt and no
    /// tools.
    pub async fn respond_as(
        &self,
        category: AgentCategory,
        query: &str,
    ) -> Result<String, SupervisorError> {
        let contents = vec![user_content(query)];
        let content = self
            .generate(persona_prompt(category), &contents, false)
            .await?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() {
            return Err(SupervisorError::EmptyResponse);
        }
        Ok(text)
    }

    async fn generate(
        &self,
        system_prompt: &str,
        contents: &[Content],
        with_tools: bool,
    ) -> Result<Content, SupervisorError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![text_part(system_prompt)],
            },
            contents: contents.to_vec(),
            tools: with_tools.then(tool_declarations),
            generation_config: GenerationConfig { temperature: 0.0 },
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<GeminiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);
            let (code, message) = error_detail
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));
            tracing::error!(code = code, message = %message, "Gemini API error");
            return Err(SupervisorError::Api { code, message });
        }

        let body: GenerateResponse = response.json().await?;
        body.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .ok_or(SupervisorError::EmptyResponse)
    }
}

/// Lenient extraction of the JSON decision from the model's final text. The
/// model sometimes wraps the object in code fences or prose, so the slice
/// between the first `{` and the last `}` is what gets parsed.
pub fn parse_analysis(text: &str) -> Option<AnalysisResult> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<AnalysisResult>(&text[start..=end]) {
        Ok(result) => Some(result),
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable classification response");
            None
        }
    }
}

fn persona_prompt(category: AgentCategory) -> &'static str {
    match category {
        AgentCategory::CropAdvisor => "You are a smart agricultural crop advisor.",
        AgentCategory::PlantDoctor => {
            "You are an experienced plant doctor. Diagnose plant health issues from the \
             described symptoms and suggest practical treatment."
        }
        AgentCategory::ResourceManager => {
            "You are an agricultural resource manager. Advise on water, fertilizer and \
             input planning for the described situation."
        }
        AgentCategory::GeneralQuery => {
            "You are a helpful assistant for a smart farming application."
        }
    }
}

// ============================================================================
// Chat responders
// ============================================================================

/// Produces the assistant reply for a chat interaction.
#[async_trait]
pub trait ChatResponder: Send + Sync {
    async fn respond(
        &self,
        category: SessionCategory,
        content: &str,
    ) -> Result<String, SupervisorError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Routed responder: classify the query, then forward the refined query to the
/// selected persona. Classification failure degrades to the general persona
/// with the raw query.
pub struct PersonaClient {
    supervisor: SupervisorClient,
}

impl PersonaClient {
    pub fn new(config: &SupervisorConfig) -> Result<Self, SupervisorError> {
        Ok(Self {
            supervisor: SupervisorClient::new(config)?,
        })
    }

    pub fn with_base_url(
        config: &SupervisorConfig,
        base_url: String,
    ) -> Result<Self, SupervisorError> {
        Ok(Self {
            supervisor: SupervisorClient::with_base_url(config, base_url)?,
        })
    }
}

#[async_trait]
impl ChatResponder for PersonaClient {
    async fn respond(
        &self,
        _category: SessionCategory,
        content: &str,
    ) -> Result<String, SupervisorError> {
        let (agent, query) = match self.supervisor.classify(content).await? {
            Some(analysis) => {
                tracing::info!(agent = analysis.agent_required.as_str(), "Query routed");
                (analysis.agent_required, analysis.query_for_next_agent)
            }
            None => {
                tracing::warn!("Classification produced no result, using general persona");
                (AgentCategory::GeneralQuery, content.to_string())
            }
        };
        self.supervisor.respond_as(agent, &query).await
    }

    fn name(&self) -> &str {
        "gemini-persona"
    }
}

/// Canned per-category replies used when no model API key is configured.
pub struct OfflineResponder;

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[async_trait]
impl ChatResponder for OfflineResponder {
    async fn respond(
        &self,
        category: SessionCategory,
        content: &str,
    ) -> Result<String, SupervisorError> {
        let reply = match category {
            SessionCategory::PlantDoctor => format!(
                "Based on your description '{}...', this could be a common plant issue. \
                 Let me analyze further and provide a detailed diagnosis.",
                truncate_chars(content, 50)
            ),
            SessionCategory::Knowledge => format!(
                "I found some relevant information about '{}...'. \
                 Here are the key insights from our knowledge base.",
                truncate_chars(content, 30)
            ),
            SessionCategory::General => format!(
                "Thank you for your message: '{}...'. How can I assist you further?",
                truncate_chars(content, 50)
            ),
        };
        Ok(reply)
    }

    fn name(&self) -> &str {
        "offline"
    }
}

/// Pick the responder from configuration: routed personas when an API key is
/// present, canned replies otherwise.
pub fn create_responder(config: &SupervisorConfig) -> Box<dyn ChatResponder> {
    match PersonaClient::new(config) {
        Ok(client) => Box::new(client),
        Err(SupervisorError::MissingApiKey) => {
            tracing::warn!("No supervisor API key configured, using offline responder");
            Box::new(OfflineResponder)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Persona client unavailable, using offline responder");
            Box::new(OfflineResponder)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> SupervisorConfig {
        SupervisorConfig {
            api_key: Some("test-api-key".to_string()),
            model: "gemini-1.5-flash".to_string(),
            max_tool_rounds: 4,
        }
    }

    fn text_response(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{ "text": text }]
                }
            }]
        })
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let config = SupervisorConfig {
            api_key: None,
            ..test_config()
        };
        match SupervisorClient::new(&config) {
            Err(SupervisorError::MissingApiKey) => {}
            other => panic!("Expected MissingApiKey, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn parse_analysis_handles_code_fences() {
        let text = "```json\n{\"agent_required\": \"crop_advisor\", \
                    \"query_for_next_agent\": \"best kharif crop for black soil\"}\n```";
        let result = parse_analysis(text).expect("should parse");
        assert_eq!(result.agent_required, AgentCategory::CropAdvisor);
        assert_eq!(result.query_for_next_agent, "best kharif crop for black soil");
        assert!(result.supporting_info.is_none());
    }

    #[test]
    fn parse_analysis_rejects_garbage() {
        assert!(parse_analysis("I could not decide, sorry.").is_none());
        assert!(parse_analysis("{\"agent_required\": \"weather_bot\"}").is_none());
        assert!(parse_analysis("").is_none());
    }

    #[tokio::test]
    async fn classify_parses_structured_decision() {
        let mock_server = MockServer::start().await;
        let client =
            SupervisorClient::with_base_url(&test_config(), mock_server.uri()).unwrap();

        let decision = r#"{
            "agent_required": "plant_doctor",
            "query_for_next_agent": "diagnose yellowing tomato leaves",
            "supporting_info": {
                "agricultural_context": "none",
                "market_context": "none"
            }
        }"#;

        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response(decision)))
            .mount(&mock_server)
            .await;

        let result = client
            .classify("my tomato leaves are yellowing")
            .await
            .expect("classify should succeed")
            .expect("decision should parse");

        assert_eq!(result.agent_required, AgentCategory::PlantDoctor);
        assert_eq!(result.query_for_next_agent, "diagnose yellowing tomato leaves");
        assert_eq!(
            result.supporting_info.unwrap().agricultural_context,
            "none"
        );
    }

    #[tokio::test]
    async fn classify_runs_tool_round_before_final_answer() {
        let mock_server = MockServer::start().await;
        let client =
            SupervisorClient::with_base_url(&test_config(), mock_server.uri()).unwrap();

        // First call: the model asks for the user's location.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [{ "functionCall": { "name": "get_user_location", "args": {} } }]
                    }
                }]
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        // Second call: the final structured decision.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response(
                r#"{"agent_required": "crop_advisor", "query_for_next_agent": "crops for Nashik"}"#,
            )))
            .mount(&mock_server)
            .await;

        let result = client
            .classify("what should I plant this season?")
            .await
            .expect("classify should succeed")
            .expect("decision should parse");

        assert_eq!(result.agent_required, AgentCategory::CropAdvisor);
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn classify_treats_unparseable_text_as_no_result() {
        let mock_server = MockServer::start().await;
        let client =
            SupervisorClient::with_base_url(&test_config(), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(text_response("I am not sure what you mean.")),
            )
            .mount(&mock_server)
            .await;

        let result = client.classify("???").await.expect("no transport error");
        assert!(result.is_none(), "Unparseable text must map to None");
    }

    #[tokio::test]
    async fn classify_propagates_api_error_without_retry() {
        let mock_server = MockServer::start().await;
        let client =
            SupervisorClient::with_base_url(&test_config(), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "code": 500, "message": "internal" }
            })))
            .mount(&mock_server)
            .await;

        let result = client.classify("hello").await;
        match result {
            Err(SupervisorError::Api { code, .. }) => assert_eq!(code, 500),
            other => panic!("Expected Api error, got {:?}", other.map(|_| ())),
        }
        // One attempt only — no retry policy.
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn persona_client_routes_then_responds() {
        let mock_server = MockServer::start().await;
        let persona =
            PersonaClient::with_base_url(&test_config(), mock_server.uri()).unwrap();

        // Classification response, then the persona's answer.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response(
                r#"{"agent_required": "resource_manager", "query_for_next_agent": "irrigation plan"}"#,
            )))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response(
                "Use drip irrigation twice a week during flowering.",
            )))
            .mount(&mock_server)
            .await;

        let reply = persona
            .respond(SessionCategory::General, "how should I water my grapes?")
            .await
            .expect("respond should succeed");
        assert_eq!(reply, "Use drip irrigation twice a week during flowering.");
    }

    #[tokio::test]
    async fn offline_responder_is_category_specific() {
        let responder = OfflineResponder;

        let reply = responder
            .respond(SessionCategory::PlantDoctor, "leaves are yellow")
            .await
            .unwrap();
        assert!(reply.starts_with("Based on your description 'leaves are yellow"));

        let reply = responder
            .respond(SessionCategory::Knowledge, "soil health")
            .await
            .unwrap();
        assert!(reply.contains("knowledge base"));

        let reply = responder
            .respond(SessionCategory::General, "hello")
            .await
            .unwrap();
        assert!(reply.starts_with("Thank you for your message"));
        assert_eq!(responder.name(), "offline");
    }

    #[test]
    fn create_responder_falls_back_without_key() {
        let config = SupervisorConfig {
            api_key: None,
            ..test_config()
        };
        let responder = create_responder(&config);
        assert_eq!(responder.name(), "offline");

        let responder = create_responder(&test_config());
        assert_eq!(responder.name(), "gemini-persona");
    }
}
