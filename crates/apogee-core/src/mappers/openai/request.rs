//! OpenAI chat-completions request → upstream generate-content request.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use apogee_types::catalog::{claude_default_max_tokens, is_opus, ModelFamily};

use crate::mappers::schema::clean_claude_schema;
use crate::mappers::{safety_settings, wrap_envelope};

/// Thinking budgets for budget-based models, keyed by `reasoning_effort`.
fn effort_budget(effort: &str) -> i64 {
    match effort {
        "low" => 8_192,
        "medium" => 16_384,
        _ => 32_768,
    }
}

/// Incoming chat-completions body. Loosely-shaped fields (`content`,
/// `stop`, `tools`, `tool_choice`) stay as raw JSON: clients disagree on
/// their shapes far too much for strict typing.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Option<Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

/// Translate a chat-completions request into the enveloped upstream body.
pub fn build_upstream_request(req: &ChatCompletionRequest, project: &str) -> Value {
    let family = ModelFamily::from_model_name(&req.model);

    let mut inner = json!({
        "contents": build_contents(&req.messages),
        "generationConfig": build_generation_config(req, family),
        "safetySettings": safety_settings(),
    });

    if let Some(system) = build_system_instruction(&req.messages) {
        inner["systemInstruction"] = system;
    }

    if let Some(tools) = &req.tools {
        let declarations = build_tool_declarations(tools, family);
        if !declarations.is_empty() {
            inner["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
    }

    if let Some(tool_config) = build_tool_config(req.tool_choice.as_ref()) {
        inner["toolConfig"] = tool_config;
    }

    wrap_envelope(project, &req.model, inner)
}

/// The last `system` message becomes the system instruction.
fn build_system_instruction(messages: &[ChatMessage]) -> Option<Value> {
    let system = messages.iter().rev().find(|m| m.role == "system")?;
    let text = flatten_text(system.content.as_ref());
    Some(json!({ "role": "user", "parts": [{ "text": text }] }))
}

fn build_contents(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .filter(|m| m.role != "system")
        .filter_map(build_content)
        .collect()
}

fn build_content(message: &ChatMessage) -> Option<Value> {
    let (role, parts) = match message.role.as_str() {
        "user" => ("user", user_parts(message.content.as_ref())),
        "assistant" => ("model", assistant_parts(message)),
        "tool" => ("user", tool_parts(message)),
        _ => return None,
    };
    if parts.is_empty() {
        return None;
    }
    Some(json!({ "role": role, "parts": parts }))
}

fn user_parts(content: Option<&Value>) -> Vec<Value> {
    match content {
        Some(Value::String(text)) => vec![json!({ "text": text })],
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    let text = block.get("text").and_then(|t| t.as_str()).unwrap_or_default();
                    Some(json!({ "text": text }))
                },
                Some("image_url") => {
                    let url = block
                        .pointer("/image_url/url")
                        .and_then(|u| u.as_str())
                        .unwrap_or_default();
                    Some(json!({ "inlineData": inline_data_from_url(url) }))
                },
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Data URLs (`data:<mime>;base64,<payload>`) are unpacked; anything else
/// is passed through as the payload with a PNG default.
fn inline_data_from_url(url: &str) -> Value {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((mime, payload)) = rest.split_once(";base64,") {
            return json!({ "mimeType": mime, "data": payload });
        }
    }
    json!({ "mimeType": "image/png", "data": url })
}

fn assistant_parts(message: &ChatMessage) -> Vec<Value> {
    let mut parts = Vec::new();

    let text = flatten_text(message.content.as_ref());
    if !text.is_empty() {
        parts.push(json!({ "text": text }));
    }

    if let Some(tool_calls) = &message.tool_calls {
        for call in tool_calls {
            let name = call.pointer("/function/name").and_then(|v| v.as_str()).unwrap_or_default();
            let args_raw =
                call.pointer("/function/arguments").and_then(|v| v.as_str()).unwrap_or("{}");
            let args: Value = serde_json::from_str(args_raw).unwrap_or_else(|_| json!({}));
            parts.push(json!({ "functionCall": { "name": name, "args": args } }));
        }
    }

    parts
}

fn tool_parts(message: &ChatMessage) -> Vec<Value> {
    let raw = flatten_text(message.content.as_ref());
    let response: Value =
        serde_json::from_str(&raw).unwrap_or_else(|_| json!({ "output": raw }));
    let name = message.name.as_deref().unwrap_or("tool");

    let mut part = Map::new();
    part.insert("name".into(), json!(name));
    if let Some(id) = &message.tool_call_id {
        part.insert("id".into(), json!(id));
    }
    part.insert("response".into(), response);
    vec![json!({ "functionResponse": Value::Object(part) })]
}

/// Flatten string-or-parts content into plain text.
fn flatten_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| match b.get("type").and_then(|t| t.as_str()) {
                Some("text") => b.get("text").and_then(|t| t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn build_generation_config(req: &ChatCompletionRequest, family: ModelFamily) -> Value {
    let mut config = json!({});

    if let Some(t) = req.temperature {
        config["temperature"] = json!(t);
    }
    if let Some(p) = req.top_p {
        config["topP"] = json!(p);
    }

    let max_tokens = req.max_tokens.or_else(|| {
        family.is_claude().then(|| claude_default_max_tokens(&req.model))
    });
    if let Some(max) = max_tokens {
        config["maxOutputTokens"] = json!(max);
    }

    match &req.stop {
        Some(Value::String(s)) => config["stopSequences"] = json!([s]),
        Some(Value::Array(seqs)) => config["stopSequences"] = json!(seqs),
        _ => {},
    }

    if let Some(thinking) = build_thinking_config(req, family) {
        config["thinkingConfig"] = thinking;
    }

    config
}

/// Gemini 3 thinks in levels, Claude and Gemini 2.5 in token budgets;
/// Opus variants think whether the client asked or not.
fn build_thinking_config(req: &ChatCompletionRequest, family: ModelFamily) -> Option<Value> {
    let effort = req.reasoning_effort.as_deref();

    match family {
        ModelFamily::Gemini3 => {
            let level = if effort == Some("low") { "low" } else { "high" };
            Some(json!({ "thinkingLevel": level, "includeThoughts": true }))
        },
        ModelFamily::Claude | ModelFamily::Gemini25 => {
            if let Some(effort) = effort {
                Some(json!({
                    "thinkingBudget": effort_budget(effort),
                    "includeThoughts": true,
                }))
            } else if is_opus(&req.model) {
                // Thinking is forced on for Opus; −1 lets the upstream
                // pick the budget.
                Some(json!({ "thinkingBudget": -1, "includeThoughts": true }))
            } else {
                None
            }
        },
        ModelFamily::Other => None,
    }
}

fn build_tool_declarations(tools: &[Value], family: ModelFamily) -> Vec<Value> {
    tools
        .iter()
        .filter_map(|tool| {
            let function = tool.get("function").unwrap_or(tool);
            let name = function.get("name").and_then(|v| v.as_str())?;
            let description =
                function.get("description").and_then(|v| v.as_str()).unwrap_or_default();
            let schema = function.get("parameters").cloned().unwrap_or_else(|| json!({}));

            let mut declaration = json!({ "name": name, "description": description });
            if family.is_claude() {
                let mut cleaned = schema;
                clean_claude_schema(&mut cleaned);
                declaration["parameters"] = cleaned;
            } else {
                declaration["parametersJsonSchema"] = schema;
            }
            Some(declaration)
        })
        .collect()
}

fn build_tool_config(tool_choice: Option<&Value>) -> Option<Value> {
    let choice = tool_choice?;

    let config = match choice {
        Value::String(mode) => match mode.as_str() {
            "auto" => json!({ "mode": "AUTO" }),
            "none" => json!({ "mode": "NONE" }),
            "required" => json!({ "mode": "ANY" }),
            _ => return None,
        },
        Value::Object(_) => {
            let name = choice.pointer("/function/name").and_then(|v| v.as_str())?;
            json!({ "mode": "ANY", "allowedFunctionNames": [name] })
        },
        _ => return None,
    };

    Some(json!({ "functionCallingConfig": config }))
}
