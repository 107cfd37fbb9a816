//! Anthropic messages request → upstream generate-content request.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use apogee_types::catalog::{claude_default_max_tokens, ModelFamily};

use crate::mappers::schema::clean_claude_schema;
use crate::mappers::{safety_settings, wrap_envelope};

const DEFAULT_THINKING_BUDGET: u64 = 16_384;

/// Incoming messages-API body.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub system: Option<Value>,
    pub messages: Vec<MessageParam>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub thinking: Option<ThinkingParam>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageParam {
    pub role: String,
    pub content: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThinkingParam {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub budget_tokens: Option<u64>,
}

/// Translate a messages request into the enveloped upstream body.
pub fn build_upstream_request(req: &MessagesRequest, project: &str) -> Value {
    let family = ModelFamily::from_model_name(&req.model);

    let mut inner = json!({
        "contents": build_contents(&req.messages),
        "generationConfig": build_generation_config(req),
        "safetySettings": safety_settings(),
    });

    if let Some(system) = build_system_instruction(req.system.as_ref()) {
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

/// System prompt: a plain string or a list of text blocks.
fn build_system_instruction(system: Option<&Value>) -> Option<Value> {
    let text = match system? {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }
    Some(json!({ "role": "user", "parts": [{ "text": text }] }))
}

fn build_contents(messages: &[MessageParam]) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|message| {
            let role = match message.role.as_str() {
                "user" => "user",
                "assistant" => "model",
                _ => return None,
            };
            let parts = match &message.content {
                Value::String(text) => vec![json!({ "text": text })],
                Value::Array(blocks) => {
                    blocks.iter().filter_map(|b| block_to_part(b, role)).collect()
                },
                _ => Vec::new(),
            };
            if parts.is_empty() {
                return None;
            }
            Some(json!({ "role": role, "parts": parts }))
        })
        .collect()
}

fn block_to_part(block: &Value, role: &str) -> Option<Value> {
    match block.get("type").and_then(|t| t.as_str())? {
        "text" => {
            let text = block.get("text").and_then(|t| t.as_str()).unwrap_or_default();
            Some(json!({ "text": text }))
        },
        "image" => {
            let source = block.get("source")?;
            if source.get("type").and_then(|t| t.as_str()) != Some("base64") {
                return None;
            }
            Some(json!({
                "inlineData": {
                    "mimeType": source.get("media_type").and_then(|m| m.as_str()).unwrap_or("image/png"),
                    "data": source.get("data").and_then(|d| d.as_str()).unwrap_or_default(),
                }
            }))
        },
        "tool_result" => Some(tool_result_part(block)),
        "tool_use" if role == "model" => {
            let mut call = Map::new();
            call.insert(
                "name".into(),
                json!(block.get("name").and_then(|n| n.as_str()).unwrap_or_default()),
            );
            call.insert("args".into(), block.get("input").cloned().unwrap_or_else(|| json!({})));
            if let Some(id) = block.get("id").and_then(|i| i.as_str()) {
                call.insert("id".into(), json!(id));
            }
            Some(json!({ "functionCall": Value::Object(call) }))
        },
        // Thinking blocks from history are not replayed upstream.
        _ => None,
    }
}

fn tool_result_part(block: &Value) -> Value {
    let raw = match block.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };
    let result: Value = serde_json::from_str(&raw).unwrap_or_else(|_| json!({ "output": raw }));

    json!({
        "functionResponse": {
            "name": "tool_result",
            "id": block.get("tool_use_id").and_then(|i| i.as_str()).unwrap_or_default(),
            "response": { "result": result },
        }
    })
}

fn build_generation_config(req: &MessagesRequest) -> Value {
    let mut config = json!({});

    if let Some(t) = req.temperature {
        config["temperature"] = json!(t);
    }
    if let Some(p) = req.top_p {
        config["topP"] = json!(p);
    }

    let max = req.max_tokens.unwrap_or_else(|| claude_default_max_tokens(&req.model));
    config["maxOutputTokens"] = json!(max);

    if let Some(seqs) = &req.stop_sequences {
        if !seqs.is_empty() {
            config["stopSequences"] = json!(seqs);
        }
    }

    if let Some(thinking) = &req.thinking {
        if thinking.type_ == "enabled" {
            config["thinkingConfig"] = json!({
                "thinkingBudget": thinking.budget_tokens.unwrap_or(DEFAULT_THINKING_BUDGET),
                "includeThoughts": true,
            });
        }
    }

    config
}

fn build_tool_declarations(tools: &[Value], family: ModelFamily) -> Vec<Value> {
    tools
        .iter()
        .filter_map(|tool| {
            let name = tool.get("name").and_then(|v| v.as_str())?;
            let description =
                tool.get("description").and_then(|v| v.as_str()).unwrap_or_default();
            let schema = tool.get("input_schema").cloned().unwrap_or_else(|| json!({}));

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
    let config = match choice.get("type").and_then(|t| t.as_str())? {
        "auto" => json!({ "mode": "AUTO" }),
        "none" => json!({ "mode": "NONE" }),
        "any" => json!({ "mode": "ANY" }),
        "tool" => {
            let name = choice.get("name").and_then(|n| n.as_str())?;
            json!({ "mode": "ANY", "allowedFunctionNames": [name] })
        },
        _ => return None,
    };
    Some(json!({ "functionCallingConfig": config }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: Value) -> MessagesRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn system_string_becomes_instruction() {
        let req = parse(json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 1024,
            "system": "be brief",
            "messages": [{"role": "user", "content": "hi"}]
        }));
        let body = build_upstream_request(&req, "proj");
        assert_eq!(body["request"]["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["model"], "claude-sonnet-4-5");
        assert_eq!(body["project"], "proj");
    }

    #[test]
    fn content_blocks_map_to_parts() {
        let req = parse(json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 1024,
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "look at this"},
                    {"type": "image", "source": {
                        "type": "base64", "media_type": "image/jpeg", "data": "QUJD"
                    }}
                ]},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "ok"},
                    {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": "x"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "{\"hits\": 3}"}
                ]}
            ]
        }));
        let body = build_upstream_request(&req, "proj");
        let contents = body["request"]["contents"].as_array().unwrap();

        assert_eq!(contents[0]["parts"][0]["text"], "look at this");
        assert_eq!(contents[0]["parts"][1]["inlineData"]["mimeType"], "image/jpeg");

        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][1]["functionCall"]["name"], "lookup");
        assert_eq!(contents[1]["parts"][1]["functionCall"]["args"]["q"], "x");
        assert_eq!(contents[1]["parts"][1]["functionCall"]["id"], "toolu_1");

        let response_part = &contents[2]["parts"][0]["functionResponse"];
        assert_eq!(response_part["name"], "tool_result");
        assert_eq!(response_part["id"], "toolu_1");
        assert_eq!(response_part["response"]["result"]["hits"], 3);
    }

    #[test]
    fn unparseable_tool_result_wraps_as_output() {
        let req = parse(json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 1024,
            "messages": [{"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "it worked"}
            ]}]
        }));
        let body = build_upstream_request(&req, "proj");
        let result = &body["request"]["contents"][0]["parts"][0]["functionResponse"]["response"]["result"];
        assert_eq!(result["output"], "it worked");
    }

    #[test]
    fn thinking_enabled_sets_budget() {
        let explicit = parse(json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 1024,
            "thinking": {"type": "enabled", "budget_tokens": 4096},
            "messages": [{"role": "user", "content": "hi"}]
        }));
        let body = build_upstream_request(&explicit, "proj");
        let thinking = &body["request"]["generationConfig"]["thinkingConfig"];
        assert_eq!(thinking["thinkingBudget"], 4096);
        assert_eq!(thinking["includeThoughts"], true);

        let defaulted = parse(json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 1024,
            "thinking": {"type": "enabled"},
            "messages": [{"role": "user", "content": "hi"}]
        }));
        let body = build_upstream_request(&defaulted, "proj");
        assert_eq!(
            body["request"]["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            16384
        );
    }

    #[test]
    fn disabled_thinking_is_omitted() {
        let req = parse(json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 1024,
            "thinking": {"type": "disabled"},
            "messages": [{"role": "user", "content": "hi"}]
        }));
        let body = build_upstream_request(&req, "proj");
        assert!(body["request"]["generationConfig"].get("thinkingConfig").is_none());
    }

    #[test]
    fn claude_tool_schemas_are_cleaned() {
        let req = parse(json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 1024,
            "tools": [{
                "name": "lookup",
                "description": "d",
                "input_schema": {
                    "$schema": "x",
                    "type": "object",
                    "title": "Lookup",
                    "properties": {"q": {"type": "string", "default": ""}}
                }
            }],
            "messages": [{"role": "user", "content": "hi"}]
        }));
        let body = build_upstream_request(&req, "proj");
        let parameters = &body["request"]["tools"][0]["functionDeclarations"][0]["parameters"];
        assert!(parameters.get("$schema").is_none());
        assert!(parameters.get("title").is_none());
        assert!(parameters["properties"]["q"].get("default").is_none());
    }

    #[test]
    fn tool_choice_variants() {
        let cases = [
            (json!({"type": "auto"}), json!({"mode": "AUTO"})),
            (json!({"type": "any"}), json!({"mode": "ANY"})),
            (
                json!({"type": "tool", "name": "lookup"}),
                json!({"mode": "ANY", "allowedFunctionNames": ["lookup"]}),
            ),
        ];
        for (choice, expected) in cases {
            let req = parse(json!({
                "model": "claude-sonnet-4-5",
                "max_tokens": 1024,
                "tool_choice": choice,
                "messages": [{"role": "user", "content": "hi"}]
            }));
            let body = build_upstream_request(&req, "proj");
            assert_eq!(body["request"]["toolConfig"]["functionCallingConfig"], expected);
        }
    }
}
