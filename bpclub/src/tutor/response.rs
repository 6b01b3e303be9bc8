//! Post-processing of model output.
//!
//! Two answer shapes come back from the model: free text with an optional embedded
//! `[GRAPH_DATA]` chart block, and a JSON whiteboard document. Both are normalized here before
//! they reach the client.

use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::LazyLock;
use utoipa::ToSchema;

static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("valid regex"));
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));
static BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[-•]\s").expect("valid regex"));
static STEP_HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^Step \d+:").expect("valid regex"));
static DIGIT_PRODUCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([0-9]) \* ([0-9])").expect("valid regex"));
static GRAPH_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[GRAPH_DATA\](.*?)\[/GRAPH_DATA\]").expect("valid regex"));
static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```json\n(.*?)\n```").expect("valid regex"));
static MATH_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(Math\.)?\b(sin|cos|tan|abs|pi)\b").expect("valid regex"));

/// Strip markdown decoration the client renders poorly and tidy the layout.
pub fn clean_response(text: &str) -> String {
    let text = BOLD.replace_all(text, "$1");
    let text = text.replace("###", "");
    let text = BLANK_LINES.replace_all(&text, "\n");
    let text = BULLET.replace_all(&text, "");
    let text = STEP_HEADING.replace_all(&text, "\n$0");
    let text = DIGIT_PRODUCT.replace_all(&text, "${1} × ${2}");
    text.trim().to_string()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// The first `[GRAPH_DATA]` block, if it parses as JSON and names a chart `type`.
pub fn extract_graph_data(text: &str) -> Option<Value> {
    let block = GRAPH_BLOCK.captures(text)?.get(1)?.as_str();
    match serde_json::from_str::<Value>(block) {
        Ok(data) if data.get("type").is_some_and(is_truthy) => Some(data),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("Discarding unparseable graph data: {}", e);
            None
        }
    }
}

/// Free-text answer as returned to the client.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TutorAnswer {
    pub text: String,
    #[schema(value_type = Option<Object>)]
    pub graph_data: Option<Value>,
}

/// Pull out the chart block, remove every chart block from the text, then clean the text.
pub fn process_explanation(raw: &str) -> TutorAnswer {
    let graph_data = extract_graph_data(raw);
    let without_graphs = GRAPH_BLOCK.replace_all(raw, "");
    TutorAnswer {
        text: clean_response(&without_graphs),
        graph_data,
    }
}

/// JSON inside a ```` ```json ```` fence, or the whole text as JSON.
pub fn extract_json(text: &str) -> Option<Value> {
    let candidate = JSON_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or(text, |m| m.as_str());
    serde_json::from_str(candidate).ok()
}

fn str_field<'a>(value: Option<&'a Value>, key: &str) -> Option<&'a str> {
    value?.get(key)?.as_str().filter(|s| !s.is_empty())
}

pub fn format_steps(data: Option<&Value>) -> String {
    str_field(data, "steps")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "No steps available".to_string())
}

/// Rewrite a plotted expression into JavaScript: `sin` → `Math.sin`, `pi` → `Math.PI`, `^` → `**`.
pub fn to_js_function(expression: &str) -> String {
    let named = MATH_NAME.replace_all(expression, |caps: &Captures| {
        if caps.get(1).is_some() {
            return caps[0].to_string();
        }
        match caps[2].to_ascii_lowercase().as_str() {
            "pi" => "Math.PI".to_string(),
            name => format!("Math.{name}"),
        }
    });
    named.replace('^', "**")
}

fn default_visual() -> Value {
    json!({ "type": "function", "data": { "function": "x", "domain": [-10, 10] } })
}

pub fn format_visual(data: Option<&Value>) -> Value {
    let Some(visual) = data.and_then(|d| d.get("visual")) else {
        return default_visual();
    };
    let has_type = visual.get("type").is_some_and(is_truthy);
    let has_data = visual.get("data").is_some_and(is_truthy);
    if !has_type || !has_data {
        return default_visual();
    }

    let mut visual = visual.clone();
    if let Some(function) = visual["data"].get("function").and_then(Value::as_str).map(to_js_function) {
        visual["data"]["function"] = Value::String(function);
    }
    visual
}

pub fn format_practice(data: Option<&Value>) -> String {
    let Some(problems) = data
        .and_then(|d| d.get("practice"))
        .and_then(|p| p.get("problems"))
        .and_then(Value::as_array)
    else {
        return String::new();
    };

    problems
        .iter()
        .filter_map(|problem| {
            let question = str_field(Some(problem), "question")?;
            let solution = str_field(Some(problem), "solution")?;
            let mut lines = vec![format!("Question: {question}")];
            if let Some(difficulty) = str_field(Some(problem), "difficulty") {
                lines.push(format!("Difficulty: {difficulty}"));
            }
            lines.push(format!("Solution: {solution}"));
            Some(lines.join("\n"))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn format_concepts(data: Option<&Value>) -> String {
    let Some(concepts) = data.and_then(|d| d.get("concepts")).filter(|c| is_truthy(c)) else {
        return String::new();
    };

    let mut parts = Vec::new();
    if let Some(title) = str_field(Some(concepts), "title") {
        parts.push(title.to_string());
    }
    if let Some(description) = str_field(Some(concepts), "description") {
        parts.push(description.to_string());
    }
    if let Some(topics) = concepts
        .get("relatedTopics")
        .and_then(Value::as_array)
        .filter(|t| !t.is_empty())
    {
        parts.push("Related Topics:".to_string());
        parts.extend(topics.iter().filter_map(|topic| {
            let name = str_field(Some(topic), "name")?;
            let description = str_field(Some(topic), "description")?;
            Some(format!("• {name}: {description}"))
        }));
    }

    parts.join("\n\n")
}

/// Whiteboard sections rendered by the client.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WhiteboardContent {
    pub steps: String,
    #[schema(value_type = Object)]
    pub visual: Value,
    pub practice: String,
    pub concepts: String,
}

/// Turn a raw whiteboard answer into display sections. Unparseable output yields defaults.
pub fn process_whiteboard(raw: &str, question: &str) -> WhiteboardContent {
    let parsed = extract_json(raw);
    if parsed.is_none() {
        tracing::warn!("Model answer was not valid whiteboard JSON");
    }
    let data = parsed.as_ref();

    WhiteboardContent {
        steps: format!("Your Question: {question}\n\n{}", format_steps(data)),
        visual: format_visual(data),
        practice: format_practice(data),
        concepts: format_concepts(data),
    }
}
