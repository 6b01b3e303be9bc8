//! Prompt templates sent to the generative model.

/// Free-form explanation prompt. The model may append a chart between `[GRAPH_DATA]` markers.
pub fn explanation_prompt(question: &str, subject: &str, teaching_style: &str) -> String {
    format!(
        r#"You are an AI {subject} tutor. A student has asked: "{question}"
Please explain the concept in a {teaching_style} manner.

If the answer involves mathematical equations, use LaTeX notation.
If the answer would benefit from a graph, include it in the following format:
[GRAPH_DATA]
{{
  "type": "line|bar|scatter",
  "labels": ["x1", "x2", ...],
  "datasets": [{{
    "label": "Dataset Label",
    "data": [y1, y2, ...],
    "borderColor": "rgb(75, 192, 192)",
    "backgroundColor": "rgba(75, 192, 192, 0.5)"
  }}],
  "options": {{
    "xAxisLabel": "X Axis",
    "yAxisLabel": "Y Axis"
  }}
}}
[/GRAPH_DATA]"#
    )
}

fn style_instruction(teaching_style: &str) -> &'static str {
    match teaching_style {
        "step-by-step" => "Break down the solution into clear, sequential steps. ",
        "quick-response" => "Provide a concise explanation with key points. ",
        "interactive" => "Use real-world examples and applications. ",
        _ => "",
    }
}

/// Prompt asking for the whiteboard JSON: steps, visual, practice and concepts.
pub fn whiteboard_prompt(question: &str, subject: &str, teaching_style: &str) -> String {
    let mut prompt = format!(r#"You are an expert {subject} tutor. A student has asked: "{question}""#);
    prompt.push_str("\n\n");
    prompt.push_str(style_instruction(teaching_style));
    prompt.push_str(
        r#"
Format your response as a JSON object with these EXACT sections:
{
  "steps": "A clear step-by-step solution, broken into numbered steps, using markdown.",
  "visual": {
    "type": "function",
    "data": {
      "function": "The mathematical function in JavaScript notation (e.g. 'Math.sin(x)')",
      "domain": [-10, 10],
      "keyPoints": {
        "intercepts": [[x1, y1], [x2, y2]],
        "maxima": [[x, y]],
        "minima": [[x, y]]
      }
    }
  },
  "practice": {
    "problems": [
      {
        "question": "A similar but different practice problem",
        "difficulty": "easy|medium|hard",
        "hint": "Optional hint for the student",
        "solution": "Step-by-step solution to the practice problem"
      }
    ]
  },
  "concepts": {
    "title": "Main concept or topic",
    "description": "Brief overview of the key concept",
    "relatedTopics": [
      { "name": "Related concept name", "description": "How it connects to the main topic" }
    ],
    "examples": [
      { "problem": "Example problem showing the concept", "solution": "Its solution" }
    ]
  }
}

Important:
1. Keep the EXACT same structure for each section
2. For math expressions, use LaTeX format inside $$ markers
3. For the visual section, ensure the function is in valid JavaScript notation
4. Break down steps into clear numbered points
5. Include at least one practice problem
6. Link the concepts to the main topic"#,
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explanation_prompt_mentions_inputs() {
        let prompt = explanation_prompt("What is a derivative?", "math", "visual");
        assert!(prompt.starts_with(r#"You are an AI math tutor. A student has asked: "What is a derivative?""#));
        assert!(prompt.contains("in a visual manner"));
        assert!(prompt.contains("[GRAPH_DATA]\n{\n  \"type\""));
        assert!(prompt.ends_with("[/GRAPH_DATA]"));
    }

    #[test]
    fn test_whiteboard_prompt_style() {
        let prompt = whiteboard_prompt("Solve x^2 = 4", "math", "quick-response");
        assert!(prompt.contains("Provide a concise explanation with key points."));
        assert!(prompt.contains("\"practice\""));

        let unknown = whiteboard_prompt("Solve x^2 = 4", "math", "socratic");
        assert!(!unknown.contains("Break down the solution"));
    }
}
