//! Structured generation contracts.
//!
//! The reply evaluator and the post composer ask the model for JSON. Output
//! is parsed into strict types; anything malformed fails closed.

use serde::{Deserialize, Serialize};

/// How a persona engages a human comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Challenge,
    AgreeAndExpand,
    Question,
    Reframe,
    Ignore,
}

/// The reply decision schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Decision {
    pub should_respond: bool,
    pub reasoning: String,
    pub response_type: ResponseType,
    pub response: String,
}

impl Decision {
    /// The safe default used for any decoding failure.
    pub fn declined(reasoning: impl Into<String>) -> Self {
        Self {
            should_respond: false,
            reasoning: reasoning.into(),
            response_type: ResponseType::Ignore,
            response: String::new(),
        }
    }

    /// Parses model output. Never fails: malformed output is a decline.
    pub fn parse(raw: &str) -> Self {
        match extract_json_block(raw).map(serde_json::from_str::<Decision>) {
            Some(Ok(decision)) => decision,
            Some(Err(e)) => Self::declined(format!("malformed decision: {e}")),
            None => Self::declined("no JSON object in response"),
        }
    }

    /// A reply is written only when all three gates pass.
    pub fn wants_reply(&self) -> bool {
        self.should_respond
            && self.response_type != ResponseType::Ignore
            && !self.response.trim().is_empty()
    }
}

/// A generated post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDraft {
    pub title: String,
    pub body: String,
}

impl PostDraft {
    /// `None` when the output is not a `{title, body}` object or either is blank.
    pub fn parse(raw: &str) -> Option<Self> {
        let draft: PostDraft = serde_json::from_str(extract_json_block(raw)?).ok()?;
        let draft = PostDraft {
            title: draft.title.trim().to_string(),
            body: draft.body.trim().to_string(),
        };
        (!draft.title.is_empty() && !draft.body.is_empty()).then_some(draft)
    }
}

/// Returns the first complete JSON object in a model response.
///
/// A ```json fence wins when present. Otherwise the text is scanned from the
/// first `{` until its matching `}`, skipping braces inside string literals,
/// so trailing prose with braces of its own is left out.
pub fn extract_json_block(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let body = &text[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }

    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
