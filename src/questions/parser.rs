use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::errors::ParseError;

static NUMBERED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\d{1,2}[.)]\s+(\S.*?)\s*$").unwrap());

/// Extract question texts from an AI response.
///
/// Accepts `{"questions": [...]}` (possibly fenced or surrounded by prose),
/// where each entry is a string or an object with `question_text`, `question`
/// or `text`. Falls back to a `1. ...` numbered list when no JSON object is
/// present.
pub fn parse_questions(raw: &str) -> Result<Vec<String>, ParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(value) = extract_json_object(raw) {
        return questions_from_json(&value);
    }

    let numbered: Vec<String> = NUMBERED_LINE
        .captures_iter(raw)
        .map(|c| c[1].to_string())
        .collect();
    if numbered.is_empty() {
        return Err(ParseError::Contract(
            "expected a JSON object with a \"questions\" list".to_string(),
        ));
    }
    Ok(dedupe(numbered))
}

fn extract_json_object(raw: &str) -> Option<Value> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&raw[start..=end])
        .ok()
        .filter(Value::is_object)
}

fn questions_from_json(value: &Value) -> Result<Vec<String>, ParseError> {
    let list = value
        .get("questions")
        .ok_or_else(|| ParseError::Contract("missing \"questions\" field".to_string()))?
        .as_array()
        .ok_or_else(|| ParseError::Contract("\"questions\" is not a list".to_string()))?;

    let mut texts = Vec::with_capacity(list.len());
    for entry in list {
        let text = match entry {
            Value::String(s) => s.as_str(),
            Value::Object(obj) => ["question_text", "question", "text"]
                .iter()
                .find_map(|key| obj.get(*key).and_then(Value::as_str))
                .ok_or_else(|| {
                    ParseError::Contract("question object has no question_text".to_string())
                })?,
            other => {
                return Err(ParseError::Contract(format!(
                    "unsupported question entry: {}",
                    other
                )));
            }
        };
        let text = text.trim();
        if !text.is_empty() {
            texts.push(text.to_string());
        }
    }

    if texts.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(dedupe(texts))
}

fn dedupe(texts: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(texts.len());
    for text in texts {
        if !seen.contains(&text) {
            seen.push(text);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let parsed =
            parse_questions(r#"{"questions": ["What time did it start?", "Who saw it?"]}"#).unwrap();
        assert_eq!(parsed, vec!["What time did it start?", "Who saw it?"]);
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let raw = "Here are my questions:\n```json\n{\"questions\": [{\"question_text\": \"Was PPE worn?\"}, {\"question\": \"Was the floor wet?\"}, {\"text\": \"Any witnesses?\"}]}\n```\nHope this helps.";
        let parsed = parse_questions(raw).unwrap();
        assert_eq!(
            parsed,
            vec!["Was PPE worn?", "Was the floor wet?", "Any witnesses?"]
        );
    }

    #[test]
    fn test_empty_list_is_parse_error() {
        assert!(matches!(
            parse_questions(r#"{"questions": []}"#),
            Err(ParseError::Empty)
        ));
        assert!(matches!(
            parse_questions(r#"{"questions": ["  "]}"#),
            Err(ParseError::Empty)
        ));
        assert!(matches!(parse_questions("   "), Err(ParseError::Empty)));
    }

    #[test]
    fn test_missing_field_is_parse_error() {
        assert!(matches!(
            parse_questions(r#"{"items": ["a"]}"#),
            Err(ParseError::Contract(_))
        ));
        assert!(matches!(
            parse_questions(r#"{"questions": [42]}"#),
            Err(ParseError::Contract(_))
        ));
    }

    #[test]
    fn test_numbered_list_is_accepted() {
        let raw = "1. Where was the ladder placed?\n2) How high were you standing?\nSome trailing note";
        let parsed = parse_questions(raw).unwrap();
        assert_eq!(
            parsed,
            vec!["Where was the ladder placed?", "How high were you standing?"]
        );
    }

    #[test]
    fn test_prose_without_questions_is_parse_error() {
        assert!(matches!(
            parse_questions("I cannot help with that."),
            Err(ParseError::Contract(_))
        ));
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let parsed = parse_questions(r#"{"questions": ["Same?", "Same?", "Other?"]}"#).unwrap();
        assert_eq!(parsed, vec!["Same?", "Other?"]);
    }
}
