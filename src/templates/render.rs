use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").unwrap());

/// A template body after substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rendered {
    pub text: String,
    /// Token names that were replaced, in order of first appearance.
    pub substituted: Vec<String>,
    /// Token names with no value; left in `text` verbatim.
    pub unmatched: Vec<String>,
}

impl Rendered {
    pub fn is_complete(&self) -> bool {
        self.unmatched.is_empty()
    }
}

/// Replace every `{{key}}` in `body` whose key is in `variables`.
pub fn render(body: &str, variables: &HashMap<&str, String>) -> Rendered {
    let mut substituted = Vec::new();
    let mut unmatched = Vec::new();

    let text = TOKEN_REGEX.replace_all(body, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        match variables.get(key) {
            Some(value) => {
                if !substituted.iter().any(|k| k == key) {
                    substituted.push(key.to_string());
                }
                value.clone()
            }
            None => {
                if !unmatched.iter().any(|k| k == key) {
                    unmatched.push(key.to_string());
                }
                caps[0].to_string()
            }
        }
    });

    Rendered {
        text: text.into_owned(),
        substituted,
        unmatched,
    }
}
