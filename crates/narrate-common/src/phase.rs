use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::UnknownVariant;

/// One of the four fixed stages of an incident narrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativePhase {
    BeforeEvent,
    DuringEvent,
    EndEvent,
    PostEvent,
}

impl NarrativePhase {
    /// All phases in narrative order.
    pub const ALL: [NarrativePhase; 4] = [
        NarrativePhase::BeforeEvent,
        NarrativePhase::DuringEvent,
        NarrativePhase::EndEvent,
        NarrativePhase::PostEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeEvent => "before_event",
            Self::DuringEvent => "during_event",
            Self::EndEvent => "end_event",
            Self::PostEvent => "post_event",
        }
    }

    /// Human-readable heading used in consolidated text and prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::BeforeEvent => "Before Event",
            Self::DuringEvent => "During Event",
            Self::EndEvent => "End Event",
            Self::PostEvent => "Post Event",
        }
    }
}

impl fmt::Display for NarrativePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NarrativePhase {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before_event" => Ok(Self::BeforeEvent),
            "during_event" => Ok(Self::DuringEvent),
            "end_event" => Ok(Self::EndEvent),
            "post_event" => Ok(Self::PostEvent),
            _ => Err(UnknownVariant::new("phase", s)),
        }
    }
}

/// Per-phase values, indexed by [`NarrativePhase`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTexts {
    #[serde(default)]
    pub before_event: String,
    #[serde(default)]
    pub during_event: String,
    #[serde(default)]
    pub end_event: String,
    #[serde(default)]
    pub post_event: String,
}

impl PhaseTexts {
    pub fn get(&self, phase: NarrativePhase) -> &str {
        match phase {
            NarrativePhase::BeforeEvent => &self.before_event,
            NarrativePhase::DuringEvent => &self.during_event,
            NarrativePhase::EndEvent => &self.end_event,
            NarrativePhase::PostEvent => &self.post_event,
        }
    }

    pub fn set(&mut self, phase: NarrativePhase, text: String) {
        match phase {
            NarrativePhase::BeforeEvent => self.before_event = text,
            NarrativePhase::DuringEvent => self.during_event = text,
            NarrativePhase::EndEvent => self.end_event = text,
            NarrativePhase::PostEvent => self.post_event = text,
        }
    }

    /// Iterate `(phase, text)` pairs in narrative order.
    pub fn iter(&self) -> impl Iterator<Item = (NarrativePhase, &str)> {
        NarrativePhase::ALL.into_iter().map(move |p| (p, self.get(p)))
    }
}

/// A partial update to a narrative's phase texts. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseEdits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub during_event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_event: Option<String>,
}

impl PhaseEdits {
    pub fn single(phase: NarrativePhase, text: impl Into<String>) -> Self {
        let mut edits = Self::default();
        edits.set(phase, text.into());
        edits
    }

    pub fn set(&mut self, phase: NarrativePhase, text: String) {
        match phase {
            NarrativePhase::BeforeEvent => self.before_event = Some(text),
            NarrativePhase::DuringEvent => self.during_event = Some(text),
            NarrativePhase::EndEvent => self.end_event = Some(text),
            NarrativePhase::PostEvent => self.post_event = Some(text),
        }
    }

    pub fn get(&self, phase: NarrativePhase) -> Option<&str> {
        match phase {
            NarrativePhase::BeforeEvent => self.before_event.as_deref(),
            NarrativePhase::DuringEvent => self.during_event.as_deref(),
            NarrativePhase::EndEvent => self.end_event.as_deref(),
            NarrativePhase::PostEvent => self.post_event.as_deref(),
        }
    }

    /// Supplied fields in narrative order.
    pub fn supplied(&self) -> Vec<(NarrativePhase, &str)> {
        NarrativePhase::ALL
            .into_iter()
            .filter_map(|p| self.get(p).map(|text| (p, text)))
            .collect()
    }

    /// True when at least one supplied field has non-whitespace content.
    pub fn has_content(&self) -> bool {
        self.supplied()
            .iter()
            .any(|(_, text)| !text.trim().is_empty())
    }
}
