use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::UnknownVariant;

/// Status of the narrative capture step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    #[default]
    Draft,
    InProgress,
    Completed,
}

impl CaptureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    /// Capture is closed once completed; no further phase or clarification edits.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl FromStr for CaptureStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            _ => Err(UnknownVariant::new("capture status", s)),
        }
    }
}

/// Overall incident status across capture and analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    #[default]
    CapturePending,
    ReadyForAnalysis,
    Completed,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CapturePending => "capture_pending",
            Self::ReadyForAnalysis => "ready_for_analysis",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for OverallStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capture_pending" => Ok(Self::CapturePending),
            "ready_for_analysis" => Ok(Self::ReadyForAnalysis),
            "completed" => Ok(Self::Completed),
            _ => Err(UnknownVariant::new("overall status", s)),
        }
    }
}

/// Status of the downstream analysis step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for AnalysisStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            _ => Err(UnknownVariant::new("analysis status", s)),
        }
    }
}

/// Lifecycle tag for append-only records (questions, template versions).
///
/// Records are never deleted; superseded ones move to `Retired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Active,
    Retired,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Retired => "retired",
        }
    }
}

impl FromStr for Lifecycle {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "retired" => Ok(Self::Retired),
            _ => Err(UnknownVariant::new("lifecycle", s)),
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),+) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })+
    };
}

display_as_str!(CaptureStatus, OverallStatus, AnalysisStatus, Lifecycle);
