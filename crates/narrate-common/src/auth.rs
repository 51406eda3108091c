use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::UnknownVariant;

/// Permissions checked by the external authorization collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Create and edit the capture of an incident the actor owns.
    EditOwnCapture,
    /// Read incidents belonging to the actor's company.
    ViewCompanyIncidents,
    /// Use AI-assisted features such as narrative enhancement.
    AccessAiFeatures,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EditOwnCapture => "edit_own_capture",
            Self::ViewCompanyIncidents => "view_company_incidents",
            Self::AccessAiFeatures => "access_ai_features",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edit_own_capture" => Ok(Self::EditOwnCapture),
            "view_company_incidents" => Ok(Self::ViewCompanyIncidents),
            "access_ai_features" => Ok(Self::AccessAiFeatures),
            _ => Err(UnknownVariant::new("capability", s)),
        }
    }
}

/// The authenticated principal returned by a successful capability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub company_id: String,
}

/// What the capability check is being asked about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceContext {
    pub incident_id: Option<String>,
}

impl ResourceContext {
    pub fn incident(id: &str) -> Self {
        Self {
            incident_id: Some(id.to_string()),
        }
    }
}
