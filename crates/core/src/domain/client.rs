use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompanyStage {
    Foundation,
    Building,
    Running,
    Finished,
    Closed,
}

impl CompanyStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Foundation => "foundation",
            Self::Building => "building",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "foundation" => Ok(Self::Foundation),
            "building" => Ok(Self::Building),
            "running" => Ok(Self::Running),
            "finished" => Ok(Self::Finished),
            "closed" => Ok(Self::Closed),
            other => Err(DomainError::validation(
                "companyStage",
                format!(
                    "unknown company stage `{other}` (expected foundation|building|running|finished|closed)"
                ),
            )),
        }
    }
}

/// Recipient of a quotation. Owned by the catalog side of the system; the
/// quotation path only resolves ids and copies display data into rendered
/// documents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub position: Option<String>,
    pub address: Option<String>,
    pub place: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pin: Option<String>,
    pub company_name: String,
    pub company_code: String,
    pub company_stage: CompanyStage,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
