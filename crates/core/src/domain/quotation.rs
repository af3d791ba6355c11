use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::client::ClientId;
use crate::domain::product::ProductId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotationId(pub String);

impl fmt::Display for QuotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Approval status of a quotation. `Draft` is the only state a decision can
/// be taken from; `Accepted` and `Rejected` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotationStatus {
    Draft,
    Accepted,
    Rejected,
}

impl QuotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "draft" => Ok(Self::Draft),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(DomainError::validation(
                "status",
                format!("unknown status `{other}` (expected draft|accepted|rejected)"),
            )),
        }
    }

    /// Apply an approval decision. Only drafts can be decided; deciding a
    /// terminal quotation reports the current status back to the caller.
    pub fn decide(&self, action: DecisionAction) -> Result<Self, DomainError> {
        match self {
            Self::Draft => Ok(match action {
                DecisionAction::Approve => Self::Accepted,
                DecisionAction::Reject => Self::Rejected,
            }),
            current => Err(DomainError::InvalidTransition { current: *current }),
        }
    }
}

impl fmt::Display for QuotationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Approve,
    Reject,
}

impl DecisionAction {
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            other => Err(DomainError::validation(
                "action",
                format!("unknown action `{other}` (expected approve|reject)"),
            )),
        }
    }
}

/// Sales-pipeline outcome tag. Informational, freely reassignable in any
/// status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionStage {
    UnderDevelopment,
    Booked,
    Lost,
}

impl ConversionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnderDevelopment => "under-development",
            Self::Booked => "booked",
            Self::Lost => "lost",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "under-development" => Ok(Self::UnderDevelopment),
            "booked" => Ok(Self::Booked),
            "lost" => Ok(Self::Lost),
            other => Err(DomainError::validation(
                "converted",
                format!("unknown stage `{other}` (expected under-development|booked|lost)"),
            )),
        }
    }
}

impl fmt::Display for ConversionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One priced product entry within a quotation.
///
/// Two copy rules apply when a line is written:
/// - `title`/`model`/`specification`/`image` snapshot the product at
///   add-time and stay stable afterwards, so historical quotations survive
///   catalog edits.
/// - `notes`/`terms_and_conditions` are re-pulled from the live product on
///   every write that touches the line; caller-supplied values are ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: ProductId,
    pub title: String,
    pub model: Option<String>,
    pub specification: Option<String>,
    pub image: Option<String>,
    pub unit: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub notes: Option<String>,
    pub terms_and_conditions: Option<String>,
}

/// Optional single machine-installation charge block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineInstallation {
    pub quantity: u32,
    pub unit: String,
    pub unit_price: Decimal,
    pub total: Decimal,
}

/// Lightweight product reference rendered in the related/suggested
/// galleries. Well-formedness only; no catalog existence check.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryItem {
    pub image: Option<String>,
    pub model: Option<String>,
    pub specification: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quotation {
    pub id: QuotationId,
    pub reference_number: String,
    pub title: String,
    pub subject: String,
    pub formal_message: String,
    pub client_id: ClientId,
    pub line_items: Vec<LineItem>,
    pub related_products: Vec<GalleryItem>,
    pub suggested_products: Vec<GalleryItem>,
    pub machine_installation: Option<MachineInstallation>,
    pub notes: Option<String>,
    pub billing_details: String,
    pub supply: String,
    pub installation_and_commissioning: String,
    pub terms_and_conditions: String,
    pub signature_image: Option<String>,
    pub tax_enabled: bool,
    pub tax_rate_percent: Decimal,
    pub total_amount: Decimal,
    pub document_file: Option<String>,
    pub status: QuotationStatus,
    pub converted: ConversionStage,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller payload for one line item. Totals and the live-bound legal
/// fields are never accepted from the caller; display fields default to a
/// snapshot of the product when omitted.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LineItemInput {
    pub product_id: String,
    pub title: Option<String>,
    pub model: Option<String>,
    pub specification: Option<String>,
    pub image: Option<String>,
    pub unit: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineInstallationInput {
    pub quantity: u32,
    pub unit: String,
    pub unit_price: Decimal,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuotation {
    pub title: String,
    pub subject: String,
    pub formal_message: String,
    pub client_id: String,
    #[serde(default)]
    pub line_items: Vec<LineItemInput>,
    #[serde(default)]
    pub related_products: Vec<GalleryItem>,
    #[serde(default)]
    pub suggested_products: Vec<GalleryItem>,
    #[serde(default)]
    pub machine_installation: Option<MachineInstallationInput>,
    #[serde(default)]
    pub notes: Option<String>,
    pub billing_details: String,
    pub supply: String,
    pub installation_and_commissioning: String,
    pub terms_and_conditions: String,
    #[serde(default)]
    pub signature_image: Option<String>,
    #[serde(default)]
    pub tax_enabled: Option<bool>,
    #[serde(default)]
    pub tax_rate_percent: Option<Decimal>,
    /// Accepted on the wire for caller convenience, always recomputed.
    #[serde(default)]
    pub total_amount: Option<Decimal>,
}

/// Partial update: absent fields keep their prior values. `status`,
/// `converted`, `reference_number`, and `created_by` are not updatable
/// through this payload.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateQuotation {
    pub title: Option<String>,
    pub subject: Option<String>,
    pub formal_message: Option<String>,
    pub client_id: Option<String>,
    pub line_items: Option<Vec<LineItemInput>>,
    pub related_products: Option<Vec<GalleryItem>>,
    pub suggested_products: Option<Vec<GalleryItem>>,
    pub machine_installation: Option<MachineInstallationInput>,
    pub notes: Option<String>,
    pub billing_details: Option<String>,
    pub supply: Option<String>,
    pub installation_and_commissioning: Option<String>,
    pub terms_and_conditions: Option<String>,
    pub signature_image: Option<String>,
    pub tax_enabled: Option<bool>,
    pub tax_rate_percent: Option<Decimal>,
    pub total_amount: Option<Decimal>,
}
