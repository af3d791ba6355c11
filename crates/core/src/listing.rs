use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::quotation::{ConversionStage, QuotationStatus};
use crate::errors::DomainError;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Raw list-view query parameters as they arrive on the wire. All filters
/// are optional and combine with AND; normalization and clamping happen in
/// [`Pagination::from_params`] and the month-range helpers.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuotationListParams {
    pub search: Option<String>,
    pub client_id: Option<String>,
    /// Inclusive month bounds, `YYYY-MM`.
    pub from_month: Option<String>,
    pub to_month: Option<String>,
    pub status: Option<String>,
    pub converted: Option<String>,
    pub company_name: Option<String>,
    pub company_code: Option<String>,
    pub company_stage: Option<String>,
    /// Admin-only narrowing; silently ignored for non-admin principals,
    /// whose listing is always scoped to their own records.
    pub created_by: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl QuotationListParams {
    pub fn search_pattern(&self) -> Option<String> {
        let trimmed = self.search.as_deref().map(str::trim).unwrap_or_default();
        if trimmed.is_empty() {
            None
        } else {
            Some(format!("%{}%", trimmed.to_ascii_lowercase()))
        }
    }

    pub fn status_filter(&self) -> Result<Option<QuotationStatus>, DomainError> {
        self.status.as_deref().map(QuotationStatus::parse).transpose()
    }

    pub fn converted_filter(&self) -> Result<Option<ConversionStage>, DomainError> {
        self.converted.as_deref().map(ConversionStage::parse).transpose()
    }

    /// Resolve the inclusive `[fromMonth, toMonth]` pair into half-open
    /// UTC bounds over `created_at`. Either side may be open.
    pub fn created_window(
        &self,
    ) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), DomainError> {
        let from = self.from_month.as_deref().map(|raw| parse_month("fromMonth", raw)).transpose()?;
        let to = self.to_month.as_deref().map(|raw| parse_month("toMonth", raw)).transpose()?;

        let start = from.map(|(year, month)| month_start(year, month));
        let end = to.map(|(year, month)| next_month_start(year, month));

        if let (Some(start), Some(end)) = (start, end) {
            if start >= end {
                return Err(DomainError::validation(
                    "fromMonth",
                    "fromMonth must not be after toMonth",
                ));
            }
        }

        Ok((start, end))
    }

    pub fn has_company_filter(&self) -> bool {
        let present = |value: &Option<String>| {
            value.as_deref().map(str::trim).is_some_and(|v| !v.is_empty())
        };
        present(&self.company_name) || present(&self.company_code) || present(&self.company_stage)
    }
}

fn parse_month(field: &'static str, raw: &str) -> Result<(i32, u32), DomainError> {
    let parsed = NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d")
        .map_err(|_| DomainError::validation(field, format!("`{raw}` is not a YYYY-MM month")))?;
    Ok((chrono::Datelike::year(&parsed), chrono::Datelike::month(&parsed)))
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    match Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0) {
        chrono::LocalResult::Single(start) => start,
        _ => unreachable!("first of month is a unique UTC timestamp"),
    }
}

fn next_month_start(year: i32, month: u32) -> DateTime<Utc> {
    if month == 12 {
        month_start(year + 1, 1)
    } else {
        month_start(year, month + 1)
    }
}

/// Whitelisted sort columns for the list view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    Title,
    TotalAmount,
    ReferenceNumber,
    Status,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Title => "title",
            Self::TotalAmount => "total_amount",
            Self::ReferenceNumber => "reference_number",
            Self::Status => "status",
        }
    }

    fn from_param(value: &str) -> Option<Self> {
        match value {
            "createdAt" | "created_at" => Some(Self::CreatedAt),
            "updatedAt" | "updated_at" => Some(Self::UpdatedAt),
            "title" => Some(Self::Title),
            "totalAmount" | "total_amount" => Some(Self::TotalAmount),
            "referenceNumber" | "reference_number" => Some(Self::ReferenceNumber),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Normalized pagination/sort settings. Unknown sort fields and out-of-range
/// page sizes fall back to defaults rather than erroring, matching the
/// forgiving read-side contract of the list endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub sort_field: SortField,
    pub sort_direction: SortDirection,
}

impl Pagination {
    pub fn from_params(params: &QuotationListParams) -> Self {
        let page = params.page.filter(|page| *page >= 1).unwrap_or(DEFAULT_PAGE);
        let limit = params.limit.filter(|limit| *limit >= 1).unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let sort_field = params
            .sort_by
            .as_deref()
            .and_then(SortField::from_param)
            .unwrap_or(SortField::CreatedAt);
        let sort_direction = match params.sort_order.as_deref() {
            Some("asc") => SortDirection::Asc,
            _ => SortDirection::Desc,
        };

        Self { page, limit, sort_field, sort_direction }
    }

    pub fn offset(&self) -> u32 {
        (self.page - 1) * self.limit
    }

    pub fn page_info(&self, total: u64) -> PageInfo {
        PageInfo {
            page: self.page,
            limit: self.limit,
            total,
            pages: (total as f64 / self.limit as f64).ceil() as u64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{Pagination, QuotationListParams, SortDirection, SortField, DEFAULT_LIMIT};

    #[test]
    fn pagination_defaults_apply_when_unset() {
        let pagination = Pagination::from_params(&QuotationListParams::default());
        assert_eq!(pagination.page, 1);
        assert_eq!(pagination.limit, DEFAULT_LIMIT);
        assert_eq!(pagination.sort_field, SortField::CreatedAt);
        assert_eq!(pagination.sort_direction, SortDirection::Desc);
        assert_eq!(pagination.offset(), 0);
    }

    #[test]
    fn pagination_clamps_limit_and_rejects_zero_page() {
        let params = QuotationListParams {
            page: Some(0),
            limit: Some(10_000),
            sort_by: Some("totalAmount".to_string()),
            sort_order: Some("asc".to_string()),
            ..QuotationListParams::default()
        };
        let pagination = Pagination::from_params(&params);
        assert_eq!(pagination.page, 1);
        assert_eq!(pagination.limit, super::MAX_LIMIT);
        assert_eq!(pagination.sort_field, SortField::TotalAmount);
        assert_eq!(pagination.sort_direction, SortDirection::Asc);
    }

    #[test]
    fn unknown_sort_field_falls_back_to_created_at() {
        let params = QuotationListParams {
            sort_by: Some("id; DROP TABLE quotation".to_string()),
            ..QuotationListParams::default()
        };
        assert_eq!(Pagination::from_params(&params).sort_field, SortField::CreatedAt);
    }

    #[test]
    fn page_info_rounds_page_count_up() {
        let pagination = Pagination::from_params(&QuotationListParams {
            limit: Some(10),
            ..QuotationListParams::default()
        });
        let info = pagination.page_info(21);
        assert_eq!(info.pages, 3);
        assert_eq!(info.total, 21);
    }

    #[test]
    fn created_window_is_inclusive_at_month_granularity() {
        let params = QuotationListParams {
            from_month: Some("2025-02".to_string()),
            to_month: Some("2025-04".to_string()),
            ..QuotationListParams::default()
        };
        let (start, end) = params.created_window().expect("window");
        assert_eq!(start, Some(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap()));
        assert_eq!(end, Some(Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn open_ended_month_bounds_are_supported() {
        let params = QuotationListParams {
            to_month: Some("2025-12".to_string()),
            ..QuotationListParams::default()
        };
        let (start, end) = params.created_window().expect("window");
        assert_eq!(start, None);
        assert_eq!(end, Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn inverted_month_range_is_a_validation_error() {
        let params = QuotationListParams {
            from_month: Some("2025-06".to_string()),
            to_month: Some("2025-01".to_string()),
            ..QuotationListParams::default()
        };
        assert!(params.created_window().is_err());
    }

    #[test]
    fn malformed_month_is_a_validation_error() {
        let params = QuotationListParams {
            from_month: Some("last tuesday".to_string()),
            ..QuotationListParams::default()
        };
        assert!(params.created_window().is_err());
    }

    #[test]
    fn search_pattern_lowercases_and_wraps() {
        let params = QuotationListParams {
            search: Some("  HVAC Retrofit ".to_string()),
            ..QuotationListParams::default()
        };
        assert_eq!(params.search_pattern().as_deref(), Some("%hvac retrofit%"));
        assert_eq!(QuotationListParams::default().search_pattern(), None);
    }
}
