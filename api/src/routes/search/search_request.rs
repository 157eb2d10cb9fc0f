use std::collections::BTreeMap;

use search_engine::{RawSearchParams, SearchMode};
use serde::Deserialize;

use crate::error_handler::AppError;

/// Request payload for `POST /api/search`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchRequest {
    pub q: String,
    #[serde(default)]
    pub mode: WireMode,
    /// `source` and `year`; values may be strings or numbers.
    #[serde(default)]
    pub filters: BTreeMap<String, Option<Scalar>>,
    #[serde(default)]
    pub page: Option<Scalar>,
    #[serde(default)]
    pub size: Option<Scalar>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireMode {
    #[default]
    Literal,
    Regex,
}

impl From<WireMode> for SearchMode {
    fn from(mode: WireMode) -> Self {
        match mode {
            WireMode::Literal => SearchMode::Literal,
            WireMode::Regex => SearchMode::Regex,
        }
    }
}

/// A JSON string or number, as form-ish clients send both (`"year": 2020`
/// and `"year": "2020"`, `"page": "2"`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Int(n) => n.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Text(s) => s,
        }
    }

    fn as_u32(&self, field: &str) -> Result<u32, AppError> {
        let parsed = match self {
            Scalar::Int(n) => u32::try_from(*n).ok(),
            Scalar::Float(_) => None,
            Scalar::Text(s) => s.trim().parse::<u32>().ok(),
        };
        parsed.ok_or_else(|| AppError::BadRequest(format!("{field} must be a non-negative integer")))
    }
}

impl SearchRequest {
    /// Converts the wire shape into engine parameters. Range checks happen in
    /// [`search_engine::SearchQuery::parse`].
    pub fn into_params(self) -> Result<RawSearchParams, AppError> {
        let page = self.page.as_ref().map(|p| p.as_u32("page")).transpose()?;
        let size = self.size.as_ref().map(|s| s.as_u32("size")).transpose()?;
        let filters = self
            .filters
            .into_iter()
            .map(|(key, value)| (key, value.map(Scalar::into_text)))
            .collect();

        Ok(RawSearchParams {
            q: self.q,
            mode: self.mode.into(),
            filters,
            page,
            size,
            cursor: self.cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> SearchRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn year_accepts_number_or_string() {
        let params = parse(json!({"q": "x", "filters": {"year": 2020, "source": "arxiv"}}))
            .into_params()
            .unwrap();
        assert_eq!(params.filters["year"].as_deref(), Some("2020"));
        assert_eq!(params.filters["source"].as_deref(), Some("arxiv"));

        let params = parse(json!({"q": "x", "filters": {"year": "2021"}}))
            .into_params()
            .unwrap();
        assert_eq!(params.filters["year"].as_deref(), Some("2021"));
    }

    #[test]
    fn numeric_strings_are_accepted_for_pagination() {
        let params = parse(json!({"q": "x", "page": "3", "size": 10}))
            .into_params()
            .unwrap();
        assert_eq!(params.page, Some(3));
        assert_eq!(params.size, Some(10));
        assert_eq!(params.mode, SearchMode::Literal);
    }

    #[test]
    fn non_numeric_page_is_rejected() {
        let err = parse(json!({"q": "x", "page": "abc"})).into_params().unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.contains("page")));

        let err = parse(json!({"q": "x", "size": -1})).into_params().unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.contains("size")));
    }

    #[test]
    fn unknown_mode_fails_to_deserialize() {
        let res: Result<SearchRequest, _> = serde_json::from_value(json!({"q": "x", "mode": "fuzzy"}));
        assert!(res.is_err());
    }
}
