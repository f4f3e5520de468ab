//! Engine options.

use serde::{Deserialize, Serialize};

use crate::expr::ParameterKind;
use crate::{Error, Result};

/// Options controlling how query parameters are read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryOptions {
    /// Page size for the primary resource when the request has no `page[size]`.
    pub default_page_size: Option<u32>,
    /// Requests above this page size are rejected.
    pub max_page_size: Option<u32>,
    /// Requests above this page number are rejected.
    pub max_page_number: Option<u32>,
    /// Longest relationship chain accepted in `include`.
    pub max_include_depth: Option<usize>,
    /// Accept `filter[field]=value` and `filter[field][op]=value`.
    pub enable_legacy_filter_notation: bool,
    /// Ignore unknown query parameters instead of rejecting them.
    pub allow_unknown_query_parameters: bool,
    /// Parameter kinds that may not be used.
    pub disabled_parameters: Vec<ParameterKind>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            default_page_size: Some(10),
            max_page_size: Some(100),
            max_page_number: None,
            max_include_depth: None,
            enable_legacy_filter_notation: false,
            allow_unknown_query_parameters: false,
            disabled_parameters: Vec::new(),
        }
    }
}

impl QueryOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        let options: QueryOptions =
            serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid query options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    fn validate(&self) -> Result<()> {
        if self.max_page_size == Some(0) || self.default_page_size == Some(0) {
            return Err(Error::Config("page sizes must be at least 1".into()));
        }
        if let (Some(default), Some(max)) = (self.default_page_size, self.max_page_size) {
            if default > max {
                return Err(Error::Config(format!(
                    "default_page_size {default} exceeds max_page_size {max}"
                )));
            }
        }
        Ok(())
    }

    pub fn max_page_size(&self) -> Option<u32> {
        self.max_page_size
    }

    pub fn max_page_number(&self) -> Option<u32> {
        self.max_page_number
    }

    pub fn max_include_depth(&self) -> Option<usize> {
        self.max_include_depth
    }

    pub fn legacy_filter_syntax_enabled(&self) -> bool {
        self.enable_legacy_filter_notation
    }

    pub fn is_disabled(&self, kind: ParameterKind) -> bool {
        self.disabled_parameters.contains(&kind)
    }
}
