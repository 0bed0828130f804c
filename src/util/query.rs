use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[serde_inline_default]
#[derive(Debug, Deserialize, Validate, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct Pagination {
    /// Page number
    #[validate(range(min = 1))]
    #[param(minimum = 1)]
    #[serde_inline_default(1)]
    pub page: i64,
    /// Page size
    #[validate(range(min = 1, max = 100))]
    #[param(minimum = 1, maximum = 100)]
    #[serde_inline_default(20)]
    pub page_size: i64,
}

impl Pagination {
    #[must_use]
    pub const fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

/// One page of results plus the total number of matching rows.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

impl<T> Paged<T> {
    #[must_use]
    pub fn new(items: Vec<T>, total: i64, pagination: &Pagination) -> Self {
        Self {
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults() {
        let page: Pagination = serde_json::from_str("{}").unwrap();
        assert_eq!((page.page, page.page_size), (1, 20));
        assert_eq!(page.offset(), 0);

        let page: Pagination = serde_json::from_str(r#"{"page": 3, "pageSize": 10}"#).unwrap();
        assert_eq!(page.offset(), 20);
    }

    #[test]
    fn pagination_limits() {
        let page: Pagination = serde_json::from_str(r#"{"pageSize": 500}"#).unwrap();
        assert!(page.validate().is_err());
        let page: Pagination = serde_json::from_str(r#"{"page": 0}"#).unwrap();
        assert!(page.validate().is_err());
    }
}
