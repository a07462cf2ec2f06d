//! Page slicing for every listing endpoint.
//!
//! Handlers fetch the full, already filtered and ordered record set and hand
//! it to a [`Paginator`] together with the raw `page` / `page_size` request
//! parameters. The result is the page plus the metadata clients use to walk
//! the listing.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Raw pagination parameters as they arrive in the query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub page_size: Option<String>,
}

/// Parsed pagination request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    /// `0` requests every record on a single page
    pub page_size: i64,
}

/// One page of a listing with its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult<T> {
    pub total_rows: usize,
    pub total_pages: i64,
    /// Echoes the requested page, even past the last one
    pub current_page: i64,
    pub content: Vec<T>,
    /// Effective page size used for slicing
    pub page_size: i64,
}

/// Slices record sets into pages using the configured page size limits
#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    default_page_size: i64,
    page_size_max: i64,
}

impl Paginator {
    pub fn new(default_page_size: i64, page_size_max: i64) -> Self {
        Self {
            default_page_size,
            page_size_max,
        }
    }

    pub fn page_size_max(&self) -> i64 {
        self.page_size_max
    }

    /// Parses query-string parameters, falling back to page 1 and the default page size
    pub fn request(&self, params: &PageParams) -> AppResult<PageRequest> {
        let page = parse_param("page", params.page.as_deref())?.unwrap_or(1);
        let page_size =
            parse_param("page_size", params.page_size.as_deref())?.unwrap_or(self.default_page_size);
        Ok(PageRequest { page, page_size })
    }

    /// Parses the parameters and returns the requested page of `records`
    pub fn paginate_params<T>(
        &self,
        records: Vec<T>,
        params: &PageParams,
    ) -> AppResult<PageResult<T>> {
        let request = self.request(params)?;
        self.paginate(records, request.page, request.page_size)
    }

    /// Returns page `page` (1-indexed) of `records`.
    ///
    /// A `page_size` of `0` puts every record on one page. Pages past the end
    /// come back empty with `current_page` still set to `page`.
    pub fn paginate<T>(
        &self,
        records: Vec<T>,
        page: i64,
        page_size: i64,
    ) -> AppResult<PageResult<T>> {
        if page_size < 0 {
            return Err(AppError::InvalidArgument(
                "page_size must not be negative".to_string(),
            ));
        }
        if page_size > self.page_size_max {
            return Err(AppError::InvalidArgument(format!(
                "page_size must not exceed {}",
                self.page_size_max
            )));
        }
        if page < 1 {
            return Err(AppError::InvalidArgument(
                "page must be at least 1".to_string(),
            ));
        }

        let total_rows = records.len();
        let effective_size = if page_size == 0 {
            total_rows as i64 + 1
        } else {
            page_size
        };
        let total_pages = ((total_rows as i64 + effective_size - 1) / effective_size).max(1);

        let content = if page > total_pages {
            Vec::new()
        } else {
            let offset = ((page - 1) * effective_size) as usize;
            records
                .into_iter()
                .skip(offset)
                .take(effective_size as usize)
                .collect()
        };

        Ok(PageResult {
            total_rows,
            total_pages,
            current_page: page,
            content,
            page_size: effective_size,
        })
    }
}

fn parse_param(name: &str, raw: Option<&str>) -> AppResult<Option<i64>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse::<i64>().map(Some).map_err(|_| {
            AppError::InvalidArgument(format!("{} must be an integer, got '{}'", name, value))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paginator() -> Paginator {
        Paginator::new(10, 100)
    }

    fn records(n: usize) -> Vec<usize> {
        (1..=n).collect()
    }

    #[test]
    fn test_page_size_zero_returns_everything() {
        let result = paginator().paginate(records(25), 1, 0).unwrap();
        assert_eq!(result.content.len(), 25);
        assert_eq!(result.total_pages, 1);
        assert_eq!(result.page_size, 26);
        assert_eq!(result.current_page, 1);
    }

    #[test]
    fn test_page_size_zero_on_empty_set() {
        let result = paginator().paginate(Vec::<usize>::new(), 1, 0).unwrap();
        assert!(result.content.is_empty());
        assert_eq!(result.total_rows, 0);
        assert_eq!(result.total_pages, 1);
        assert_eq!(result.page_size, 1);
    }

    #[test]
    fn test_twenty_five_records_in_pages_of_ten() {
        let first = paginator().paginate(records(25), 1, 10).unwrap();
        assert_eq!(first.content, (1..=10).collect::<Vec<_>>());
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.total_rows, 25);

        let last = paginator().paginate(records(25), 3, 10).unwrap();
        assert_eq!(last.content, (21..=25).collect::<Vec<_>>());
        assert_eq!(last.total_pages, 3);
    }

    #[test]
    fn test_page_past_the_end_is_empty_and_echoed() {
        let result = paginator().paginate(records(25), 7, 10).unwrap();
        assert!(result.content.is_empty());
        assert_eq!(result.current_page, 7);
        assert_eq!(result.total_pages, 3);
        assert_eq!(result.total_rows, 25);
    }

    #[test]
    fn test_empty_set_reports_one_page() {
        let result = paginator().paginate(Vec::<usize>::new(), 1, 10).unwrap();
        assert!(result.content.is_empty());
        assert_eq!(result.total_pages, 1);
        assert_eq!(result.current_page, 1);
    }

    #[test]
    fn test_negative_page_size_is_invalid() {
        let err = paginator().paginate(records(5), 1, -1).unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[test]
    fn test_page_size_above_max_is_invalid() {
        let err = paginator().paginate(records(5), 1, 101).unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        assert!(paginator().paginate(records(5), 1, 100).is_ok());
    }

    #[test]
    fn test_page_below_one_is_invalid() {
        let err = paginator().paginate(records(5), 0, 10).unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[test]
    fn test_request_defaults() {
        let request = paginator().request(&PageParams::default()).unwrap();
        assert_eq!(request, PageRequest { page: 1, page_size: 10 });
    }

    #[test]
    fn test_request_parses_strings() {
        let params = PageParams {
            page: Some(" 2 ".to_string()),
            page_size: Some("0".to_string()),
        };
        let request = paginator().request(&params).unwrap();
        assert_eq!(request, PageRequest { page: 2, page_size: 0 });
    }

    #[test]
    fn test_request_rejects_non_integers() {
        let params = PageParams {
            page: Some("two".to_string()),
            page_size: None,
        };
        let err = paginator().request(&params).unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = paginator().paginate(records(3), 1, 2).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["totalRows"], 3);
        assert_eq!(json["totalPages"], 2);
        assert_eq!(json["currentPage"], 1);
        assert_eq!(json["pageSize"], 2);
        assert_eq!(json["content"], serde_json::json!([1, 2]));
    }
}
