/// Pagination engine
///
/// Counts the rows matched by a [`SelectQuery`] before slicing it, so callers
/// can tell "no rows at all" apart from "no rows on this page".
///
/// # Slicing rules
///
/// - `page > 0` and `limit > 0`: `LIMIT limit OFFSET (page - 1) * limit`
/// - otherwise `limit > 0` adds `LIMIT limit` and `offset > 0` adds `OFFSET offset`
/// - neither: the full set
///
/// A page past the end yields an empty slice with the unchanged total. An
/// offset that does not fit in an `i64` is a validation error.
///
/// # Example
///
/// ```
/// use civictask_shared::db::pagination::Pagination;
///
/// let pagination = Pagination::new(3, 20);
/// assert_eq!(pagination.slice().unwrap(), (Some(20), Some(40)));
/// ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use tracing::debug;

use crate::db::query::SelectQuery;
use crate::error::{CoreError, CoreResult};

/// Default page size when a request does not name one
pub const DEFAULT_PER_PAGE: i64 = 25;

/// Column used when sorting is requested without a column
pub const DEFAULT_SORT_COLUMN: &str = "created_at";

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for SortDirection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(CoreError::Validation(format!(
                "invalid sort direction '{}'",
                other
            ))),
        }
    }
}

/// Page/limit/offset plus optional sort
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    /// 1-based page number; values < 1 disable page-based slicing
    pub page: i64,

    /// Items per page; values < 1 mean unconstrained
    pub limit: i64,

    /// Explicit offset, used only when page-based slicing is off
    pub offset: i64,

    pub sort_column: Option<String>,
    pub sort_direction: Option<SortDirection>,
}

/// Raw pagination parameters as they arrive in a query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub per_page: Option<String>,
    #[serde(rename = "sort-column")]
    pub sort_column: Option<String>,
    #[serde(rename = "sort-direction")]
    pub sort_direction: Option<String>,
}

impl Pagination {
    pub fn new(page: i64, limit: i64) -> Self {
        Self {
            page,
            limit,
            ..Default::default()
        }
    }

    /// No slicing at all
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn sorted_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_column = Some(column.into());
        self.sort_direction = Some(direction);
        self
    }

    /// Builds pagination from request parameters
    ///
    /// `page` falls back to 1 and `per_page` to 25 when missing, unparseable,
    /// or below 1.
    pub fn from_query(query: &PageQuery) -> CoreResult<Self> {
        let page = parse_positive(query.page.as_deref()).unwrap_or(1);
        let limit = parse_positive(query.per_page.as_deref()).unwrap_or(DEFAULT_PER_PAGE);

        let sort_column = query
            .sort_column
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let sort_direction = match query.sort_direction.as_deref().map(str::trim) {
            Some(direction) if !direction.is_empty() => Some(direction.parse()?),
            _ => None,
        };

        Ok(Self {
            page,
            limit,
            offset: page_offset(page, limit)?,
            sort_column,
            sort_direction,
        })
    }

    /// The `(LIMIT, OFFSET)` this pagination produces
    pub fn slice(&self) -> CoreResult<(Option<i64>, Option<i64>)> {
        if self.page > 0 && self.limit > 0 {
            return Ok((Some(self.limit), Some(page_offset(self.page, self.limit)?)));
        }

        let limit = (self.limit > 0).then_some(self.limit);
        let offset = (self.offset > 0).then_some(self.offset);
        Ok((limit, offset))
    }

    /// Restricts the query to the requested slice
    pub fn apply_slice(&self, query: &mut SelectQuery) -> CoreResult<()> {
        let (limit, offset) = self.slice()?;
        if let Some(limit) = limit {
            query.limit(limit);
        }
        if let Some(offset) = offset {
            query.offset(offset);
        }
        Ok(())
    }

    /// Orders by the requested column, defaulting to `created_at DESC`
    pub fn apply_sort(&self, query: &mut SelectQuery) {
        let column = self.sort_column.as_deref().unwrap_or(DEFAULT_SORT_COLUMN);
        let direction = self.sort_direction.unwrap_or_default();
        query.order_by(column, direction.as_sql());
    }

    /// Counts the filtered rows, then slices the query
    pub async fn apply(&self, conn: &mut PgConnection, query: &mut SelectQuery) -> CoreResult<i64> {
        // Reject an out-of-range page before touching the database
        self.slice()?;

        let count = query.count(conn).await?;
        self.apply_slice(query)?;

        debug!(
            table = query.table(),
            count,
            page = self.page,
            limit = self.limit,
            "Applied pagination"
        );

        Ok(count)
    }

    /// Like [`Pagination::apply`], then applies the sort
    pub async fn apply_with_sorting(
        &self,
        conn: &mut PgConnection,
        query: &mut SelectQuery,
    ) -> CoreResult<i64> {
        let count = self.apply(conn, query).await?;
        self.apply_sort(query);
        Ok(count)
    }

    /// Number of pages needed for `total` rows
    pub fn total_pages(&self, total: i64) -> i64 {
        if self.limit <= 0 {
            1
        } else if total <= 0 {
            0
        } else {
            (total - 1) / self.limit + 1
        }
    }
}

fn page_offset(page: i64, limit: i64) -> CoreResult<i64> {
    (page - 1).checked_mul(limit).ok_or_else(|| {
        CoreError::Validation(format!(
            "page {} with {} items per page is out of range",
            page, limit
        ))
    })
}

fn parse_positive(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v >= 1)
}

/// A page of records with the total matching count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub count: i64,

    #[serde(rename = "pageNumber")]
    pub page_number: i64,

    pub records: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(records: Vec<T>, count: i64, pagination: &Pagination) -> Self {
        Self {
            count,
            page_number: pagination.page,
            records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_based_slice() {
        assert_eq!(Pagination::new(1, 10).slice().unwrap(), (Some(10), Some(0)));
        assert_eq!(Pagination::new(2, 10).slice().unwrap(), (Some(10), Some(10)));
        assert_eq!(Pagination::new(5, 7).slice().unwrap(), (Some(7), Some(28)));
    }

    #[test]
    fn test_limit_only_slice() {
        assert_eq!(Pagination::new(0, 10).slice().unwrap(), (Some(10), None));
        assert_eq!(
            Pagination::new(0, 10).with_offset(30).slice().unwrap(),
            (Some(10), Some(30))
        );
    }

    #[test]
    fn test_explicit_offset_ignored_when_paging() {
        assert_eq!(
            Pagination::new(2, 10).with_offset(99).slice().unwrap(),
            (Some(10), Some(10))
        );
    }

    #[test]
    fn test_unbounded_slice() {
        assert_eq!(Pagination::unbounded().slice().unwrap(), (None, None));
        assert_eq!(Pagination::new(-3, -1).slice().unwrap(), (None, None));
        assert_eq!(Pagination::new(4, 0).slice().unwrap(), (None, None));
    }

    #[test]
    fn test_apply_slice_and_sort() {
        let mut query = SelectQuery::new("tasks", "task");
        let pagination = Pagination::new(3, 25);
        pagination.apply_slice(&mut query).unwrap();
        pagination.apply_sort(&mut query);

        assert_eq!(query.current_limit(), Some(25));
        assert_eq!(query.current_offset(), Some(50));
        assert!(query
            .select_builder()
            .sql()
            .contains(r#"ORDER BY "task"."created_at" DESC"#));
    }

    #[test]
    fn test_explicit_sort() {
        let mut query = SelectQuery::new("users", "user");
        Pagination::new(1, 10)
            .sorted_by("last_name", SortDirection::Asc)
            .apply_sort(&mut query);

        assert!(query
            .select_builder()
            .sql()
            .contains(r#"ORDER BY "user"."last_name" ASC"#));
    }

    #[test]
    fn test_from_query_defaults() {
        let pagination = Pagination::from_query(&PageQuery::default()).unwrap();
        assert_eq!(pagination.page, 1);
        assert_eq!(pagination.limit, DEFAULT_PER_PAGE);
        assert_eq!(pagination.offset, 0);
        assert!(pagination.sort_column.is_none());
    }

    #[test]
    fn test_from_query_invalid_numbers_fall_back() {
        let query = PageQuery {
            page: Some("zero".to_string()),
            per_page: Some("-5".to_string()),
            ..Default::default()
        };
        let pagination = Pagination::from_query(&query).unwrap();
        assert_eq!(pagination.page, 1);
        assert_eq!(pagination.limit, 25);
    }

    #[test]
    fn test_from_query_values() {
        let query = PageQuery {
            page: Some("3".to_string()),
            per_page: Some("10".to_string()),
            sort_column: Some("title".to_string()),
            sort_direction: Some("asc".to_string()),
        };
        let pagination = Pagination::from_query(&query).unwrap();
        assert_eq!(pagination.offset, 20);
        assert_eq!(pagination.sort_column.as_deref(), Some("title"));
        assert_eq!(pagination.sort_direction, Some(SortDirection::Asc));
    }

    #[test]
    fn test_from_query_rejects_bad_direction() {
        let query = PageQuery {
            sort_direction: Some("sideways".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Pagination::from_query(&query),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_total_pages() {
        let pagination = Pagination::new(1, 10);
        assert_eq!(pagination.total_pages(0), 0);
        assert_eq!(pagination.total_pages(10), 1);
        assert_eq!(pagination.total_pages(11), 2);
        assert_eq!(Pagination::unbounded().total_pages(500), 1);
        assert_eq!(Pagination::new(1, 2).total_pages(i64::MAX), i64::MAX / 2 + 1);
    }

    #[test]
    fn test_huge_page_is_rejected() {
        let query = PageQuery {
            page: Some(i64::MAX.to_string()),
            per_page: Some("25".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Pagination::from_query(&query),
            Err(CoreError::Validation(_))
        ));

        assert!(matches!(
            Pagination::new(i64::MAX, 25).slice(),
            Err(CoreError::Validation(_))
        ));

        let mut query = SelectQuery::new("tasks", "task");
        assert!(Pagination::new(i64::MAX, 25).apply_slice(&mut query).is_err());
        assert_eq!(query.current_offset(), None);

        // Largest page that still fits
        let last = i64::MAX / 25 + 1;
        assert_eq!(
            Pagination::new(last, 25).slice().unwrap(),
            (Some(25), Some((last - 1) * 25))
        );
    }

    #[test]
    fn test_page_envelope_serialization() {
        let page = Page::new(vec![1, 2], 12, &Pagination::new(2, 2));
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["count"], 12);
        assert_eq!(json["pageNumber"], 2);
        assert_eq!(json["records"].as_array().unwrap().len(), 2);
    }
}
