/// Replayable select queries
///
/// A [`SelectQuery`] describes one aliased table plus extra projected
/// columns, joins, predicates, ordering, and a slice. Bound values are kept
/// as [`BindValue`]s so the same predicate can be rendered twice: once into a
/// `COUNT(*)` statement and once into the sliced row select. Rendering goes
/// through `sqlx::QueryBuilder`, so every value is sent as a bind parameter.
///
/// # Example
///
/// ```
/// use civictask_shared::db::query::{Fragment, SelectQuery};
///
/// let mut query = SelectQuery::new("tasks", "task");
/// query.filter(Fragment::new(r#""task".blocked = "#).bind(false));
/// query.order_by("created_at", "DESC");
/// query.limit(10);
///
/// assert_eq!(
///     query.select_builder().sql(),
///     r#"SELECT "task".* FROM tasks AS "task" WHERE ("task".blocked = $1) ORDER BY "task"."created_at" DESC LIMIT $2"#
/// );
/// ```

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgRow, Postgres};
use sqlx::{FromRow, PgConnection, QueryBuilder};
use uuid::Uuid;

use crate::db::geometry::PostgisGeometry;
use crate::error::{CoreError, CoreResult};
use crate::models::user::UserRole;

/// A value bound into a statement
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Uuid(Uuid),
    UuidArray(Vec<Uuid>),
    Text(String),
    OptionalText(Option<String>),
    TextArray(Vec<String>),
    Int(i32),
    BigInt(i64),
    Float(f64),
    Bool(bool),
    OptionalTimestamp(Option<DateTime<Utc>>),
    Geometry(PostgisGeometry),
    Role(UserRole),
}

impl BindValue {
    pub(crate) fn push_to(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self.clone() {
            BindValue::Uuid(v) => qb.push_bind(v),
            BindValue::UuidArray(v) => qb.push_bind(v),
            BindValue::Text(v) => qb.push_bind(v),
            BindValue::OptionalText(v) => qb.push_bind(v),
            BindValue::TextArray(v) => qb.push_bind(v),
            BindValue::Int(v) => qb.push_bind(v),
            BindValue::BigInt(v) => qb.push_bind(v),
            BindValue::Float(v) => qb.push_bind(v),
            BindValue::Bool(v) => qb.push_bind(v),
            BindValue::OptionalTimestamp(v) => qb.push_bind(v),
            BindValue::Geometry(v) => qb.push_bind(v),
            BindValue::Role(v) => qb.push_bind(v),
        };
    }
}

macro_rules! bind_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for BindValue {
                fn from(value: $ty) -> Self {
                    BindValue::$variant(value)
                }
            }
        )*
    };
}

bind_from! {
    Uuid => Uuid,
    Vec<Uuid> => UuidArray,
    String => Text,
    Option<String> => OptionalText,
    Vec<String> => TextArray,
    i32 => Int,
    i64 => BigInt,
    f64 => Float,
    bool => Bool,
    Option<DateTime<Utc>> => OptionalTimestamp,
    PostgisGeometry => Geometry,
    UserRole => Role,
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        BindValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Sql(String),
    Bind(BindValue),
}

/// A piece of SQL interleaved with bound values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    parts: Vec<Part>,
}

impl Fragment {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::Sql(sql.into())],
        }
    }

    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.parts.push(Part::Sql(sql.into()));
        self
    }

    pub fn bind(mut self, value: impl Into<BindValue>) -> Self {
        self.parts.push(Part::Bind(value.into()));
        self
    }

    pub fn push_to(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        for part in &self.parts {
            match part {
                Part::Sql(sql) => {
                    qb.push(sql);
                }
                Part::Bind(value) => value.push_to(qb),
            }
        }
    }

    /// Bound values in order of appearance
    pub fn binds(&self) -> impl Iterator<Item = &BindValue> {
        self.parts.iter().filter_map(|part| match part {
            Part::Bind(value) => Some(value),
            Part::Sql(_) => None,
        })
    }
}

/// A `WHERE` term; terms are joined with `AND`
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// A single predicate
    All(Fragment),

    /// Predicates OR-joined inside one parenthesised group
    Any(Vec<Fragment>),
}

/// Quotes an SQL identifier
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Mutable description of a select over one aliased table
#[derive(Debug, Clone)]
pub struct SelectQuery {
    table: &'static str,
    alias: String,
    columns: Vec<Fragment>,
    joins: Vec<Fragment>,
    conditions: Vec<Condition>,
    order_by: Vec<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl SelectQuery {
    pub fn new(table: &'static str, alias: impl Into<String>) -> Self {
        Self {
            table,
            alias: alias.into(),
            columns: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// `"alias".column`
    pub fn qualified(&self, column: &str) -> String {
        format!("{}.{}", quote_ident(&self.alias), column)
    }

    /// Projects an extra column after `"alias".*`
    pub fn column(&mut self, column: Fragment) -> &mut Self {
        self.columns.push(column);
        self
    }

    pub fn join(&mut self, join: Fragment) -> &mut Self {
        self.joins.push(join);
        self
    }

    pub fn filter(&mut self, predicate: Fragment) -> &mut Self {
        self.conditions.push(Condition::All(predicate));
        self
    }

    /// Adds an OR group; an empty group adds nothing
    pub fn filter_any(&mut self, predicates: Vec<Fragment>) -> &mut Self {
        match predicates.len() {
            0 => {}
            1 => {
                if let Some(predicate) = predicates.into_iter().next() {
                    self.conditions.push(Condition::All(predicate));
                }
            }
            _ => self.conditions.push(Condition::Any(predicates)),
        }
        self
    }

    /// Orders by a column of the aliased table
    ///
    /// The column is quoted, not validated: an unknown column fails when the
    /// statement runs.
    pub fn order_by(&mut self, column: &str, direction: &str) -> &mut Self {
        let column = if column.contains('.') {
            column
                .split('.')
                .map(quote_ident)
                .collect::<Vec<_>>()
                .join(".")
        } else {
            self.qualified(&quote_ident(column))
        };
        self.order_by.push(format!("{} {}", column, direction));
        self
    }

    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: i64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    pub fn current_limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn current_offset(&self) -> Option<i64> {
        self.offset
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn push_from_where(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push(" FROM ");
        qb.push(self.table);
        qb.push(" AS ");
        qb.push(quote_ident(&self.alias));

        for join in &self.joins {
            qb.push(" ");
            join.push_to(qb);
        }

        for (i, condition) in self.conditions.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            match condition {
                Condition::All(predicate) => {
                    qb.push("(");
                    predicate.push_to(qb);
                    qb.push(")");
                }
                Condition::Any(predicates) => {
                    qb.push("(");
                    for (j, predicate) in predicates.iter().enumerate() {
                        if j > 0 {
                            qb.push(" OR ");
                        }
                        qb.push("(");
                        predicate.push_to(qb);
                        qb.push(")");
                    }
                    qb.push(")");
                }
            }
        }
    }

    /// `SELECT COUNT(*)` over the filtered, unsliced query
    pub fn count_builder(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*)");
        self.push_from_where(&mut qb);
        qb
    }

    /// The row select, including ordering and slice
    pub fn select_builder(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(quote_ident(&self.alias));
        qb.push(".*");
        for column in &self.columns {
            qb.push(", ");
            column.push_to(&mut qb);
        }

        self.push_from_where(&mut qb);

        if !self.order_by.is_empty() {
            qb.push(" ORDER BY ");
            qb.push(self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit);
        }
        if let Some(offset) = self.offset {
            qb.push(" OFFSET ");
            qb.push_bind(offset);
        }
        qb
    }

    pub async fn count(&self, conn: &mut PgConnection) -> CoreResult<i64> {
        let mut qb = self.count_builder();
        qb.build_query_scalar::<i64>()
            .fetch_one(conn)
            .await
            .map_err(|e| CoreError::persistence(format!("count {}", self.table), e))
    }

    pub async fn fetch_all<E>(&self, conn: &mut PgConnection) -> CoreResult<Vec<E>>
    where
        E: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let mut qb = self.select_builder();
        qb.build_query_as::<E>()
            .fetch_all(conn)
            .await
            .map_err(|e| CoreError::persistence(format!("select {}", self.table), e))
    }

    pub async fn fetch_optional<E>(&self, conn: &mut PgConnection) -> CoreResult<Option<E>>
    where
        E: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let mut qb = self.select_builder();
        qb.build_query_as::<E>()
            .fetch_optional(conn)
            .await
            .map_err(|e| CoreError::persistence(format!("select {}", self.table), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_select() {
        let query = SelectQuery::new("categories", "category");
        assert_eq!(
            query.select_builder().sql(),
            r#"SELECT "category".* FROM categories AS "category""#
        );
        assert_eq!(
            query.count_builder().sql(),
            r#"SELECT COUNT(*) FROM categories AS "category""#
        );
    }

    #[test]
    fn test_conditions_and_groups() {
        let mut query = SelectQuery::new("tasks", "task");
        query.filter_any(vec![
            Fragment::new(r#""task".category_id = ANY("#)
                .bind(vec![Uuid::nil()])
                .sql(")"),
            Fragment::new(r#""task".required_skills && "#).bind(vec!["first aid".to_string()]),
        ]);
        query.filter(Fragment::new(r#""task".blocked = FALSE"#));

        assert_eq!(
            query.count_builder().sql(),
            r#"SELECT COUNT(*) FROM tasks AS "task" WHERE (("task".category_id = ANY($1)) OR ("task".required_skills && $2)) AND ("task".blocked = FALSE)"#
        );
    }

    #[test]
    fn test_single_fragment_group_is_plain_condition() {
        let mut query = SelectQuery::new("tasks", "task");
        query.filter_any(vec![Fragment::new("x = ").bind(1i32)]);
        query.filter_any(Vec::new());

        assert_eq!(query.conditions().len(), 1);
        assert!(matches!(query.conditions()[0], Condition::All(_)));
    }

    #[test]
    fn test_count_ignores_slice_and_columns() {
        let mut query = SelectQuery::new("tasks", "task");
        query.column(Fragment::new("EXISTS (SELECT 1) AS is_subscribed"));
        query.order_by("created_at", "DESC");
        query.limit(5).offset(10);

        assert_eq!(
            query.count_builder().sql(),
            r#"SELECT COUNT(*) FROM tasks AS "task""#
        );
        assert_eq!(
            query.select_builder().sql(),
            r#"SELECT "task".*, EXISTS (SELECT 1) AS is_subscribed FROM tasks AS "task" ORDER BY "task"."created_at" DESC LIMIT $1 OFFSET $2"#
        );
    }

    #[test]
    fn test_order_by_quotes_identifiers() {
        let mut query = SelectQuery::new("users", "user");
        query.order_by("first_name\"; DROP TABLE users; --", "ASC");
        let sql = query.select_builder().into_sql();
        assert!(sql.ends_with(r#"ORDER BY "user"."first_name""; DROP TABLE users; --" ASC"#));
    }

    #[test]
    fn test_fragment_binds() {
        let fragment = Fragment::new("a = ")
            .bind(1i32)
            .sql(" AND b = ")
            .bind("x");
        let binds: Vec<_> = fragment.binds().cloned().collect();
        assert_eq!(binds, vec![BindValue::Int(1), BindValue::Text("x".to_string())]);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("user"), "\"user\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
