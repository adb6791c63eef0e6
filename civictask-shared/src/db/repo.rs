/// Generic persistence operations
///
/// Every table the core touches is described by an [`Entity`] (table, alias,
/// writable columns, bound values) and a [`Relatable`] impl that knows how to
/// expand its named relations. The functions here work for any such type and
/// take `&mut PgConnection`, so a pooled connection and an open transaction
/// are interchangeable.
///
/// # Example
///
/// ```no_run
/// use civictask_shared::db::pagination::Pagination;
/// use civictask_shared::db::repo::{select_many, QueryParam};
/// use civictask_shared::models::task::{Task, TaskRelation};
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let mut conn = pool.acquire().await?;
///
/// let param = QueryParam::new()
///     .with_relations([TaskRelation::Category, TaskRelation::Media])
///     .paginate(Pagination::new(1, 20));
///
/// let (tasks, total) = select_many::<Task>(&mut conn, &param).await?;
/// println!("{} of {} tasks", tasks.len(), total);
/// # Ok(())
/// # }
/// ```

use std::collections::HashSet;
use std::fmt::Debug;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgRow, Postgres};
use sqlx::{FromRow, PgConnection, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use crate::db::pagination::Pagination;
use crate::db::query::{BindValue, Fragment, SelectQuery};
use crate::error::{CoreError, CoreResult};

/// A row type backed by one table
pub trait Entity: for<'r> FromRow<'r, PgRow> + Send + Sync + Unpin + Sized {
    const TABLE: &'static str;

    /// Alias used when the table appears in a select
    const ALIAS: &'static str;

    /// Writable columns, excluding `id` and the timestamps
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> Uuid;

    /// Values for [`Entity::COLUMNS`], in the same order
    fn values(&self) -> Vec<BindValue>;
}

/// An entity with named relations that can be loaded after the main select
#[async_trait]
pub trait Relatable: Entity {
    type Relation: FromStr<Err = CoreError> + Copy + PartialEq + Debug + Send + Sync;

    async fn load_relations(
        conn: &mut PgConnection,
        records: &mut [Self],
        relations: &[Self::Relation],
    ) -> CoreResult<()>;
}

/// Relation type for entities that have none
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoRelation {}

impl FromStr for NoRelation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Err(CoreError::Validation(format!("unknown relation '{}'", s)))
    }
}

/// Relations, pagination, and alias for a select
#[derive(Debug, Clone)]
pub struct QueryParam<R> {
    pub relations: Vec<R>,
    pub pagination: Pagination,

    /// Orders by the pagination sort (default `created_at DESC`)
    pub sorted: bool,

    /// Alias the table is selected under; also qualifies `id` in `select_by_id`
    pub alias: Option<String>,
}

impl<R> Default for QueryParam<R> {
    fn default() -> Self {
        Self {
            relations: Vec::new(),
            pagination: Pagination::unbounded(),
            sorted: false,
            alias: None,
        }
    }
}

impl<R> QueryParam<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relations(mut self, relations: impl IntoIterator<Item = R>) -> Self {
        self.relations.extend(relations);
        self
    }

    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn sorted(mut self) -> Self {
        self.sorted = true;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

impl<R> QueryParam<R>
where
    R: FromStr<Err = CoreError>,
{
    /// Adds relations by name, e.g. `"User"` or `"SubscribedUsers"`
    pub fn with_relation_names<S: AsRef<str>>(mut self, names: &[S]) -> CoreResult<Self> {
        for name in names {
            self.relations.push(name.as_ref().parse()?);
        }
        Ok(self)
    }
}

/// Starts a select over `E` honouring the param's alias
pub fn base_query<E: Entity, R>(param: &QueryParam<R>) -> SelectQuery {
    SelectQuery::new(E::TABLE, param.alias.as_deref().unwrap_or(E::ALIAS))
}

fn insert_builder<E: Entity>(entity: &E) -> QueryBuilder<'static, Postgres> {
    let values = entity.values();
    debug_assert_eq!(values.len(), E::COLUMNS.len());

    let mut qb = QueryBuilder::new("INSERT INTO ");
    qb.push(E::TABLE).push(" (id");
    for column in E::COLUMNS {
        qb.push(", ").push(*column);
    }

    qb.push(") VALUES (");
    qb.push_bind(entity.id());
    for value in &values {
        qb.push(", ");
        value.push_to(&mut qb);
    }
    qb.push(") RETURNING *");
    qb
}

fn update_builder<E: Entity>(entity: &E) -> QueryBuilder<'static, Postgres> {
    let values = entity.values();
    debug_assert_eq!(values.len(), E::COLUMNS.len());

    let mut qb = QueryBuilder::new("UPDATE ");
    qb.push(E::TABLE).push(" SET ");
    for (column, value) in E::COLUMNS.iter().zip(&values) {
        qb.push(*column).push(" = ");
        value.push_to(&mut qb);
        qb.push(", ");
    }
    qb.push("updated_at = GREATEST(NOW(), updated_at) WHERE id = ");
    qb.push_bind(entity.id());
    qb.push(" RETURNING *");
    qb
}

/// Inserts `entity` and returns the stored row
///
/// Constraint violations surface as `Persistence` errors.
pub async fn create<E: Entity>(conn: &mut PgConnection, entity: &E) -> CoreResult<E> {
    let created = insert_builder(entity)
        .build_query_as::<E>()
        .fetch_one(conn)
        .await
        .map_err(|e| CoreError::persistence(format!("insert into {}", E::TABLE), e))?;

    debug!(table = E::TABLE, id = %created.id(), "Inserted row");
    Ok(created)
}

/// Overwrites every writable column of the row with `entity`'s id
pub async fn update<E: Entity>(conn: &mut PgConnection, entity: &E) -> CoreResult<E> {
    let updated = update_builder(entity)
        .build_query_as::<E>()
        .fetch_optional(conn)
        .await
        .map_err(|e| CoreError::persistence(format!("update {}", E::TABLE), e))?;

    updated.ok_or_else(|| CoreError::NotFound(format!("{} {}", E::TABLE, entity.id())))
}

/// Deletes by id; returns whether a row was removed
pub async fn delete<E: Entity>(conn: &mut PgConnection, id: Uuid) -> CoreResult<bool> {
    let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", E::TABLE))
        .bind(id)
        .execute(conn)
        .await
        .map_err(|e| CoreError::persistence(format!("delete from {}", E::TABLE), e))?;

    debug!(table = E::TABLE, %id, removed = result.rows_affected(), "Deleted row");
    Ok(result.rows_affected() > 0)
}

/// Counts, slices, selects, and expands relations for a prepared query
pub async fn fetch_page<E: Relatable>(
    conn: &mut PgConnection,
    mut query: SelectQuery,
    param: &QueryParam<E::Relation>,
) -> CoreResult<(Vec<E>, i64)> {
    let count = if param.sorted {
        param.pagination.apply_with_sorting(conn, &mut query).await?
    } else {
        param.pagination.apply(conn, &mut query).await?
    };

    let mut records: Vec<E> = query.fetch_all(conn).await?;
    if !param.relations.is_empty() {
        E::load_relations(conn, &mut records, &param.relations).await?;
    }

    Ok((records, count))
}

/// Paginated select with the total count of matching rows
pub async fn select_many<E: Relatable>(
    conn: &mut PgConnection,
    param: &QueryParam<E::Relation>,
) -> CoreResult<(Vec<E>, i64)> {
    fetch_page(conn, base_query::<E, _>(param), param).await
}

/// Every row, with relations; pagination is ignored
pub async fn select_all<E: Relatable>(
    conn: &mut PgConnection,
    param: &QueryParam<E::Relation>,
) -> CoreResult<Vec<E>> {
    let mut query = base_query::<E, _>(param);
    if param.sorted {
        param.pagination.apply_sort(&mut query);
    }

    let mut records: Vec<E> = query.fetch_all(conn).await?;
    if !param.relations.is_empty() {
        E::load_relations(conn, &mut records, &param.relations).await?;
    }
    Ok(records)
}

/// Single row by id, or `NotFound`
pub async fn select_by_id<E: Relatable>(
    conn: &mut PgConnection,
    id: Uuid,
    param: &QueryParam<E::Relation>,
) -> CoreResult<E> {
    let mut query = base_query::<E, _>(param);
    let column = match &param.alias {
        Some(_) => query.qualified("id"),
        None => "id".to_string(),
    };
    query.filter(Fragment::new(format!("{} = ", column)).bind(id));

    let mut record: E = query
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("{} {}", E::TABLE, id)))?;

    if !param.relations.is_empty() {
        E::load_relations(conn, std::slice::from_mut(&mut record), &param.relations).await?;
    }
    Ok(record)
}

/// Rows of `E` whose `column` matches any of `ids`
pub async fn select_where_in<E: Entity>(
    conn: &mut PgConnection,
    column: &str,
    ids: Vec<Uuid>,
) -> CoreResult<Vec<E>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut query = SelectQuery::new(E::TABLE, E::ALIAS);
    let column = query.qualified(column);
    query.filter(Fragment::new(format!("{} = ANY(", column)).bind(ids).sql(")"));
    query.fetch_all(conn).await
}

/// Distinct ids in first-seen order
pub fn unique_ids(ids: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
