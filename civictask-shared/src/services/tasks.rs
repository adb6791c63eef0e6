/// Task service
///
/// Filtering, listing, the creation workflow, owner-only edits, subscriptions
/// and moderation of tasks.
///
/// # Filtering
///
/// [`TaskFilter`] turns browse parameters into predicates over the `task`
/// alias. Top-level rules are AND-ed; the category and skill rules share one
/// OR group, so a task matches when it is in one of the categories *or*
/// needs one of the skills.
///
/// # Creation
///
/// [`create_task`] validates the input, decodes every media item, inserts the
/// task, then uploads each payload and records a `task_media` row. Run it
/// through [`create_task_in_transaction`] so that any failure leaves neither a
/// task nor media rows behind.
///
/// # Example
///
/// ```no_run
/// use civictask_shared::db::pagination::Pagination;
/// use civictask_shared::services::tasks::{list_tasks, ListTasksQuery};
/// # async fn example(conn: &mut sqlx::PgConnection, viewer: uuid::Uuid) -> civictask_shared::error::CoreResult<()> {
/// let query = ListTasksQuery {
///     latitude: Some("40.7128".to_string()),
///     longitude: Some("-74.0060".to_string()),
///     distance: Some("10".to_string()),
///     search_term: Some("garden".to_string()),
///     ..Default::default()
/// };
///
/// let page = list_tasks(conn, &query, Pagination::new(1, 25), Some(viewer)).await?;
/// println!("{} tasks within 10 km", page.count);
/// # Ok(())
/// # }
/// ```

use std::sync::Arc;

use serde::Deserialize;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use crate::db::pagination::{Page, Pagination};
use crate::db::query::{Fragment, SelectQuery};
use crate::db::repo::{self, base_query, fetch_page, select_by_id, Entity, QueryParam, Relatable};
use crate::db::transaction::run_in_transaction;
use crate::error::{CoreError, CoreResult};
use crate::models::task::{Task, TaskRelation};
use crate::models::task_media::TaskMedia;
use crate::models::user_task::{UserTask, UserTaskRelation};
use crate::services::media::{parse_data_uri, DecodedMedia};
use crate::services::moderation::ModerationAction;
use crate::storage::ObjectStorage;

/// Relations expanded for task listings and detail views
pub const TASK_RELATIONS: [TaskRelation; 4] = [
    TaskRelation::User,
    TaskRelation::Category,
    TaskRelation::Media,
    TaskRelation::SubscribedUsers,
];

/// Predicates for browsing tasks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub category_ids: Vec<Uuid>,
    pub skills: Vec<String>,

    /// Search origin; geographic filtering is off unless both are non-zero
    pub latitude: f64,
    pub longitude: f64,

    /// Search radius in kilometres
    pub distance_km: f64,

    /// Projects `is_subscribed` for this viewer
    pub subscribe_user_id: Option<Uuid>,

    pub created_by_user_id: Option<Uuid>,
    pub subscribed_by_user_id: Option<Uuid>,

    /// Case-insensitive substring of the title
    pub search_term: Option<String>,

    /// Hide blocked tasks
    pub apply_block_filter: bool,
}

impl TaskFilter {
    pub fn has_location(&self) -> bool {
        self.latitude != 0.0 && self.longitude != 0.0
    }

    /// Adds this filter's predicates, joins, and projections to `query`
    pub fn apply(&self, query: &mut SelectQuery) {
        let task = |column: &str| query.qualified(column);

        let mut group = Vec::new();
        if !self.category_ids.is_empty() {
            group.push(
                Fragment::new(format!("{} = ANY(", task("category_id")))
                    .bind(self.category_ids.clone())
                    .sql(")"),
            );
        }
        if !self.skills.is_empty() {
            group.push(
                Fragment::new(format!("{} && ", task("required_skills"))).bind(self.skills.clone()),
            );
        }

        let location = self.has_location().then(|| {
            Fragment::new("ST_DWithin(ST_SetSRID(ST_MakePoint(")
                .bind(self.longitude)
                .sql(", ")
                .bind(self.latitude)
                .sql(format!("), 4326)::geography, {}::geography, ", task("location")))
                .bind(self.distance_km * 1000.0)
                .sql(")")
        });

        let subscribed = self.subscribe_user_id.map(|user_id| {
            Fragment::new(format!(
                "EXISTS (SELECT 1 FROM user_tasks ut WHERE ut.task_id = {} AND ut.user_id = ",
                task("id")
            ))
            .bind(user_id)
            .sql(") AS is_subscribed")
        });

        let created_by = self
            .created_by_user_id
            .map(|user_id| Fragment::new(format!("{} = ", task("user_id"))).bind(user_id));

        let subscribed_by = self.subscribed_by_user_id.map(|user_id| {
            Fragment::new(format!(
                "INNER JOIN user_tasks ON user_tasks.task_id = {} AND user_tasks.user_id = ",
                task("id")
            ))
            .bind(user_id)
        });

        let blocked = self
            .apply_block_filter
            .then(|| Fragment::new(format!("{} = FALSE", task("blocked"))));

        let search = self
            .search_term
            .as_deref()
            .filter(|term| !term.is_empty())
            .map(|term| {
                Fragment::new(format!("{} ILIKE ", task("title")))
                    .bind(format!("%{}%", escape_like(term)))
            });

        query.filter_any(group);
        if let Some(location) = location {
            query.filter(location);
        }
        if let Some(subscribed) = subscribed {
            query.column(subscribed);
        }
        if let Some(created_by) = created_by {
            query.filter(created_by);
        }
        if let Some(subscribed_by) = subscribed_by {
            query.join(subscribed_by);
        }
        if let Some(blocked) = blocked {
            query.filter(blocked);
        }
        if let Some(search) = search {
            query.filter(search);
        }
    }
}

/// Escapes `LIKE` metacharacters so the term matches literally
pub fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Raw browse parameters as they arrive in a query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTasksQuery {
    /// Comma-separated category ids
    pub category_ids: Option<String>,

    /// Comma-separated skill tags
    pub skills: Option<String>,

    pub latitude: Option<String>,
    pub longitude: Option<String>,

    /// Radius in kilometres; required with a location
    pub distance: Option<String>,

    /// `"true"` projects `is_subscribed` for the viewer
    pub is_subscribed: Option<String>,

    pub search_term: Option<String>,
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn parse_number(name: &str, raw: Option<&str>) -> CoreResult<Option<f64>> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| CoreError::Validation(format!("invalid {} '{}'", name, value))),
    }
}

impl ListTasksQuery {
    /// Builds the public browse filter; blocked tasks are always hidden
    pub fn to_filter(&self, viewer: Option<Uuid>) -> CoreResult<TaskFilter> {
        let category_ids = split_csv(self.category_ids.as_deref())
            .iter()
            .map(|raw| {
                Uuid::parse_str(raw)
                    .map_err(|_| CoreError::Validation(format!("invalid category id '{}'", raw)))
            })
            .collect::<CoreResult<Vec<_>>>()?;

        let latitude = parse_number("latitude", self.latitude.as_deref())?;
        let longitude = parse_number("longitude", self.longitude.as_deref())?;
        let distance = parse_number("distance", self.distance.as_deref())?;

        let (latitude, longitude, distance_km) = match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => {
                if !(-90.0..=90.0).contains(&latitude) {
                    return Err(CoreError::Validation(format!("latitude {} out of range", latitude)));
                }
                if !(-180.0..=180.0).contains(&longitude) {
                    return Err(CoreError::Validation(format!(
                        "longitude {} out of range",
                        longitude
                    )));
                }
                let distance = distance.ok_or_else(|| {
                    CoreError::Validation("distance is required when a location is given".to_string())
                })?;
                if distance < 0.0 {
                    return Err(CoreError::Validation("distance must not be negative".to_string()));
                }
                (latitude, longitude, distance)
            }
            (None, None) => (0.0, 0.0, distance.unwrap_or(0.0)),
            _ => {
                return Err(CoreError::Validation(
                    "latitude and longitude must be given together".to_string(),
                ))
            }
        };

        let subscribe_user_id = match self.is_subscribed.as_deref() {
            Some("true") => viewer,
            _ => None,
        };

        Ok(TaskFilter {
            category_ids,
            skills: split_csv(self.skills.as_deref()),
            latitude,
            longitude,
            distance_km,
            subscribe_user_id,
            created_by_user_id: None,
            subscribed_by_user_id: None,
            search_term: self
                .search_term
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            apply_block_filter: true,
        })
    }
}

/// Filtered, paginated tasks plus the pre-slice count
pub async fn fetch_tasks(
    conn: &mut PgConnection,
    param: &QueryParam<TaskRelation>,
    filter: &TaskFilter,
) -> CoreResult<(Vec<Task>, i64)> {
    let mut query = base_query::<Task, _>(param);
    filter.apply(&mut query);

    let (tasks, count) = fetch_page::<Task>(conn, query, param).await?;
    debug!(count, returned = tasks.len(), "Fetched tasks");
    Ok((tasks, count))
}

async fn list_with(
    conn: &mut PgConnection,
    filter: TaskFilter,
    pagination: Pagination,
) -> CoreResult<Page<Task>> {
    let param = QueryParam::new()
        .with_relations(TASK_RELATIONS)
        .paginate(pagination.clone());
    let (tasks, count) = fetch_tasks(conn, &param, &filter).await?;
    Ok(Page::new(tasks, count, &pagination))
}

/// Public browse: unblocked tasks matching the request parameters
pub async fn list_tasks(
    conn: &mut PgConnection,
    query: &ListTasksQuery,
    pagination: Pagination,
    viewer: Option<Uuid>,
) -> CoreResult<Page<Task>> {
    let filter = query.to_filter(viewer)?;
    list_with(conn, filter, pagination).await
}

/// Tasks owned by `user_id`, blocked ones included
pub async fn list_tasks_created_by(
    conn: &mut PgConnection,
    user_id: Uuid,
    pagination: Pagination,
) -> CoreResult<Page<Task>> {
    let filter = TaskFilter {
        created_by_user_id: Some(user_id),
        ..Default::default()
    };
    list_with(conn, filter, pagination).await
}

/// Unblocked tasks `user_id` has subscribed to
pub async fn list_tasks_subscribed_by(
    conn: &mut PgConnection,
    user_id: Uuid,
    pagination: Pagination,
) -> CoreResult<Page<Task>> {
    let filter = TaskFilter {
        subscribed_by_user_id: Some(user_id),
        apply_block_filter: true,
        ..Default::default()
    };
    list_with(conn, filter, pagination).await
}

/// Every task, blocked ones included
pub async fn list_tasks_for_admin(
    conn: &mut PgConnection,
    pagination: Pagination,
) -> CoreResult<Page<Task>> {
    list_with(conn, TaskFilter::default(), pagination).await
}

/// One task, selected under the `task` alias
pub async fn fetch_task_by_id(
    conn: &mut PgConnection,
    task_id: Uuid,
    relations: &[TaskRelation],
) -> CoreResult<Task> {
    let param = QueryParam::new()
        .with_relations(relations.iter().copied())
        .with_alias(Task::ALIAS);
    select_by_id(conn, task_id, &param).await
}

/// Input for creating a task
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTaskInput {
    #[validate(length(min = 1, max = 255, message = "Title must be 1-255 characters"))]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[validate(range(min = 0, message = "Volunteer count must not be negative"))]
    #[serde(default)]
    pub required_volunteers_count: i32,

    #[serde(default)]
    pub required_skills: Vec<String>,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    #[serde(default)]
    pub formatted_address: String,

    pub category_id: Uuid,

    /// `data:<mime>;base64,<payload>` strings
    #[serde(default)]
    pub media: Vec<String>,
}

/// Input for editing a task; replaces every editable field
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateTaskInput {
    #[validate(length(min = 1, max = 255, message = "Title must be 1-255 characters"))]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[validate(range(min = 0, message = "Volunteer count must not be negative"))]
    #[serde(default)]
    pub required_volunteers_count: i32,

    #[serde(default)]
    pub required_skills: Vec<String>,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    #[serde(default)]
    pub formatted_address: String,

    pub category_id: Uuid,
}

fn require_title(title: &str) -> CoreResult<()> {
    if title.trim().is_empty() {
        return Err(CoreError::Validation("title must not be blank".to_string()));
    }
    Ok(())
}

fn normalize_skills(skills: Vec<String>) -> Vec<String> {
    skills
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Creates a task owned by `owner_id` and uploads its media
///
/// Every media item is decoded before the first upload. Must run inside a
/// transaction for the all-or-nothing guarantee; see
/// [`create_task_in_transaction`]. Objects already uploaded when a later step
/// fails are not removed from storage.
pub async fn create_task(
    conn: &mut PgConnection,
    storage: &dyn ObjectStorage,
    owner_id: Uuid,
    input: CreateTaskInput,
) -> CoreResult<Task> {
    input.validate()?;
    require_title(&input.title)?;

    let decoded = input
        .media
        .iter()
        .map(|uri| parse_data_uri(uri))
        .collect::<Result<Vec<DecodedMedia>, _>>()?;

    let mut task = Task::new(input.title, owner_id, input.category_id);
    task.description = input.description;
    task.required_volunteers_count = input.required_volunteers_count;
    task.required_skills = normalize_skills(input.required_skills);
    task.formatted_address = input.formatted_address;
    task.set_coordinates(input.latitude, input.longitude);

    let mut created = repo::create(conn, &task).await?;

    for item in decoded {
        let key = item.object_key();
        let stored = storage.put(&key, item.data, &item.mime_type).await?;

        let media = TaskMedia::new(created.id, item.mime_type, stored.url);
        created.media.push(repo::create(conn, &media).await?);
    }

    info!(
        task_id = %created.id,
        owner_id = %owner_id,
        media = created.media.len(),
        "Task created"
    );
    Ok(created)
}

/// [`create_task`] in its own transaction
pub async fn create_task_in_transaction(
    pool: &PgPool,
    storage: Arc<dyn ObjectStorage>,
    owner_id: Uuid,
    input: CreateTaskInput,
) -> CoreResult<Task> {
    run_in_transaction(pool, move |conn| {
        Box::pin(async move { create_task(conn, storage.as_ref(), owner_id, input).await })
    })
    .await
}

async fn fetch_owned_task(conn: &mut PgConnection, actor_id: Uuid, task_id: Uuid) -> CoreResult<Task> {
    let task = fetch_task_by_id(conn, task_id, &[]).await?;
    if !task.is_owned_by(actor_id) {
        return Err(CoreError::Authorization(format!(
            "task {} is not owned by user {}",
            task_id, actor_id
        )));
    }
    Ok(task)
}

/// Replaces the editable fields of a task owned by `actor_id`
///
/// The input is merged onto a freshly loaded row, so `blocked` and ownership
/// are never overwritten from the request.
pub async fn update_task(
    conn: &mut PgConnection,
    actor_id: Uuid,
    task_id: Uuid,
    input: UpdateTaskInput,
) -> CoreResult<Task> {
    input.validate()?;
    require_title(&input.title)?;

    let mut task = fetch_owned_task(conn, actor_id, task_id).await?;
    task.title = input.title;
    task.description = input.description;
    task.required_volunteers_count = input.required_volunteers_count;
    task.required_skills = normalize_skills(input.required_skills);
    task.formatted_address = input.formatted_address;
    task.category_id = input.category_id;
    task.set_coordinates(input.latitude, input.longitude);

    let updated = repo::update(conn, &task).await?;
    info!(task_id = %task_id, "Task updated");
    Ok(updated)
}

/// Deletes a task owned by `actor_id`; media and subscriptions cascade
pub async fn delete_task(conn: &mut PgConnection, actor_id: Uuid, task_id: Uuid) -> CoreResult<bool> {
    fetch_owned_task(conn, actor_id, task_id).await?;
    let removed = repo::delete::<Task>(conn, task_id).await?;
    info!(task_id = %task_id, removed, "Task deleted");
    Ok(removed)
}

/// Subscribes `user_id` to a task
///
/// Subscribing twice violates the unique pair and fails with a persistence
/// error.
pub async fn apply_to_task(conn: &mut PgConnection, task_id: Uuid, user_id: Uuid) -> CoreResult<UserTask> {
    fetch_task_by_id(conn, task_id, &[]).await?;
    let subscription = repo::create(conn, &UserTask::new(user_id, task_id)).await?;
    info!(task_id = %task_id, user_id = %user_id, "User applied to task");
    Ok(subscription)
}

/// Removes the subscription; returns how many rows went away
pub async fn withdraw_from_task(conn: &mut PgConnection, task_id: Uuid, user_id: Uuid) -> CoreResult<u64> {
    let result = sqlx::query("DELETE FROM user_tasks WHERE user_id = $1 AND task_id = $2")
        .bind(user_id)
        .bind(task_id)
        .execute(conn)
        .await
        .map_err(|e| CoreError::persistence("withdraw from task", e))?;

    info!(
        task_id = %task_id,
        user_id = %user_id,
        removed = result.rows_affected(),
        "User withdrew from task"
    );
    Ok(result.rows_affected())
}

/// Subscriptions of a task with their user and task expanded
pub async fn fetch_subscribers_for_task(conn: &mut PgConnection, task_id: Uuid) -> CoreResult<Vec<UserTask>> {
    let mut query = SelectQuery::new("user_tasks", "user_task");
    let column = query.qualified("task_id");
    query.filter(Fragment::new(format!("{} = ", column)).bind(task_id));
    query.order_by("created_at", "ASC");

    let mut subscriptions: Vec<UserTask> = query.fetch_all(conn).await?;
    UserTask::load_relations(
        conn,
        &mut subscriptions,
        &[UserTaskRelation::User, UserTaskRelation::Task],
    )
    .await?;
    Ok(subscriptions)
}

/// Blocks or unblocks a task; the returned task carries the new flag
pub async fn apply_action_to_task(
    conn: &mut PgConnection,
    task_id: Uuid,
    action: ModerationAction,
) -> CoreResult<Task> {
    let mut task = fetch_task_by_id(conn, task_id, &[]).await?;
    task.blocked = action.blocked();

    let updated = repo::update(conn, &task).await?;
    info!(task_id = %task_id, action = %action, "Moderation action applied to task");
    Ok(updated)
}
