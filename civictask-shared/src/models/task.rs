/// Task model
///
/// A task is a geotagged request for volunteers. `location` is always derived
/// from `latitude`/`longitude` when the task is created or updated.
/// `is_subscribed` is not a column: it is projected by the task filter when a
/// viewing user is known and is `false` otherwise.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE tasks (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     title VARCHAR(255) NOT NULL,
///     description TEXT NOT NULL DEFAULT '',
///     required_volunteers_count INTEGER NOT NULL DEFAULT 0,
///     required_skills TEXT[] NOT NULL DEFAULT '{}',
///     latitude DOUBLE PRECISION NOT NULL DEFAULT 0,
///     longitude DOUBLE PRECISION NOT NULL DEFAULT 0,
///     location geometry(Point, 4326),
///     formatted_address TEXT NOT NULL DEFAULT '',
///     user_id UUID NOT NULL REFERENCES users(id),
///     category_id UUID NOT NULL REFERENCES categories(id),
///     blocked BOOLEAN NOT NULL DEFAULT FALSE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::geometry::PostgisGeometry;
use crate::db::query::BindValue;
use crate::db::repo::{select_where_in, unique_ids, Entity, Relatable};
use crate::error::{CoreError, CoreResult};
use crate::models::category::Category;
use crate::models::task_media::TaskMedia;
use crate::models::user::User;
use crate::models::user_task::UserTask;
use crate::models::{group_by, index_by};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub required_volunteers_count: i32,
    pub required_skills: Vec<String>,
    pub latitude: f64,
    pub longitude: f64,

    #[serde(skip)]
    pub location: PostgisGeometry,

    pub formatted_address: String,

    /// Owner
    pub user_id: Uuid,

    pub category_id: Uuid,
    pub blocked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[sqlx(default)]
    #[serde(default)]
    pub is_subscribed: bool,

    #[sqlx(skip)]
    #[serde(default)]
    pub user: Option<User>,

    #[sqlx(skip)]
    #[serde(default)]
    pub category: Option<Category>,

    #[sqlx(skip)]
    #[serde(default)]
    pub media: Vec<TaskMedia>,

    #[sqlx(skip)]
    #[serde(default)]
    pub subscribed_users: Vec<UserTask>,
}

impl Task {
    pub fn new(title: impl Into<String>, user_id: Uuid, category_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: String::new(),
            required_volunteers_count: 0,
            required_skills: Vec::new(),
            latitude: 0.0,
            longitude: 0.0,
            location: PostgisGeometry::point(0.0, 0.0),
            formatted_address: String::new(),
            user_id,
            category_id,
            blocked: false,
            created_at: now,
            updated_at: now,
            is_subscribed: false,
            user: None,
            category: None,
            media: Vec::new(),
            subscribed_users: Vec::new(),
        }
    }

    /// Sets coordinates and re-derives the PostGIS point
    pub fn set_coordinates(&mut self, latitude: f64, longitude: f64) {
        self.latitude = latitude;
        self.longitude = longitude;
        self.location = PostgisGeometry::point(longitude, latitude);
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }
}

impl Entity for Task {
    const TABLE: &'static str = "tasks";
    const ALIAS: &'static str = "task";
    const COLUMNS: &'static [&'static str] = &[
        "title",
        "description",
        "required_volunteers_count",
        "required_skills",
        "latitude",
        "longitude",
        "location",
        "formatted_address",
        "user_id",
        "category_id",
        "blocked",
    ];

    fn id(&self) -> Uuid {
        self.id
    }

    fn values(&self) -> Vec<BindValue> {
        vec![
            self.title.clone().into(),
            self.description.clone().into(),
            self.required_volunteers_count.into(),
            self.required_skills.clone().into(),
            self.latitude.into(),
            self.longitude.into(),
            self.location.into(),
            self.formatted_address.clone().into(),
            self.user_id.into(),
            self.category_id.into(),
            self.blocked.into(),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRelation {
    User,
    Category,
    Media,
    SubscribedUsers,
}

impl FromStr for TaskRelation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "User" => Ok(TaskRelation::User),
            "Category" => Ok(TaskRelation::Category),
            "Media" => Ok(TaskRelation::Media),
            "SubscribedUsers" => Ok(TaskRelation::SubscribedUsers),
            other => Err(CoreError::Validation(format!(
                "unknown task relation '{}'",
                other
            ))),
        }
    }
}

#[async_trait]
impl Relatable for Task {
    type Relation = TaskRelation;

    async fn load_relations(
        conn: &mut PgConnection,
        records: &mut [Self],
        relations: &[TaskRelation],
    ) -> CoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let task_ids = unique_ids(records.iter().map(|t| t.id));

        for relation in relations {
            match relation {
                TaskRelation::User => {
                    let ids = unique_ids(records.iter().map(|t| t.user_id));
                    let users: Vec<User> = select_where_in(conn, "id", ids).await?;
                    let by_id = index_by(users, |u| u.id);
                    for task in records.iter_mut() {
                        task.user = by_id.get(&task.user_id).cloned();
                    }
                }
                TaskRelation::Category => {
                    let ids = unique_ids(records.iter().map(|t| t.category_id));
                    let categories: Vec<Category> = select_where_in(conn, "id", ids).await?;
                    let by_id = index_by(categories, |c| c.id);
                    for task in records.iter_mut() {
                        task.category = by_id.get(&task.category_id).cloned();
                    }
                }
                TaskRelation::Media => {
                    let media: Vec<TaskMedia> =
                        select_where_in(conn, "task_id", task_ids.clone()).await?;
                    let mut by_task = group_by(media, |m| m.task_id);
                    for task in records.iter_mut() {
                        task.media = by_task.remove(&task.id).unwrap_or_default();
                    }
                }
                TaskRelation::SubscribedUsers => {
                    let subscriptions: Vec<UserTask> =
                        select_where_in(conn, "task_id", task_ids.clone()).await?;
                    let mut by_task = group_by(subscriptions, |s| s.task_id);
                    for task in records.iter_mut() {
                        task.subscribed_users = by_task.remove(&task.id).unwrap_or_default();
                    }
                }
            }
        }
        Ok(())
    }
}
