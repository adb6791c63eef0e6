/// A user's subscription to a task
///
/// The `(user_id, task_id)` pair is unique; subscribing twice is a
/// persistence error. Rows cascade away with their task.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::query::BindValue;
use crate::db::repo::{select_where_in, unique_ids, Entity, Relatable};
use crate::error::{CoreError, CoreResult};
use crate::models::index_by;
use crate::models::task::Task;
use crate::models::user::User;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[sqlx(skip)]
    #[serde(default)]
    pub user: Option<User>,

    #[sqlx(skip)]
    #[serde(default)]
    pub task: Option<Box<Task>>,
}

impl UserTask {
    pub fn new(user_id: Uuid, task_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            task_id,
            created_at: now,
            updated_at: now,
            user: None,
            task: None,
        }
    }
}

impl Entity for UserTask {
    const TABLE: &'static str = "user_tasks";
    const ALIAS: &'static str = "user_task";
    const COLUMNS: &'static [&'static str] = &["user_id", "task_id"];

    fn id(&self) -> Uuid {
        self.id
    }

    fn values(&self) -> Vec<BindValue> {
        vec![self.user_id.into(), self.task_id.into()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserTaskRelation {
    User,
    Task,
}

impl FromStr for UserTaskRelation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "User" => Ok(UserTaskRelation::User),
            "Task" => Ok(UserTaskRelation::Task),
            other => Err(CoreError::Validation(format!(
                "unknown subscription relation '{}'",
                other
            ))),
        }
    }
}

#[async_trait]
impl Relatable for UserTask {
    type Relation = UserTaskRelation;

    async fn load_relations(
        conn: &mut PgConnection,
        records: &mut [Self],
        relations: &[UserTaskRelation],
    ) -> CoreResult<()> {
        for relation in relations {
            match relation {
                UserTaskRelation::User => {
                    let ids = unique_ids(records.iter().map(|s| s.user_id));
                    let users: Vec<User> = select_where_in(conn, "id", ids).await?;
                    let by_id = index_by(users, |u| u.id);
                    for subscription in records.iter_mut() {
                        subscription.user = by_id.get(&subscription.user_id).cloned();
                    }
                }
                UserTaskRelation::Task => {
                    let ids = unique_ids(records.iter().map(|s| s.task_id));
                    let tasks: Vec<Task> = select_where_in(conn, "id", ids).await?;
                    let by_id = index_by(tasks, |t| t.id);
                    for subscription in records.iter_mut() {
                        subscription.task = by_id.get(&subscription.task_id).cloned().map(Box::new);
                    }
                }
            }
        }
        Ok(())
    }
}
