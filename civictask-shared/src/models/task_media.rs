/// Images attached to a task
///
/// Rows are only written by the task creation workflow, after the payload has
/// been stored. Deleting a task cascades to its media.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::query::BindValue;
use crate::db::repo::{Entity, NoRelation, Relatable};
use crate::error::CoreResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskMedia {
    pub id: Uuid,

    /// e.g. `image/png`
    pub mime_type: String,

    /// Public URL of the stored object
    pub link: String,

    pub task_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskMedia {
    pub fn new(task_id: Uuid, mime_type: impl Into<String>, link: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            mime_type: mime_type.into(),
            link: link.into(),
            task_id,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for TaskMedia {
    const TABLE: &'static str = "task_media";
    const ALIAS: &'static str = "task_media";
    const COLUMNS: &'static [&'static str] = &["mime_type", "link", "task_id"];

    fn id(&self) -> Uuid {
        self.id
    }

    fn values(&self) -> Vec<BindValue> {
        vec![
            self.mime_type.clone().into(),
            self.link.clone().into(),
            self.task_id.into(),
        ]
    }
}

#[async_trait]
impl Relatable for TaskMedia {
    type Relation = NoRelation;

    async fn load_relations(
        _conn: &mut PgConnection,
        _records: &mut [Self],
        _relations: &[NoRelation],
    ) -> CoreResult<()> {
        Ok(())
    }
}
