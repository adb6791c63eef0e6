/// Task categories
///
/// # Schema
///
/// ```sql
/// CREATE TABLE categories (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     name VARCHAR(255) NOT NULL UNIQUE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::query::BindValue;
use crate::db::repo::{Entity, NoRelation, Relatable};
use crate::error::CoreResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Category {
    const TABLE: &'static str = "categories";
    const ALIAS: &'static str = "category";
    const COLUMNS: &'static [&'static str] = &["name"];

    fn id(&self) -> Uuid {
        self.id
    }

    fn values(&self) -> Vec<BindValue> {
        vec![self.name.clone().into()]
    }
}

#[async_trait]
impl Relatable for Category {
    type Relation = NoRelation;

    async fn load_relations(
        _conn: &mut PgConnection,
        _records: &mut [Self],
        _relations: &[NoRelation],
    ) -> CoreResult<()> {
        Ok(())
    }
}
