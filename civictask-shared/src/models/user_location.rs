/// A user's saved location
///
/// At most one row per user (`user_id` is unique); writes go through
/// `services::users::upsert_user_location`. The PostGIS `location` column is
/// always derived from `latitude`/`longitude`.

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
use crate::models::index_by;
use crate::models::user::User;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserLocation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,

    #[serde(skip)]
    pub location: PostgisGeometry,

    pub formatted_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[sqlx(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Box<User>>,
}

impl UserLocation {
    pub fn new(user_id: Uuid, latitude: f64, longitude: f64, formatted_address: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            latitude,
            longitude,
            location: PostgisGeometry::point(longitude, latitude),
            formatted_address: formatted_address.into(),
            created_at: now,
            updated_at: now,
            user: None,
        }
    }

    /// Moves the location, keeping the geometry in sync
    pub fn set_coordinates(&mut self, latitude: f64, longitude: f64) {
        self.latitude = latitude;
        self.longitude = longitude;
        self.location = PostgisGeometry::point(longitude, latitude);
    }

    pub async fn find_by_user_id(conn: &mut PgConnection, user_id: Uuid) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, UserLocation>("SELECT * FROM user_locations WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(conn)
            .await
            .map_err(|e| CoreError::persistence("find user location", e))
    }
}

impl Entity for UserLocation {
    const TABLE: &'static str = "user_locations";
    const ALIAS: &'static str = "user_location";
    const COLUMNS: &'static [&'static str] = &[
        "user_id",
        "latitude",
        "longitude",
        "location",
        "formatted_address",
    ];

    fn id(&self) -> Uuid {
        self.id
    }

    fn values(&self) -> Vec<BindValue> {
        vec![
            self.user_id.into(),
            self.latitude.into(),
            self.longitude.into(),
            self.location.into(),
            self.formatted_address.clone().into(),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserLocationRelation {
    User,
}

impl FromStr for UserLocationRelation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "User" => Ok(UserLocationRelation::User),
            other => Err(CoreError::Validation(format!(
                "unknown user location relation '{}'",
                other
            ))),
        }
    }
}

#[async_trait]
impl Relatable for UserLocation {
    type Relation = UserLocationRelation;

    async fn load_relations(
        conn: &mut PgConnection,
        records: &mut [Self],
        relations: &[UserLocationRelation],
    ) -> CoreResult<()> {
        if relations.contains(&UserLocationRelation::User) {
            let ids = unique_ids(records.iter().map(|l| l.user_id));
            let users: Vec<User> = select_where_in(conn, "id", ids).await?;
            let by_id = index_by(users, |u| u.id);

            for location in records.iter_mut() {
                location.user = by_id.get(&location.user_id).cloned().map(Box::new);
            }
        }
        Ok(())
    }
}
