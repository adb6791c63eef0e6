/// User model
///
/// Users are created from the identity provider's `user.created` event and
/// are never hard-deleted; moderation sets `blocked` instead.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     external_id VARCHAR(255) NOT NULL UNIQUE,
///     first_name VARCHAR(255) NOT NULL DEFAULT '',
///     last_name VARCHAR(255) NOT NULL DEFAULT '',
///     email VARCHAR(320) UNIQUE,
///     phone_number VARCHAR(32) UNIQUE,
///     date_of_birth TIMESTAMPTZ,
///     role user_role NOT NULL DEFAULT 'user',
///     blocked BOOLEAN NOT NULL DEFAULT FALSE,
///     receive_sms_notification BOOLEAN NOT NULL DEFAULT FALSE,
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

use crate::db::query::BindValue;
use crate::db::repo::{select_where_in, unique_ids, Entity, Relatable};
use crate::error::{CoreError, CoreResult};
use crate::models::index_by;
use crate::models::user_location::UserLocation;

/// Platform role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,

    /// Subject id assigned by the identity provider
    pub external_id: String,

    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,

    /// E.164 number used for SMS notifications
    pub phone_number: Option<String>,

    pub date_of_birth: Option<DateTime<Utc>>,
    pub role: UserRole,
    pub blocked: bool,
    pub receive_sms_notification: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[sqlx(skip)]
    #[serde(default, rename = "user_location", skip_serializing_if = "Option::is_none")]
    pub location: Option<UserLocation>,
}

impl User {
    pub fn new(external_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            external_id: external_id.into(),
            first_name: String::new(),
            last_name: String::new(),
            email: None,
            phone_number: None,
            date_of_birth: None,
            role: UserRole::User,
            blocked: false,
            receive_sms_notification: false,
            created_at: now,
            updated_at: now,
            location: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Looks a user up by identity-provider id
    pub async fn find_by_external_id(
        conn: &mut PgConnection,
        external_id: &str,
    ) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, User>(r#"SELECT * FROM users WHERE external_id = $1"#)
            .bind(external_id)
            .fetch_optional(conn)
            .await
            .map_err(|e| CoreError::persistence("find user by external id", e))
    }
}

impl Entity for User {
    const TABLE: &'static str = "users";
    const ALIAS: &'static str = "user";
    const COLUMNS: &'static [&'static str] = &[
        "external_id",
        "first_name",
        "last_name",
        "email",
        "phone_number",
        "date_of_birth",
        "role",
        "blocked",
        "receive_sms_notification",
    ];

    fn id(&self) -> Uuid {
        self.id
    }

    fn values(&self) -> Vec<BindValue> {
        vec![
            self.external_id.clone().into(),
            self.first_name.clone().into(),
            self.last_name.clone().into(),
            self.email.clone().into(),
            self.phone_number.clone().into(),
            self.date_of_birth.into(),
            self.role.into(),
            self.blocked.into(),
            self.receive_sms_notification.into(),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRelation {
    Location,
}

impl FromStr for UserRelation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Location" | "UserLocations" => Ok(UserRelation::Location),
            other => Err(CoreError::Validation(format!(
                "unknown user relation '{}'",
                other
            ))),
        }
    }
}

#[async_trait]
impl Relatable for User {
    type Relation = UserRelation;

    async fn load_relations(
        conn: &mut PgConnection,
        records: &mut [Self],
        relations: &[UserRelation],
    ) -> CoreResult<()> {
        if relations.contains(&UserRelation::Location) {
            let ids = unique_ids(records.iter().map(|u| u.id));
            let locations: Vec<UserLocation> = select_where_in(conn, "user_id", ids).await?;
            let mut by_user = index_by(locations, |l| l.user_id);

            for user in records.iter_mut() {
                user.location = by_user.remove(&user.id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_defaults() {
        let user = User::new("user_2abc");
        assert_eq!(user.external_id, "user_2abc");
        assert_eq!(user.role, UserRole::User);
        assert!(!user.blocked);
        assert!(!user.is_admin());
        assert_eq!(user.values().len(), User::COLUMNS.len());
    }

    #[test]
    fn test_relation_names() {
        assert_eq!("Location".parse::<UserRelation>().unwrap(), UserRelation::Location);
        assert_eq!(
            "UserLocations".parse::<UserRelation>().unwrap(),
            UserRelation::Location
        );
        assert!(matches!(
            "Friends".parse::<UserRelation>(),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&UserRole::Admin).unwrap(), "\"admin\"");
        assert_eq!(UserRole::User.as_str(), "user");
    }

    #[test]
    fn test_full_name() {
        let mut user = User::new("x");
        user.first_name = "Ada".to_string();
        assert_eq!(user.full_name(), "Ada");
        user.last_name = "Lovelace".to_string();
        assert_eq!(user.full_name(), "Ada Lovelace");
    }
}
