/// User service
///
/// Users are created from identity-provider events and afterwards edit their
/// own profile and home location. Admins list and moderate them.
///
/// # Example
///
/// ```no_run
/// use civictask_shared::services::users::{update_profile, LocationInput, UpdateMeInput};
/// # async fn example(pool: sqlx::PgPool, user_id: uuid::Uuid) -> civictask_shared::error::CoreResult<()> {
/// let me = UpdateMeInput {
///     first_name: "Ada".to_string(),
///     last_name: "Lovelace".to_string(),
///     phone_number: Some("+15551234567".to_string()),
///     receive_sms_notification: true,
/// };
/// let home = LocationInput {
///     latitude: 40.7128,
///     longitude: -74.0060,
///     formatted_address: "New York, NY".to_string(),
/// };
///
/// let user = update_profile(&pool, user_id, me, Some(home)).await?;
/// assert!(user.location.is_some());
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use crate::db::pagination::{Page, Pagination};
use crate::db::repo::{self, select_by_id, select_many, Entity, QueryParam};
use crate::db::transaction::run_in_transaction;
use crate::error::{CoreError, CoreResult};
use crate::models::user::{User, UserRelation, UserRole};
use crate::models::user_location::UserLocation;
use crate::services::moderation::ModerationAction;

/// Profile data carried by an identity-provider event
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExternalUser {
    pub external_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,

    /// Epoch milliseconds as a string; empty means unknown
    pub birthday: Option<String>,
}

/// Parses an epoch-milliseconds birthday
pub fn parse_birthday(raw: &str) -> CoreResult<Option<DateTime<Utc>>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let millis = raw
        .parse::<i64>()
        .map_err(|_| CoreError::Validation(format!("invalid birthday '{}'", raw)))?;

    Utc.timestamp_millis_opt(millis)
        .single()
        .map(Some)
        .ok_or_else(|| CoreError::Validation(format!("birthday out of range: {}", millis)))
}

impl ExternalUser {
    /// A new local user with the `user` role
    pub fn to_user(&self) -> CoreResult<User> {
        if self.external_id.trim().is_empty() {
            return Err(CoreError::Validation("external id must not be empty".to_string()));
        }

        let mut user = User::new(self.external_id.clone());
        user.first_name = self.first_name.clone();
        user.last_name = self.last_name.clone();
        user.email = self.email.clone().filter(|e| !e.is_empty());
        user.phone_number = self.phone_number.clone().filter(|p| !p.is_empty());
        user.date_of_birth = match &self.birthday {
            Some(raw) => parse_birthday(raw)?,
            None => None,
        };
        user.role = UserRole::User;
        Ok(user)
    }
}

/// Persists a user for a `user.created` event
///
/// Redelivered events find the existing row and return it unchanged.
pub async fn create_user_from_event(conn: &mut PgConnection, profile: &ExternalUser) -> CoreResult<User> {
    if let Some(existing) = User::find_by_external_id(conn, &profile.external_id).await? {
        debug!(user_id = %existing.id, external_id = %existing.external_id, "User already exists");
        return Ok(existing);
    }

    let user = repo::create(conn, &profile.to_user()?).await?;
    info!(user_id = %user.id, external_id = %user.external_id, "User created from identity event");
    Ok(user)
}

/// One user with its location, selected under the `user` alias
pub async fn get_user_by_id(conn: &mut PgConnection, user_id: Uuid) -> CoreResult<User> {
    let param = QueryParam::new()
        .with_relations([UserRelation::Location])
        .with_alias(User::ALIAS);
    select_by_id(conn, user_id, &param).await
}

pub async fn get_user_by_external_id(conn: &mut PgConnection, external_id: &str) -> CoreResult<User> {
    User::find_by_external_id(conn, external_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("user with external id {}", external_id)))
}

/// Every user, paginated and sorted (default `created_at DESC`)
pub async fn fetch_users_for_admin(conn: &mut PgConnection, pagination: Pagination) -> CoreResult<Page<User>> {
    let param = QueryParam::<UserRelation>::new()
        .paginate(pagination.clone())
        .sorted();
    let (users, count) = select_many::<User>(conn, &param).await?;
    Ok(Page::new(users, count, &pagination))
}

/// Blocks or unblocks a user; the returned user carries the new flag
pub async fn apply_action_to_user(
    conn: &mut PgConnection,
    user_id: Uuid,
    action: ModerationAction,
) -> CoreResult<User> {
    let mut user: User = select_by_id(conn, user_id, &QueryParam::new()).await?;
    user.blocked = action.blocked();

    let updated = repo::update(conn, &user).await?;
    info!(user_id = %user_id, action = %action, "Moderation action applied to user");
    Ok(updated)
}

/// Self-service profile fields
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateMeInput {
    #[validate(length(max = 255))]
    pub first_name: String,

    #[validate(length(max = 255))]
    pub last_name: String,

    #[validate(length(min = 1, max = 32, message = "Phone number must be 1-32 characters"))]
    pub phone_number: Option<String>,

    #[serde(default)]
    pub receive_sms_notification: bool,
}

/// A home location
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LocationInput {
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    #[serde(default)]
    pub formatted_address: String,
}

/// Updates the caller's own profile fields
pub async fn update_me(conn: &mut PgConnection, user_id: Uuid, input: UpdateMeInput) -> CoreResult<User> {
    input.validate()?;

    let mut user: User = select_by_id(conn, user_id, &QueryParam::new()).await?;
    user.first_name = input.first_name;
    user.last_name = input.last_name;
    user.phone_number = input.phone_number;
    user.receive_sms_notification = input.receive_sms_notification;

    let updated = repo::update(conn, &user).await?;
    info!(user_id = %user_id, "Profile updated");
    Ok(updated)
}

/// Creates the user's location, or moves the existing one
pub async fn upsert_user_location(
    conn: &mut PgConnection,
    user_id: Uuid,
    input: LocationInput,
) -> CoreResult<UserLocation> {
    input.validate()?;

    let location = match UserLocation::find_by_user_id(conn, user_id).await? {
        None => {
            let location = UserLocation::new(user_id, input.latitude, input.longitude, input.formatted_address);
            repo::create(conn, &location).await?
        }
        Some(mut existing) => {
            existing.set_coordinates(input.latitude, input.longitude);
            existing.formatted_address = input.formatted_address;
            repo::update(conn, &existing).await?
        }
    };

    debug!(user_id = %user_id, location_id = %location.id, "User location saved");
    Ok(location)
}

/// [`update_me`] and [`upsert_user_location`] in one transaction
pub async fn update_profile(
    pool: &PgPool,
    user_id: Uuid,
    me: UpdateMeInput,
    location: Option<LocationInput>,
) -> CoreResult<User> {
    run_in_transaction(pool, move |conn| {
        Box::pin(async move {
            let mut user = update_me(conn, user_id, me).await?;
            user.location = match location {
                Some(input) => Some(upsert_user_location(conn, user_id, input).await?),
                None => UserLocation::find_by_user_id(conn, user_id).await?,
            };
            Ok(user)
        })
    })
    .await
}
