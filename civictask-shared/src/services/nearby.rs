/// Nearby-user notification
///
/// When a task is posted, users whose home location lies within a radius of
/// it can be told by SMS. Only users who opted in, are not blocked, are not
/// the task owner, and have a phone number are messaged. Delivery is best
/// effort.
///
/// # Example
///
/// ```no_run
/// use civictask_shared::notifications::MemorySmsSender;
/// use civictask_shared::services::nearby::notify_nearby_users;
/// # async fn example(conn: &mut sqlx::PgConnection, task: civictask_shared::models::task::Task) -> civictask_shared::error::CoreResult<()> {
/// let sms = MemorySmsSender::new();
/// let sent = notify_nearby_users(conn, &sms, &task, 10.0).await?;
/// println!("notified {} neighbours", sent);
/// # Ok(())
/// # }
/// ```

use sqlx::PgConnection;
use tracing::info;

use crate::db::query::{Fragment, SelectQuery};
use crate::db::repo::{Entity, Relatable};
use crate::error::CoreResult;
use crate::models::task::Task;
use crate::models::user::User;
use crate::models::user_location::{UserLocation, UserLocationRelation};
use crate::notifications::{notify_best_effort, SmsSender};

/// User locations within `distance_km` of a point, with their users
pub async fn fetch_nearby_user_locations(
    conn: &mut PgConnection,
    latitude: f64,
    longitude: f64,
    distance_km: f64,
) -> CoreResult<Vec<UserLocation>> {
    let mut query = SelectQuery::new(UserLocation::TABLE, UserLocation::ALIAS);
    let location = query.qualified("location");
    query.filter(
        Fragment::new("ST_DWithin(ST_SetSRID(ST_MakePoint(")
            .bind(longitude)
            .sql(", ")
            .bind(latitude)
            .sql(format!("), 4326)::geography, {}::geography, ", location))
            .bind(distance_km * 1000.0)
            .sql(")"),
    );

    let mut locations: Vec<UserLocation> = query.fetch_all(conn).await?;
    UserLocation::load_relations(conn, &mut locations, &[UserLocationRelation::User]).await?;
    Ok(locations)
}

/// Phone number of `user` if they should hear about `task`
fn sms_recipient<'a>(user: &'a User, task: &Task) -> Option<&'a str> {
    if !user.receive_sms_notification || user.blocked || user.id == task.user_id {
        return None;
    }
    user.phone_number
        .as_deref()
        .map(str::trim)
        .filter(|phone| !phone.is_empty())
}

fn task_message(task: &Task) -> String {
    if task.formatted_address.is_empty() {
        format!("New volunteer task near you: {}", task.title)
    } else {
        format!(
            "New volunteer task near you: {} ({})",
            task.title, task.formatted_address
        )
    }
}

/// Texts eligible users near `task`; returns how many messages went out
pub async fn notify_nearby_users(
    conn: &mut PgConnection,
    sms: &dyn SmsSender,
    task: &Task,
    distance_km: f64,
) -> CoreResult<usize> {
    let locations = fetch_nearby_user_locations(conn, task.latitude, task.longitude, distance_km).await?;
    let message = task_message(task);

    let mut sent = 0;
    for location in &locations {
        let Some(user) = location.user.as_deref() else {
            continue;
        };
        if let Some(phone) = sms_recipient(user, task) {
            if notify_best_effort(sms, phone, &message).await {
                sent += 1;
            }
        }
    }

    info!(
        task_id = %task.id,
        candidates = locations.len(),
        sent,
        "Nearby users notified"
    );
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn opted_in(phone: &str) -> User {
        let mut user = User::new("user_ext");
        user.phone_number = Some(phone.to_string());
        user.receive_sms_notification = true;
        user
    }

    #[test]
    fn test_sms_recipient_rules() {
        let task = Task::new("Walk dogs", Uuid::new_v4(), Uuid::new_v4());

        let user = opted_in("+15551234567");
        assert_eq!(sms_recipient(&user, &task), Some("+15551234567"));

        let mut blocked = opted_in("+15551234567");
        blocked.blocked = true;
        assert_eq!(sms_recipient(&blocked, &task), None);

        let mut silent = opted_in("+15551234567");
        silent.receive_sms_notification = false;
        assert_eq!(sms_recipient(&silent, &task), None);

        assert_eq!(sms_recipient(&opted_in("  "), &task), None);

        let owner = opted_in("+15551234567");
        let own_task = Task::new("Walk dogs", owner.id, Uuid::new_v4());
        assert_eq!(sms_recipient(&owner, &own_task), None);
    }

    #[test]
    fn test_task_message() {
        let mut task = Task::new("Walk dogs", Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(task_message(&task), "New volunteer task near you: Walk dogs");

        task.formatted_address = "Central Park".to_string();
        assert_eq!(
            task_message(&task),
            "New volunteer task near you: Walk dogs (Central Park)"
        );
    }
}
