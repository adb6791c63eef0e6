/// Database models
///
/// Each model is a `sqlx::FromRow` struct that implements
/// [`Entity`](crate::db::repo::Entity) and
/// [`Relatable`](crate::db::repo::Relatable). Relation fields are not columns;
/// they stay empty until requested through a `QueryParam`.
///
/// # Models
///
/// - `user`: accounts synced from the identity provider
/// - `user_location`: one saved location per user
/// - `category`: task categories
/// - `task`: geotagged volunteering tasks
/// - `task_media`: uploaded images attached to a task
/// - `user_task`: a user's subscription to a task
///
/// # Example
///
/// ```no_run
/// use civictask_shared::db::repo::{select_by_id, QueryParam};
/// use civictask_shared::models::task::{Task, TaskRelation};
/// # async fn example(conn: &mut sqlx::PgConnection, id: uuid::Uuid) -> civictask_shared::error::CoreResult<()> {
/// let param = QueryParam::new()
///     .with_relations([TaskRelation::User, TaskRelation::Media])
///     .with_alias("task");
/// let task: Task = select_by_id(conn, id, &param).await?;
/// println!("{} has {} images", task.title, task.media.len());
/// # Ok(())
/// # }
/// ```

use std::collections::HashMap;

use uuid::Uuid;

pub mod category;
pub mod task;
pub mod task_media;
pub mod user;
pub mod user_location;
pub mod user_task;

/// Indexes rows by a key, keeping the last row per key
pub(crate) fn index_by<T>(rows: Vec<T>, key: impl Fn(&T) -> Uuid) -> HashMap<Uuid, T> {
    rows.into_iter().map(|row| (key(&row), row)).collect()
}

/// Groups rows by a key, preserving row order within each group
pub(crate) fn group_by<T>(rows: Vec<T>, key: impl Fn(&T) -> Uuid) -> HashMap<Uuid, Vec<T>> {
    let mut groups: HashMap<Uuid, Vec<T>> = HashMap::new();
    for row in rows {
        groups.entry(key(&row)).or_default().push(row);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_by_preserves_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let rows = vec![(a, 1), (b, 2), (a, 3)];

        let groups = group_by(rows, |row| row.0);
        assert_eq!(groups[&a], vec![(a, 1), (a, 3)]);
        assert_eq!(groups[&b], vec![(b, 2)]);
    }

    #[test]
    fn test_index_by() {
        let a = Uuid::new_v4();
        let index = index_by(vec![(a, "first"), (a, "second")], |row| row.0);
        assert_eq!(index.len(), 1);
        assert_eq!(index[&a].1, "second");
    }
}
