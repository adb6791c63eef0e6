/// Integration tests for the task workflows
///
/// The creation tests commit their own transaction, so their fixtures are
/// committed too and removed at the end. Everything else runs inside a
/// rolled-back transaction.
/// Run with: cargo test --test task_workflow_tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use civictask_shared::db::transaction::{cancellable, run_in_transaction, run_isolated, with_deadline};
use civictask_shared::error::{CoreError, CoreResult};
use civictask_shared::models::user_location::UserLocation;
use civictask_shared::notifications::MemorySmsSender;
use civictask_shared::services::categories::create_category;
use civictask_shared::services::moderation::ModerationAction;
use civictask_shared::services::nearby::{fetch_nearby_user_locations, notify_nearby_users};
use civictask_shared::services::tasks::{
    apply_action_to_task, apply_to_task, create_task_in_transaction, delete_task,
    fetch_subscribers_for_task, fetch_task_by_id, update_task, withdraw_from_task, CreateTaskInput,
    UpdateTaskInput, TASK_RELATIONS,
};
use civictask_shared::storage::{MemoryStorage, ObjectStorage};
use common::NEW_YORK;
use sqlx::PgPool;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const PNG: &str = "data:image/png;base64,iVBORw0KGgo=";
const JPEG: &str = "data:image/jpeg;base64,/9j/4AAQ";

fn create_input(title: &str, category_id: Uuid, media: Vec<&str>) -> CreateTaskInput {
    CreateTaskInput {
        title: title.to_string(),
        description: "Bring gloves".to_string(),
        required_volunteers_count: 3,
        required_skills: vec!["cleanup".to_string()],
        latitude: NEW_YORK.0,
        longitude: NEW_YORK.1,
        formatted_address: "New York, NY".to_string(),
        category_id,
        media: media.into_iter().map(str::to_string).collect(),
    }
}

#[tokio::test]
async fn test_create_task_with_media() {
    let Some(pool) = common::test_pool().await else { return };

    let mut conn = pool.acquire().await.unwrap();
    let owner = common::insert_user(&mut conn, "Owner").await.unwrap();
    let category = common::insert_category(&mut conn).await.unwrap();

    let storage = Arc::new(MemoryStorage::new("https://cdn.test"));
    let task = create_task_in_transaction(
        &pool,
        storage.clone() as Arc<dyn ObjectStorage>,
        owner.id,
        create_input("Park cleanup", category.id, vec![PNG, JPEG]),
    )
    .await
    .unwrap();

    assert_eq!(task.user_id, owner.id);
    assert_eq!(task.media.len(), 2);
    assert_eq!(task.media[0].mime_type, "image/png");
    assert!(task.media[0].link.starts_with("https://cdn.test/uploads/images/"));
    assert!(task.media[0].link.ends_with(".png"));
    assert!(task.media[1].link.ends_with(".jpg"));
    assert_eq!(storage.len().await, 2);

    let stored = fetch_task_by_id(&mut conn, task.id, &TASK_RELATIONS).await.unwrap();
    assert_eq!(stored.media.len(), 2);
    assert_eq!(stored.required_skills, vec!["cleanup".to_string()]);
    assert_eq!(stored.user.map(|u| u.id), Some(owner.id));

    drop(conn);
    common::cleanup(&pool, &[owner.id], &[category.id]).await;
}

#[tokio::test]
async fn test_failed_upload_leaves_nothing_behind() {
    let Some(pool) = common::test_pool().await else { return };

    let mut conn = pool.acquire().await.unwrap();
    let owner = common::insert_user(&mut conn, "Owner").await.unwrap();
    let category = common::insert_category(&mut conn).await.unwrap();

    // First upload succeeds, second is refused
    let storage = Arc::new(MemoryStorage::default().failing_after(1));
    let err = create_task_in_transaction(
        &pool,
        storage.clone() as Arc<dyn ObjectStorage>,
        owner.id,
        create_input("Doomed task", category.id, vec![PNG, PNG]),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CoreError::Storage(_)), "unexpected error: {:?}", err);
    assert_eq!(storage.attempts(), 2);

    let (tasks,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE user_id = $1")
        .bind(owner.id)
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    assert_eq!(tasks, 0);

    let (media,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM task_media m LEFT JOIN tasks t ON t.id = m.task_id WHERE t.id IS NULL",
    )
    .fetch_one(&mut *conn)
    .await
    .unwrap();
    assert_eq!(media, 0);

    drop(conn);
    common::cleanup(&pool, &[owner.id], &[category.id]).await;
}

async fn category_count(pool: &PgPool, name: &str) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM categories WHERE name = $1")
        .bind(name)
        .fetch_one(pool)
        .await
        .unwrap();
    count
}

#[tokio::test]
async fn test_cancelled_transaction_commits_nothing() {
    let Some(pool) = common::test_pool().await else { return };

    let name = format!("Cancelled {}", Uuid::new_v4());
    let token = CancellationToken::new();
    let inserted = Arc::new(Notify::new());

    let canceller = {
        let token = token.clone();
        let inserted = inserted.clone();
        tokio::spawn(async move {
            inserted.notified().await;
            token.cancel();
        })
    };

    let work = {
        let name = name.clone();
        run_in_transaction(&pool, move |conn| {
            Box::pin(async move {
                create_category(conn, &name).await?;
                inserted.notify_one();
                futures::future::pending::<CoreResult<()>>().await
            })
        })
    };

    let result = cancellable(&token, work).await;
    assert!(matches!(result, Err(CoreError::Cancelled)));
    canceller.await.unwrap();

    assert_eq!(category_count(&pool, &name).await, 0);
}

#[tokio::test]
async fn test_transaction_past_deadline_commits_nothing() {
    let Some(pool) = common::test_pool().await else { return };

    let name = format!("Late {}", Uuid::new_v4());
    let work = {
        let name = name.clone();
        run_in_transaction(&pool, move |conn| {
            Box::pin(async move {
                create_category(conn, &name).await?;
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
        })
    };

    let result = with_deadline(Duration::from_secs(2), work).await;
    assert!(matches!(result, Err(CoreError::Cancelled)));

    assert_eq!(category_count(&pool, &name).await, 0);
}

#[tokio::test]
async fn test_malformed_media_uploads_nothing() {
    let Some(pool) = common::test_pool().await else { return };

    let mut conn = pool.acquire().await.unwrap();
    let owner = common::insert_user(&mut conn, "Owner").await.unwrap();
    let category = common::insert_category(&mut conn).await.unwrap();

    let storage = Arc::new(MemoryStorage::default());
    let err = create_task_in_transaction(
        &pool,
        storage.clone() as Arc<dyn ObjectStorage>,
        owner.id,
        create_input("Bad media", category.id, vec![PNG, "image/png;base64,AAAA"]),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CoreError::Validation(_)));
    assert_eq!(storage.attempts(), 0);

    drop(conn);
    common::cleanup(&pool, &[owner.id], &[category.id]).await;
}

#[tokio::test]
async fn test_only_owner_may_edit_or_delete() {
    let Some(pool) = common::test_pool().await else { return };

    run_isolated(&pool, |conn| {
        Box::pin(async move {
            let owner = common::insert_user(conn, "Owner").await?;
            let stranger = common::insert_user(conn, "Stranger").await?;
            let category = common::insert_category(conn).await?;
            let task = common::insert_task(conn, &owner, &category, "Paint fence", NEW_YORK).await?;

            let edit = UpdateTaskInput {
                title: "Paint the whole fence".to_string(),
                description: "Two coats".to_string(),
                required_volunteers_count: 4,
                required_skills: vec!["painting".to_string()],
                latitude: 40.7306,
                longitude: -73.9352,
                formatted_address: "Brooklyn, NY".to_string(),
                category_id: category.id,
            };

            let denied = update_task(conn, stranger.id, task.id, edit.clone()).await;
            assert!(matches!(denied, Err(CoreError::Authorization(_))));

            let updated = update_task(conn, owner.id, task.id, edit).await?;
            assert_eq!(updated.title, "Paint the whole fence");
            assert_eq!(updated.latitude, 40.7306);
            assert!(!updated.location.is_empty());
            assert!(updated.updated_at >= task.updated_at);

            let denied = delete_task(conn, stranger.id, task.id).await;
            assert!(matches!(denied, Err(CoreError::Authorization(_))));

            assert!(delete_task(conn, owner.id, task.id).await?);
            let gone = fetch_task_by_id(conn, task.id, &[]).await;
            assert!(matches!(gone, Err(CoreError::NotFound(_))));
            Ok(())
        })
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_apply_then_withdraw() {
    let Some(pool) = common::test_pool().await else { return };

    run_isolated(&pool, |conn| {
        Box::pin(async move {
            let owner = common::insert_user(conn, "Owner").await?;
            let volunteer = common::insert_user(conn, "Volunteer").await?;
            let category = common::insert_category(conn).await?;
            let task = common::insert_task(conn, &owner, &category, "Deliver food", NEW_YORK).await?;

            apply_to_task(conn, task.id, volunteer.id).await?;

            let subscribers = fetch_subscribers_for_task(conn, task.id).await?;
            assert_eq!(subscribers.len(), 1);
            assert_eq!(subscribers[0].user.as_ref().map(|u| u.id), Some(volunteer.id));
            assert_eq!(subscribers[0].task.as_ref().map(|t| t.id), Some(task.id));

            assert_eq!(withdraw_from_task(conn, task.id, volunteer.id).await?, 1);
            assert_eq!(withdraw_from_task(conn, task.id, volunteer.id).await?, 0);

            let (rows,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM user_tasks WHERE user_id = $1 AND task_id = $2")
                    .bind(volunteer.id)
                    .bind(task.id)
                    .fetch_one(&mut *conn)
                    .await?;
            assert_eq!(rows, 0);

            let missing = apply_to_task(conn, Uuid::new_v4(), volunteer.id).await;
            assert!(matches!(missing, Err(CoreError::NotFound(_))));
            Ok(())
        })
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_duplicate_subscription_conflicts() {
    let Some(pool) = common::test_pool().await else { return };

    run_isolated(&pool, |conn| {
        Box::pin(async move {
            let owner = common::insert_user(conn, "Owner").await?;
            let volunteer = common::insert_user(conn, "Volunteer").await?;
            let category = common::insert_category(conn).await?;
            let task = common::insert_task(conn, &owner, &category, "Tutor", NEW_YORK).await?;

            apply_to_task(conn, task.id, volunteer.id).await?;
            let err = apply_to_task(conn, task.id, volunteer.id).await.unwrap_err();
            assert_eq!(err.status_code(), 409);
            Ok(())
        })
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_block_and_unblock_task() {
    let Some(pool) = common::test_pool().await else { return };

    run_isolated(&pool, |conn| {
        Box::pin(async move {
            let owner = common::insert_user(conn, "Owner").await?;
            let category = common::insert_category(conn).await?;
            let task = common::insert_task(conn, &owner, &category, "Shovel snow", NEW_YORK).await?;

            let blocked = apply_action_to_task(conn, task.id, ModerationAction::Block).await?;
            assert!(blocked.blocked);
            assert!(fetch_task_by_id(conn, task.id, &[]).await?.blocked);

            let action = "unblock".parse::<ModerationAction>()?;
            let unblocked = apply_action_to_task(conn, task.id, action).await?;
            assert!(!unblocked.blocked);
            assert!(!fetch_task_by_id(conn, task.id, &[]).await?.blocked);

            assert!(matches!(
                "suspend".parse::<ModerationAction>(),
                Err(CoreError::InvalidAction(_))
            ));
            Ok(())
        })
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_notify_nearby_users() {
    let Some(pool) = common::test_pool().await else { return };

    run_isolated(&pool, |conn| {
        Box::pin(async move {
            let owner = common::insert_user(conn, "Owner").await?;
            let category = common::insert_category(conn).await?;
            let task = common::insert_task(conn, &owner, &category, "Walk dogs", NEW_YORK).await?;

            let phone = format!("+1555{}", &Uuid::new_v4().simple().to_string()[..7]);
            let mut neighbour = common::insert_user(conn, "Neighbour").await?;
            neighbour.phone_number = Some(phone.clone());
            neighbour.receive_sms_notification = true;
            civictask_shared::db::repo::update(conn, &neighbour).await?;

            let far_away = common::insert_user(conn, "Far").await?;

            for (user, (latitude, longitude)) in [
                (&neighbour, (40.7200, -74.0000)),
                (&owner, NEW_YORK),
                (&far_away, (41.1628, -74.0060)),
            ] {
                let location = UserLocation::new(user.id, latitude, longitude, "");
                civictask_shared::db::repo::create(conn, &location).await?;
            }

            let nearby = fetch_nearby_user_locations(conn, NEW_YORK.0, NEW_YORK.1, 10.0).await?;
            let ids: Vec<Uuid> = nearby.iter().map(|l| l.user_id).collect();
            assert!(ids.contains(&neighbour.id));
            assert!(ids.contains(&owner.id));
            assert!(!ids.contains(&far_away.id));
            assert!(nearby.iter().all(|l| l.user.is_some()));

            let sms = MemorySmsSender::new();
            notify_nearby_users(conn, &sms, &task, 10.0).await?;
            let sent = sms.sent().await;
            assert!(sent.iter().any(|m| m.to == phone));
            assert!(sent.iter().all(|m| m.body.contains("Walk dogs")));

            // Provider outages never fail the caller
            let failing = MemorySmsSender::failing();
            let delivered = notify_nearby_users(conn, &failing, &task, 10.0).await?;
            assert_eq!(delivered, 0);
            Ok(())
        })
    })
    .await
    .unwrap();
}
