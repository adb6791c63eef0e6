/// Integration tests for users, authentication, and user-event ingestion
///
/// Run with: cargo test --test user_service_tests

mod common;

use chrono::Utc;
use civictask_shared::auth::identity::{authenticate, StaticVerifier, VerifiedIdentity};
use civictask_shared::auth::webhook::{ingest_user_event, IngestOutcome, SvixVerifier, WebhookHeaders};
use civictask_shared::db::pagination::Pagination;
use civictask_shared::db::transaction::run_isolated;
use civictask_shared::error::CoreError;
use civictask_shared::services::moderation::ModerationAction;
use civictask_shared::services::users::{
    apply_action_to_user, create_user_from_event, fetch_users_for_admin, get_user_by_external_id,
    get_user_by_id, update_profile, upsert_user_location, ExternalUser, LocationInput, UpdateMeInput,
};
use uuid::Uuid;

const WEBHOOK_SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";

fn external_user() -> ExternalUser {
    ExternalUser {
        external_id: format!("user_{}", Uuid::new_v4().simple()),
        first_name: "Grace".to_string(),
        last_name: "Hopper".to_string(),
        email: Some(format!("{}@example.com", Uuid::new_v4().simple())),
        phone_number: None,
        birthday: Some("946684800000".to_string()),
    }
}

#[tokio::test]
async fn test_create_user_from_event_is_idempotent() {
    let Some(pool) = common::test_pool().await else { return };

    run_isolated(&pool, |conn| {
        Box::pin(async move {
            let profile = external_user();
            let first = create_user_from_event(conn, &profile).await?;
            let again = create_user_from_event(conn, &profile).await?;
            assert_eq!(first.id, again.id);
            assert_eq!(first.date_of_birth.map(|d| d.timestamp()), Some(946_684_800));

            let by_external = get_user_by_external_id(conn, &profile.external_id).await?;
            assert_eq!(by_external.id, first.id);

            let missing = get_user_by_external_id(conn, "user_missing").await;
            assert!(matches!(missing, Err(CoreError::NotFound(_))));
            Ok(())
        })
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_location_upsert_and_lookup() {
    let Some(pool) = common::test_pool().await else { return };

    run_isolated(&pool, |conn| {
        Box::pin(async move {
            let user = common::insert_user(conn, "Mover").await?;

            let home = LocationInput {
                latitude: 40.7128,
                longitude: -74.0060,
                formatted_address: "New York, NY".to_string(),
            };
            let created = upsert_user_location(conn, user.id, home).await?;

            let moved = LocationInput {
                latitude: 34.0522,
                longitude: -118.2437,
                formatted_address: "Los Angeles, CA".to_string(),
            };
            let updated = upsert_user_location(conn, user.id, moved).await?;
            assert_eq!(updated.id, created.id);

            let loaded = get_user_by_id(conn, user.id).await?;
            let location = loaded.location.expect("location should be loaded");
            assert_eq!(location.formatted_address, "Los Angeles, CA");
            assert_eq!(location.latitude, 34.0522);

            let missing = get_user_by_id(conn, Uuid::new_v4()).await;
            assert!(matches!(missing, Err(CoreError::NotFound(_))));
            Ok(())
        })
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_update_profile_commits_both_parts() {
    let Some(pool) = common::test_pool().await else { return };

    let mut conn = pool.acquire().await.unwrap();
    let user = common::insert_user(&mut conn, "Before").await.unwrap();

    let me = UpdateMeInput {
        first_name: "After".to_string(),
        last_name: "Update".to_string(),
        phone_number: Some(format!("+1666{}", &Uuid::new_v4().simple().to_string()[..7])),
        receive_sms_notification: true,
    };
    let home = LocationInput {
        latitude: 51.5074,
        longitude: -0.1278,
        formatted_address: "London".to_string(),
    };

    let updated = update_profile(&pool, user.id, me, Some(home)).await.unwrap();
    assert_eq!(updated.first_name, "After");
    assert!(updated.receive_sms_notification);
    assert_eq!(updated.location.as_ref().map(|l| l.formatted_address.as_str()), Some("London"));

    let reloaded = get_user_by_id(&mut conn, user.id).await.unwrap();
    assert_eq!(reloaded.first_name, "After");
    assert!(reloaded.location.is_some());

    // An invalid location rolls back the profile change as well
    let me = UpdateMeInput {
        first_name: "Rolled".to_string(),
        ..Default::default()
    };
    let bad = LocationInput {
        latitude: 123.0,
        longitude: 0.0,
        formatted_address: String::new(),
    };
    let err = update_profile(&pool, user.id, me, Some(bad)).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert_eq!(get_user_by_id(&mut conn, user.id).await.unwrap().first_name, "After");

    drop(conn);
    common::cleanup(&pool, &[user.id], &[]).await;
}

#[tokio::test]
async fn test_block_user_and_authenticate() {
    let Some(pool) = common::test_pool().await else { return };

    run_isolated(&pool, |conn| {
        Box::pin(async move {
            let user = common::insert_user(conn, "Caller").await?;
            let verifier = StaticVerifier::new()
                .with_token("good-token", VerifiedIdentity::new(user.external_id.clone()))
                .with_token("orphan-token", VerifiedIdentity::new("user_nobody"));

            let caller = authenticate(conn, &verifier, "Bearer good-token").await?;
            assert_eq!(caller.id, user.id);

            let orphan = authenticate(conn, &verifier, "Bearer orphan-token").await;
            assert!(matches!(orphan, Err(CoreError::Authentication(_))));

            let unknown = authenticate(conn, &verifier, "Bearer nope").await;
            assert!(matches!(unknown, Err(CoreError::Authentication(_))));

            let blocked = apply_action_to_user(conn, user.id, ModerationAction::Block).await?;
            assert!(blocked.blocked);

            let denied = authenticate(conn, &verifier, "Bearer good-token").await;
            assert!(matches!(denied, Err(CoreError::Authorization(_))));

            let unblocked = apply_action_to_user(conn, user.id, ModerationAction::Unblock).await?;
            assert!(!unblocked.blocked);
            assert!(authenticate(conn, &verifier, "Bearer good-token").await.is_ok());
            Ok(())
        })
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_admin_user_listing_is_paginated() {
    let Some(pool) = common::test_pool().await else { return };

    run_isolated(&pool, |conn| {
        Box::pin(async move {
            for i in 0..3 {
                common::insert_user(conn, &format!("Listed {}", i)).await?;
            }

            let page = fetch_users_for_admin(conn, Pagination::new(1, 2)).await?;
            assert!(page.count >= 3);
            assert_eq!(page.records.len(), 2);
            assert!(page.records[0].created_at >= page.records[1].created_at);
            Ok(())
        })
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_ingest_signed_user_event() {
    let Some(pool) = common::test_pool().await else { return };

    run_isolated(&pool, |conn| {
        Box::pin(async move {
            let external_id = format!("user_{}", Uuid::new_v4().simple());
            let body = serde_json::json!({
                "type": "user.created",
                "object": "event",
                "timestamp": 1_700_000_000_000i64,
                "data": {
                    "id": external_id,
                    "first_name": "Ada",
                    "last_name": "Lovelace",
                    "email_addresses": [
                        {"id": "idn_1", "email_address": format!("{}@example.com", external_id)}
                    ],
                    "primary_email_address_id": "idn_1",
                    "phone_numbers": [],
                    "birthday": ""
                }
            })
            .to_string();

            let verifier = SvixVerifier::new(WEBHOOK_SECRET)?;
            let now = Utc::now().timestamp();
            let headers = WebhookHeaders {
                id: "msg_test".to_string(),
                timestamp: now.to_string(),
                signature: verifier.sign("msg_test", now, body.as_bytes())?,
            };

            let outcome = ingest_user_event(conn, &verifier, &headers, body.as_bytes()).await?;
            let user = match outcome {
                IngestOutcome::Created(user) => user,
                other => panic!("expected a created user, got {:?}", other),
            };
            assert_eq!(user.external_id, external_id);
            assert_eq!(user.first_name, "Ada");
            assert_eq!(user.date_of_birth, None);

            // Other event types are acknowledged without changes
            let deleted = r#"{"type":"user.deleted","data":{"id":"user_x"}}"#;
            let headers = WebhookHeaders {
                signature: verifier.sign("msg_test", now, deleted.as_bytes())?,
                ..headers
            };
            let outcome = ingest_user_event(conn, &verifier, &headers, deleted.as_bytes()).await?;
            assert!(matches!(outcome, IngestOutcome::Ignored(ref t) if t == "user.deleted"));

            // A forged delivery is rejected before anything is parsed
            let forged = WebhookHeaders {
                signature: "v1,Zm9yZ2Vk".to_string(),
                ..headers
            };
            let err = ingest_user_event(conn, &verifier, &forged, deleted.as_bytes())
                .await
                .unwrap_err();
            assert!(matches!(err, CoreError::Authentication(_)));
            Ok(())
        })
    })
    .await
    .unwrap();
}
