use podcast_video_pipeline::{
    config::AppConfig,
    db::{
        self,
        store::{JobStore, PgStore, RenderTaskStore},
    },
    models::{
        job::{JobStatus, PathField},
        render::{HeygenRenderTask, RenderStatus},
    },
};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

async fn connect() -> PgPool {
    let config = AppConfig::from_env().expect("Failed to load config");
    let pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

async fn insert_job(pool: &PgPool) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO podcast_jobs (topic, profile_name, customer_id) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind("Integration topic")
    .bind("weekly")
    .bind(format!("it-{}", Uuid::new_v4()))
    .fetch_one(pool)
    .await
    .expect("Failed to insert job")
}

/// Video record lifecycle against a real database: field upserts, claim
/// and lease, failure accounting and completion.
///
/// Note: requires a running PostgreSQL configured via `DATABASE_URL`.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_record_lifecycle() {
    let pool = connect().await;
    let store = PgStore::new(pool.clone());
    let job_id = insert_job(&pool).await;

    let config = serde_json::json!({ "main_video": true });
    let record = store
        .create_record(job_id, &config, Some("dark"), Some("weekly"))
        .await
        .expect("create record");
    assert_eq!(record.status, JobStatus::Pending);

    // second create keeps the existing row
    let again = store
        .create_record(job_id, &serde_json::json!({}), None, None)
        .await
        .unwrap();
    assert_eq!(again.video_config, config);

    store
        .upsert_path(job_id, PathField::AudioPath, "/out/audio.wav")
        .await
        .unwrap();
    store
        .upsert_path(job_id, PathField::MainVideoPath, "/out/main.mp4")
        .await
        .unwrap();
    let record = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(record.audio_path.as_deref(), Some("/out/audio.wav"));
    assert_eq!(record.main_video_path.as_deref(), Some("/out/main.mp4"));

    let owner = Uuid::new_v4();
    assert!(store.claim(job_id, owner, Duration::from_secs(60)).await.unwrap());
    assert!(!store
        .claim(job_id, Uuid::new_v4(), Duration::from_secs(60))
        .await
        .unwrap());

    // a stale owner cannot record an outcome
    let stranger = Uuid::new_v4();
    assert_eq!(
        store.mark_failed(job_id, stranger, "late").await.unwrap(),
        None
    );
    assert!(!store
        .set_final_path(job_id, stranger, "/out/stale.mp4")
        .await
        .unwrap());

    let retries = store.mark_failed(job_id, owner, "encode failed").await.unwrap();
    assert_eq!(retries, Some(1));
    let record = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.lease_owner.is_none());

    let selectable = store.list_needing_processing(3, 1000).await.unwrap();
    assert!(selectable.iter().any(|r| r.job_id == job_id));

    let owner = Uuid::new_v4();
    assert!(store.claim(job_id, owner, Duration::from_secs(60)).await.unwrap());
    assert!(store
        .set_final_path(job_id, owner, "/out/final.mp4")
        .await
        .unwrap());
    let record = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert!(record.error_details.is_none());

    let selectable = store.list_needing_processing(3, 1000).await.unwrap();
    assert!(!selectable.iter().any(|r| r.job_id == job_id));
}

#[tokio::test]
#[ignore]
async fn test_terminal_render_status_is_kept() {
    let pool = connect().await;
    let store = PgStore::new(pool.clone());
    let job_id = insert_job(&pool).await;
    store
        .create_record(job_id, &serde_json::json!({}), None, None)
        .await
        .unwrap();

    let mut task = HeygenRenderTask::submitted(job_id, "vid_it".to_string(), chrono::Utc::now());
    store.insert_task(&task).await.unwrap();
    assert!(store.insert_task(&task).await.is_err());

    task.status = RenderStatus::Completed;
    task.video_url = Some("https://cdn.example.com/v.mp4".to_string());
    store.update_task_status(&task).await.unwrap();

    task.status = RenderStatus::Processing;
    store.update_task_status(&task).await.unwrap();

    let stored = store.get_task(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RenderStatus::Completed);
    assert_eq!(stored.video_url.as_deref(), Some("https://cdn.example.com/v.mp4"));
}
