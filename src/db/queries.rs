use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, PathField, VideoPathsRecord};

const RECORD_COLUMNS: &str = r#"
    job_id, audio_path, welcome_audio_path, intro_video_path, bumper_video_path,
    short_video_path, main_video_path, outro_video_path, welcome_video_avatar_path,
    hygen_short_video, final_video_path, video_config, theme, profile, status,
    retry_count, error_details, lease_owner, lease_expires_at, created_at, updated_at
"#;

fn record_from_row(row: &PgRow) -> Result<VideoPathsRecord, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status =
        JobStatus::from_str(&status_str).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(VideoPathsRecord {
        job_id: row.try_get("job_id")?,
        audio_path: row.try_get("audio_path")?,
        welcome_audio_path: row.try_get("welcome_audio_path")?,
        intro_video_path: row.try_get("intro_video_path")?,
        bumper_video_path: row.try_get("bumper_video_path")?,
        short_video_path: row.try_get("short_video_path")?,
        main_video_path: row.try_get("main_video_path")?,
        outro_video_path: row.try_get("outro_video_path")?,
        welcome_video_avatar_path: row.try_get("welcome_video_avatar_path")?,
        hygen_short_video: row.try_get("hygen_short_video")?,
        final_video_path: row.try_get("final_video_path")?,
        video_config: row.try_get("video_config")?,
        theme: row.try_get("theme")?,
        profile: row.try_get("profile")?,
        status,
        retry_count: row.try_get("retry_count")?,
        error_details: row.try_get("error_details")?,
        lease_owner: row.try_get("lease_owner")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Get a podcast job by ID
pub async fn get_job(pool: &PgPool, job_id: i64) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, topic, profile_name, customer_id, theme, created_at
        FROM podcast_jobs
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| -> Result<Job, sqlx::Error> {
        Ok(Job {
            job_id: r.try_get("id")?,
            topic: r.try_get("topic")?,
            profile_name: r.try_get("profile_name")?,
            customer_id: r.try_get("customer_id")?,
            theme: r.try_get("theme")?,
            created_at: r.try_get("created_at")?,
        })
    })
    .transpose()
}

/// Create the video record for a job, keeping an existing one untouched
pub async fn create_record(
    pool: &PgPool,
    job_id: i64,
    video_config: &serde_json::Value,
    theme: Option<&str>,
    profile: Option<&str>,
) -> Result<VideoPathsRecord, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO video_paths (job_id, video_config, theme, profile)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (job_id) DO NOTHING
        "#,
    )
    .bind(job_id)
    .bind(video_config)
    .bind(theme)
    .bind(profile)
    .execute(pool)
    .await?;

    get_record(pool, job_id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

/// Get the video record of a job
pub async fn get_record(
    pool: &PgPool,
    job_id: i64,
) -> Result<Option<VideoPathsRecord>, sqlx::Error> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM video_paths WHERE job_id = $1");
    let row = sqlx::query(&sql)
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Set one path column, creating the record if it does not exist yet
pub async fn upsert_path(
    pool: &PgPool,
    job_id: i64,
    field: PathField,
    value: &str,
) -> Result<(), sqlx::Error> {
    let column = field.column();
    let sql = format!(
        r#"
        INSERT INTO video_paths (job_id, {column})
        VALUES ($1, $2)
        ON CONFLICT (job_id) DO UPDATE
        SET {column} = EXCLUDED.{column},
            updated_at = NOW()
        "#
    );

    sqlx::query(&sql)
        .bind(job_id)
        .bind(value)
        .execute(pool)
        .await?;

    Ok(())
}

/// Replace the stored video configuration
pub async fn set_config(
    pool: &PgPool,
    job_id: i64,
    video_config: &serde_json::Value,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE video_paths
        SET video_config = $1, updated_at = NOW()
        WHERE job_id = $2
        "#,
    )
    .bind(video_config)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Update record status and error details together
pub async fn set_status(
    pool: &PgPool,
    job_id: i64,
    status: JobStatus,
    error: Option<&str>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE video_paths
        SET status = $1,
            error_details = $2,
            updated_at = NOW()
        WHERE job_id = $3
        "#,
    )
    .bind(status.as_str())
    .bind(error)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Record the assembled video and mark the job completed, if `owner` still
/// holds the lease
pub async fn set_final_path(
    pool: &PgPool,
    job_id: i64,
    owner: Uuid,
    path: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE video_paths
        SET final_video_path = $1,
            status = 'completed',
            error_details = NULL,
            lease_owner = NULL,
            lease_expires_at = NULL,
            updated_at = NOW()
        WHERE job_id = $2
          AND lease_owner = $3
        "#,
    )
    .bind(path)
    .bind(job_id)
    .bind(owner)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Records the sweeper should look at, oldest first
pub async fn list_needing_processing(
    pool: &PgPool,
    max_retries: i32,
    limit: i64,
) -> Result<Vec<VideoPathsRecord>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT {RECORD_COLUMNS}
        FROM video_paths
        WHERE (status = 'pending' OR (final_video_path IS NULL AND status <> 'completed'))
          AND retry_count < $1
          AND (lease_owner IS NULL OR lease_expires_at < NOW())
        ORDER BY created_at ASC
        LIMIT $2
        "#
    );

    let rows = sqlx::query(&sql)
        .bind(max_retries)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.iter().map(record_from_row).collect()
}

/// Take a lease on a job. Returns false when someone else holds a live one.
pub async fn claim(
    pool: &PgPool,
    job_id: i64,
    owner: Uuid,
    lease: Duration,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE video_paths
        SET status = 'processing',
            lease_owner = $2,
            lease_expires_at = NOW() + make_interval(secs => $3),
            updated_at = NOW()
        WHERE job_id = $1
          AND status <> 'completed'
          AND (lease_owner IS NULL OR lease_expires_at < NOW())
        "#,
    )
    .bind(job_id)
    .bind(owner)
    .bind(lease.as_secs_f64())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Drop a lease held by `owner` and put the record back to `status`
pub async fn release(
    pool: &PgPool,
    job_id: i64,
    owner: Uuid,
    status: JobStatus,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE video_paths
        SET status = $1,
            lease_owner = NULL,
            lease_expires_at = NULL,
            updated_at = NOW()
        WHERE job_id = $2 AND lease_owner = $3
        "#,
    )
    .bind(status.as_str())
    .bind(job_id)
    .bind(owner)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Count a failed attempt: retry increment, status and error in one statement.
/// `None` when `owner` no longer holds the lease.
pub async fn mark_failed(
    pool: &PgPool,
    job_id: i64,
    owner: Uuid,
    error: &str,
) -> Result<Option<i32>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE video_paths
        SET retry_count = retry_count + 1,
            status = 'failed',
            error_details = $1,
            lease_owner = NULL,
            lease_expires_at = NULL,
            updated_at = NOW()
        WHERE job_id = $2
          AND lease_owner = $3
        RETURNING retry_count
        "#,
    )
    .bind(error)
    .bind(job_id)
    .bind(owner)
    .fetch_optional(pool)
    .await?;

    row.map(|row| row.try_get("retry_count")).transpose()
}
