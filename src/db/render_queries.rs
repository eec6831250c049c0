use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;

use crate::models::render::{HeygenRenderTask, RenderStatus};

fn task_from_row(row: &PgRow) -> Result<HeygenRenderTask, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status =
        RenderStatus::from_str(&status_str).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(HeygenRenderTask {
        task_id: row.try_get("task_id")?,
        heygen_video_id: row.try_get("heygen_video_id")?,
        status,
        video_url: row.try_get("video_url")?,
        thumbnail_url: row.try_get("thumbnail_url")?,
        video_path: row.try_get("video_path")?,
        thumbnail_path: row.try_get("thumbnail_path")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        last_updated_at: row.try_get("last_updated_at")?,
    })
}

/// Get the render task of a job
pub async fn get_task(pool: &PgPool, task_id: i64) -> Result<Option<HeygenRenderTask>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT task_id, heygen_video_id, status, video_url, thumbnail_url,
               video_path, thumbnail_path, error, created_at, last_updated_at
        FROM heygen_render_tasks
        WHERE task_id = $1
        "#,
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(task_from_row).transpose()
}

/// Insert a freshly submitted render task
pub async fn insert_task(pool: &PgPool, task: &HeygenRenderTask) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO heygen_render_tasks
            (task_id, heygen_video_id, status, created_at, last_updated_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(task.task_id)
    .bind(&task.heygen_video_id)
    .bind(task.status.as_str())
    .bind(task.created_at)
    .bind(task.last_updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Start over on a render that failed: new external id, fresh status, no
/// outputs. Rows in any other status are left alone.
pub async fn replace_failed_task(
    pool: &PgPool,
    task: &HeygenRenderTask,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE heygen_render_tasks
        SET heygen_video_id = $2,
            status = $3,
            video_url = NULL,
            thumbnail_url = NULL,
            video_path = NULL,
            thumbnail_path = NULL,
            error = NULL,
            created_at = $4,
            last_updated_at = $5
        WHERE task_id = $1
          AND status IN ('error', 'aborted', 'timeout')
        "#,
    )
    .bind(task.task_id)
    .bind(&task.heygen_video_id)
    .bind(task.status.as_str())
    .bind(task.created_at)
    .bind(task.last_updated_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Persist a status change and whatever came with it.
///
/// A terminal status in the table is never replaced; url and path columns keep
/// their value when the new one is null.
pub async fn update_task_status(
    pool: &PgPool,
    task: &HeygenRenderTask,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE heygen_render_tasks
        SET status = CASE
                WHEN status IN ('completed', 'error', 'aborted', 'timeout') THEN status
                ELSE $2
            END,
            video_url = COALESCE($3, video_url),
            thumbnail_url = COALESCE($4, thumbnail_url),
            video_path = COALESCE($5, video_path),
            thumbnail_path = COALESCE($6, thumbnail_path),
            error = COALESCE($7, error),
            last_updated_at = NOW()
        WHERE task_id = $1
        "#,
    )
    .bind(task.task_id)
    .bind(task.status.as_str())
    .bind(&task.video_url)
    .bind(&task.thumbnail_url)
    .bind(&task.video_path)
    .bind(&task.thumbnail_path)
    .bind(&task.error)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Fill local file paths without touching the status
pub async fn set_task_paths(
    pool: &PgPool,
    task_id: i64,
    video_path: Option<&str>,
    thumbnail_path: Option<&str>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE heygen_render_tasks
        SET video_path = COALESCE($2, video_path),
            thumbnail_path = COALESCE($3, thumbnail_path),
            last_updated_at = NOW()
        WHERE task_id = $1
        "#,
    )
    .bind(task_id)
    .bind(video_path)
    .bind(thumbnail_path)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
