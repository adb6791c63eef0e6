/// Skill tags
///
/// Skills are not stored on their own; they are the distinct tags found in
/// `tasks.required_skills`.

use sqlx::PgConnection;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Distinct, non-empty skill tags across all tasks, sorted
pub async fn fetch_skills(conn: &mut PgConnection) -> CoreResult<Vec<String>> {
    let skills = sqlx::query_scalar::<_, String>(
        r#"
        SELECT DISTINCT skill
        FROM tasks, unnest(required_skills) AS skill
        WHERE btrim(skill) <> ''
        ORDER BY skill
        "#,
    )
    .fetch_all(conn)
    .await
    .map_err(|e| CoreError::persistence("fetch skills", e))?;

    debug!(count = skills.len(), "Fetched skills");
    Ok(skills)
}
