/// Category lookups

use sqlx::PgConnection;
use tracing::info;

use crate::db::repo::{self, select_all, QueryParam};
use crate::error::{CoreError, CoreResult};
use crate::models::category::Category;

/// Categories installed by `civictask-admin seed-categories`
pub const DEFAULT_CATEGORIES: [&str; 8] = [
    "Animal Care",
    "Community Events",
    "Education",
    "Elderly Support",
    "Environment",
    "Food Distribution",
    "Health",
    "Home Repair",
];

/// Every category, sorted by name
pub async fn fetch_categories(conn: &mut PgConnection) -> CoreResult<Vec<Category>> {
    let mut categories: Vec<Category> = select_all(conn, &QueryParam::new()).await?;
    categories.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(categories)
}

fn normalize_name(name: &str) -> CoreResult<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 255 {
        return Err(CoreError::Validation(
            "category name must be 1-255 characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// Creates a category; a duplicate name is a persistence conflict
pub async fn create_category(conn: &mut PgConnection, name: &str) -> CoreResult<Category> {
    let category = repo::create(conn, &Category::new(normalize_name(name)?)).await?;
    info!(category_id = %category.id, name = %category.name, "Category created");
    Ok(category)
}

/// Inserts any of `names` that do not exist yet; returns the new rows
pub async fn seed_categories(conn: &mut PgConnection, names: &[&str]) -> CoreResult<Vec<Category>> {
    let mut created = Vec::new();
    for name in names {
        let inserted = sqlx::query_as::<_, Category>(
            r#"
            INSERT INTO categories (name)
            VALUES ($1)
            ON CONFLICT (name) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(normalize_name(name)?)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| CoreError::persistence("seed categories", e))?;

        created.extend(inserted);
    }

    info!(created = created.len(), requested = names.len(), "Categories seeded");
    Ok(created)
}
