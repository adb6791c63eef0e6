/// Database layer
///
/// # Modules
///
/// - `pool`: connection pool with health checks
/// - `migrations`: embedded sqlx migrations
/// - `geometry`: PostGIS point codec
/// - `query`: replayable select queries
/// - `pagination`: count + slice + sort
/// - `repo`: generic persistence over [`repo::Entity`] types
/// - `transaction`: transactional and rollback-only units of work
///
/// # Example
///
/// ```no_run
/// use civictask_shared::db::pool::{create_pool, DatabaseConfig};
/// use civictask_shared::db::repo::{select_all, QueryParam};
/// use civictask_shared::models::category::Category;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = create_pool(DatabaseConfig::new(std::env::var("DATABASE_URL")?)).await?;
///     let mut conn = pool.acquire().await?;
///
///     let categories: Vec<Category> = select_all(&mut conn, &QueryParam::default()).await?;
///     println!("{} categories", categories.len());
///     Ok(())
/// }
/// ```

pub mod geometry;
pub mod migrations;
pub mod pagination;
pub mod pool;
pub mod query;
pub mod repo;
pub mod transaction;
