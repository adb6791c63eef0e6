/// Domain services
///
/// Each function takes `&mut PgConnection`, so callers decide whether it runs
/// on a pooled connection or inside a transaction. Workflows that must be
/// atomic also have a variant taking the pool.

pub mod categories;
pub mod media;
pub mod moderation;
pub mod nearby;
pub mod skills;
pub mod tasks;
pub mod users;
