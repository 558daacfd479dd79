//! Common library for the SecureTouch services
//!
//! This crate provides the infrastructure shared by the services: PostgreSQL
//! connectivity, the Redis client backing the session store, and the error
//! types both of them surface.

pub mod cache;
pub mod database;
pub mod error;

/// Example usage of the infrastructure modules
///
/// ```rust,no_run
/// use common::cache::{RedisConfig, RedisPool};
/// use common::database::{DatabaseConfig, init_pool, health_check};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = init_pool(&DatabaseConfig::from_env()?).await?;
///     println!("Database health check: {}", health_check(&pool).await?);
///
///     let redis = RedisPool::new(&RedisConfig::from_env()?).await?;
///     println!("Redis health check: {}", redis.health_check().await?);
///     Ok(())
/// }
/// ```
pub fn example_usage() {}
