//! Database driver capability.
//!
//! The manager only needs one thing from a driver: open a connection given a
//! connection string, with trivial pool bounds. [`Driver`] is that seam;
//! [`PgDriver`] is the production implementation over sqlx, and test suites
//! substitute stub drivers that fail a configured number of times.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Conservative pool bounds for a single-test-process client.
///
/// sqlx pools expose only a max-connections bound; `max_idle` is kept for
/// parity with drivers that distinguish the two, and is never allowed to
/// exceed `max_open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    pub max_open: u32,
    pub max_idle: u32,
}

impl Default for PoolLimits {
    fn default() -> Self {
        // Low counts for a local test database.
        PoolLimits {
            max_open: 10,
            max_idle: 10,
        }
    }
}

/// The driver capability consumed by the instance manager.
///
/// A single `connect` must perform a real round-trip to the server, so that
/// success means the database engine is accepting connections — the readiness
/// loop depends on that, not on mere socket reachability.
#[async_trait]
pub trait Driver: Send + Sync {
    type Client: Clone + Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn connect(
        &self,
        connection_string: &str,
        limits: PoolLimits,
    ) -> Result<Self::Client, Self::Error>;
}

/// Production driver: a sqlx Postgres pool.
///
/// The returned [`PgPool`] is cheap to clone; the manager caches one and
/// hands out clones.
#[derive(Debug, Clone, Default)]
pub struct PgDriver;

impl PgDriver {
    pub fn new() -> Self {
        PgDriver
    }
}

#[async_trait]
impl Driver for PgDriver {
    type Client = PgPool;
    type Error = sqlx::Error;

    async fn connect(
        &self,
        connection_string: &str,
        limits: PoolLimits,
    ) -> Result<PgPool, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(limits.max_open.max(1))
            // Fail fast; the readiness loop owns the waiting.
            .acquire_timeout(Duration::from_secs(5))
            .connect(connection_string)
            .await?;

        // `connect` has already made one acquire round-trip, but keep the
        // readiness probe explicit: a pool that cannot answer SELECT 1 is
        // not a ready database.
        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(pool)
    }
}
