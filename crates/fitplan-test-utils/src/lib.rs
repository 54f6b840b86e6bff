//! Shared test utilities for fitplan integration tests.
//!
//! Provides a PostgreSQL instance shared across tests. Each test gets its
//! own database within the instance, with migrations applied.
//!
//! Two modes:
//! - **`FITPLAN_TEST_PG_URL`** set: use that server directly (CI service
//!   container or a local instance). The URL has no database name.
//! - **No env var**: start a container via testcontainers, shared per test
//!   binary through a `OnceCell`.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use fitplan_db::models::User;
use fitplan_db::pool;
use fitplan_db::queries::users;

struct SharedPg {
    base_url: String,
    /// Keeps the container alive. `None` with an external URL.
    _container: Option<ContainerAsync<Postgres>>,
}

static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

async fn init_shared_pg() -> SharedPg {
    if let Ok(url) = std::env::var("FITPLAN_TEST_PG_URL") {
        return SharedPg {
            base_url: url.trim_end_matches('/').to_owned(),
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("16")
        .start()
        .await
        .expect("failed to start PostgreSQL container");

    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");

    SharedPg {
        base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

/// Base URL (no database name) of the shared PostgreSQL server.
pub async fn pg_url() -> &'static str {
    let shared = SHARED_PG.get_or_init(init_shared_pg).await;
    &shared.base_url
}

/// Create a temporary database with migrations applied.
///
/// Returns `(pool, db_name)`. Call [`drop_test_db`] with `db_name` when the
/// test is done. The pool allows enough connections for concurrency tests.
pub async fn create_test_db() -> (PgPool, String) {
    let base_url = pg_url().await;

    let maint_pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&format!("{base_url}/postgres"))
        .await
        .expect("failed to connect to maintenance database");

    let db_name = format!("fitplan_test_{}", Uuid::new_v4().simple());
    maint_pool
        .execute(format!("CREATE DATABASE {db_name}").as_str())
        .await
        .unwrap_or_else(|e| panic!("failed to create temp database {db_name}: {e}"));
    maint_pool.close().await;

    let temp_pool = PgPoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&format!("{base_url}/{db_name}"))
        .await
        .unwrap_or_else(|e| panic!("failed to connect to temp database {db_name}: {e}"));

    pool::run_migrations(&temp_pool)
        .await
        .expect("migrations should succeed");

    (temp_pool, db_name)
}

/// Drop a temporary database, terminating its remaining connections first.
/// Safe to call on an already-dropped database.
pub async fn drop_test_db(db_name: &str) {
    let base_url = pg_url().await;

    let maint_pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&format!("{base_url}/postgres"))
        .await
        .expect("failed to connect to maintenance database for cleanup");

    let terminate = format!(
        "SELECT pg_terminate_backend(pid) \
         FROM pg_stat_activity \
         WHERE datname = '{db_name}' AND pid <> pg_backend_pid()"
    );
    let _ = maint_pool.execute(terminate.as_str()).await;

    let _ = maint_pool
        .execute(format!("DROP DATABASE IF EXISTS {db_name}").as_str())
        .await;
    maint_pool.close().await;
}

/// Insert a user with a unique email.
pub async fn create_test_user(pool: &PgPool) -> User {
    let email = format!("{}@test.fitplan", Uuid::new_v4().simple());
    users::insert_user(pool, &email)
        .await
        .expect("insert_user should succeed")
}
