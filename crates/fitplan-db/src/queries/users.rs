//! Database query functions for the active-plan pointer fields of `users`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{Family, User};

/// Insert a user row. Profile management belongs to the wider product; this
/// exists for setup in the CLI and tests.
pub async fn insert_user<'e, E>(executor: E, email: &str) -> Result<User>
where
    E: PgExecutor<'e>,
{
    let user = sqlx::query_as::<_, User>("INSERT INTO users (email) VALUES ($1) RETURNING *")
        .bind(email)
        .fetch_one(executor)
        .await
        .with_context(|| format!("failed to insert user {email:?}"))?;

    Ok(user)
}

/// Fetch a user by ID.
pub async fn get_user<'e, E>(executor: E, id: Uuid) -> Result<Option<User>>
where
    E: PgExecutor<'e>,
{
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch user")?;

    Ok(user)
}

/// Fetch a user and hold a row lock on it until the surrounding transaction
/// ends.
///
/// Activation transactions take this lock first, so concurrent activations
/// for one owner run one after another while other owners are unaffected.
pub async fn lock_user<'e, E>(executor: E, id: Uuid) -> Result<Option<User>>
where
    E: PgExecutor<'e>,
{
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to lock user row")?;

    Ok(user)
}

/// Point the user's `family` slot at `plan_id`.
///
/// Must run in the same transaction as
/// [`super::plans::set_active_exclusive`] for the same plan.
pub async fn set_active_pointer<'e, E>(
    executor: E,
    owner_id: Uuid,
    family: Family,
    plan_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let sql = match family {
        Family::Diet => {
            "UPDATE users SET active_diet_plan_id = $2, last_active_plan_update = $3 \
             WHERE id = $1"
        }
        Family::Workout => {
            "UPDATE users SET active_workout_plan_id = $2, last_active_plan_update = $3 \
             WHERE id = $1"
        }
    };

    let result = sqlx::query(sql)
        .bind(owner_id)
        .bind(plan_id)
        .bind(now)
        .execute(executor)
        .await
        .with_context(|| format!("failed to set active {family} pointer"))?;

    if result.rows_affected() == 0 {
        anyhow::bail!("user {owner_id} not found");
    }

    Ok(())
}
