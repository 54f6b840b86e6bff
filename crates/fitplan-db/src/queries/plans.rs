//! Database query functions for the `user_plans` table.
//!
//! Functions are generic over [`PgExecutor`] so callers can run them against
//! the pool or inside an open transaction (`&mut *tx`).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use crate::models::{Family, PersistedPlan, PlanAttributes, Provenance};

/// Parameters for inserting a new owned plan.
#[derive(Debug, Clone)]
pub struct NewPlan<'a> {
    pub owner_id: Uuid,
    pub family: Family,
    pub name: &'a str,
    pub category: &'a str,
    pub description: Option<&'a str>,
    pub attributes: &'a PlanAttributes,
    pub tags: &'a [String],
    pub provenance: Provenance,
    pub template_id: Option<&'a str>,
}

/// Editable fields of an owned plan. Activation state, owner, and
/// provenance cannot be changed through this type.
#[derive(Debug, Clone)]
pub struct PlanUpdate<'a> {
    pub name: &'a str,
    pub category: &'a str,
    pub description: Option<&'a str>,
    pub attributes: &'a PlanAttributes,
    pub tags: &'a [String],
}

/// Insert a new plan row with `is_active = false`. Returns the row with
/// server-generated defaults (id, timestamps).
pub async fn insert_plan<'e, E>(executor: E, new: &NewPlan<'_>) -> Result<PersistedPlan>
where
    E: PgExecutor<'e>,
{
    let plan = sqlx::query_as::<_, PersistedPlan>(
        "INSERT INTO user_plans \
             (owner_id, family, name, category, description, attributes, tags, \
              is_active, is_preset, is_custom, template_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, false, $8, $9, $10) \
         RETURNING *",
    )
    .bind(new.owner_id)
    .bind(new.family)
    .bind(new.name)
    .bind(new.category)
    .bind(new.description)
    .bind(Json(new.attributes))
    .bind(new.tags)
    .bind(new.provenance.is_preset())
    .bind(new.provenance.is_custom())
    .bind(new.template_id)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to insert {} plan {:?}", new.family, new.name))?;

    Ok(plan)
}

/// Fetch a plan by its ID, regardless of owner.
pub async fn get_plan<'e, E>(executor: E, id: Uuid) -> Result<Option<PersistedPlan>>
where
    E: PgExecutor<'e>,
{
    let plan = sqlx::query_as::<_, PersistedPlan>("SELECT * FROM user_plans WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch plan")?;

    Ok(plan)
}

/// List every plan an owner has in a family, oldest first.
pub async fn list_by_owner<'e, E>(
    executor: E,
    owner_id: Uuid,
    family: Family,
) -> Result<Vec<PersistedPlan>>
where
    E: PgExecutor<'e>,
{
    let plans = sqlx::query_as::<_, PersistedPlan>(
        "SELECT * FROM user_plans \
         WHERE owner_id = $1 AND family = $2 \
         ORDER BY created_at ASC, id ASC",
    )
    .bind(owner_id)
    .bind(family)
    .fetch_all(executor)
    .await
    .context("failed to list plans for owner")?;

    Ok(plans)
}

/// List the plans an owner created directly (not materialized from a
/// template), oldest first.
pub async fn list_custom_by_owner<'e, E>(
    executor: E,
    owner_id: Uuid,
    family: Family,
) -> Result<Vec<PersistedPlan>>
where
    E: PgExecutor<'e>,
{
    let plans = sqlx::query_as::<_, PersistedPlan>(
        "SELECT * FROM user_plans \
         WHERE owner_id = $1 AND family = $2 AND is_custom \
         ORDER BY created_at ASC, id ASC",
    )
    .bind(owner_id)
    .bind(family)
    .fetch_all(executor)
    .await
    .context("failed to list custom plans for owner")?;

    Ok(plans)
}

/// Fetch the active plan for `(owner, family)`, if any.
pub async fn find_active<'e, E>(
    executor: E,
    owner_id: Uuid,
    family: Family,
) -> Result<Option<PersistedPlan>>
where
    E: PgExecutor<'e>,
{
    let plan = sqlx::query_as::<_, PersistedPlan>(
        "SELECT * FROM user_plans \
         WHERE owner_id = $1 AND family = $2 AND is_active",
    )
    .bind(owner_id)
    .bind(family)
    .fetch_optional(executor)
    .await
    .context("failed to fetch active plan")?;

    Ok(plan)
}

/// Fetch the owner's materialized instance of a template, identified by
/// `(name, category, family)`.
pub async fn find_by_identity<'e, E>(
    executor: E,
    owner_id: Uuid,
    name: &str,
    category: &str,
    family: Family,
) -> Result<Option<PersistedPlan>>
where
    E: PgExecutor<'e>,
{
    let plan = sqlx::query_as::<_, PersistedPlan>(
        "SELECT * FROM user_plans \
         WHERE owner_id = $1 AND family = $2 AND name = $3 AND category = $4 \
           AND is_preset",
    )
    .bind(owner_id)
    .bind(family)
    .bind(name)
    .bind(category)
    .fetch_optional(executor)
    .await
    .with_context(|| format!("failed to look up materialized template {name:?}/{category:?}"))?;

    Ok(plan)
}

/// Make `target_id` the only active plan for `(owner, family)`.
///
/// Clears `is_active` on every other record, then sets it on the target and
/// stamps `last_active_update`. The two statements are only atomic when
/// `conn` is a transaction; callers must not pass a bare pool connection.
/// Re-activating the current plan keeps the flag and refreshes the stamp.
pub async fn set_active_exclusive(
    conn: &mut PgConnection,
    owner_id: Uuid,
    family: Family,
    target_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    // The single-active index is not deferrable: clear before raising.
    sqlx::query(
        "UPDATE user_plans \
         SET is_active = false, updated_at = $4 \
         WHERE owner_id = $1 AND family = $2 AND is_active AND id <> $3",
    )
    .bind(owner_id)
    .bind(family)
    .bind(target_id)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("failed to clear active plans")?;

    let result = sqlx::query(
        "UPDATE user_plans \
         SET is_active = true, last_active_update = $4, updated_at = $4 \
         WHERE id = $3 AND owner_id = $1 AND family = $2",
    )
    .bind(owner_id)
    .bind(family)
    .bind(target_id)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("failed to activate plan")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("{family} plan {target_id} not found for owner {owner_id}");
    }

    Ok(())
}

/// Overwrite the editable fields of a plan the owner holds in `family`.
///
/// Returns `None` when no such plan exists for that owner.
pub async fn update_plan_fields<'e, E>(
    executor: E,
    owner_id: Uuid,
    family: Family,
    id: Uuid,
    update: &PlanUpdate<'_>,
) -> Result<Option<PersistedPlan>>
where
    E: PgExecutor<'e>,
{
    let plan = sqlx::query_as::<_, PersistedPlan>(
        "UPDATE user_plans \
         SET name = $4, category = $5, description = $6, attributes = $7, tags = $8, \
             updated_at = now() \
         WHERE id = $3 AND owner_id = $1 AND family = $2 \
         RETURNING *",
    )
    .bind(owner_id)
    .bind(family)
    .bind(id)
    .bind(update.name)
    .bind(update.category)
    .bind(update.description)
    .bind(Json(update.attributes))
    .bind(update.tags)
    .fetch_optional(executor)
    .await
    .with_context(|| format!("failed to update plan {id}"))?;

    Ok(plan)
}

/// Count active plans for `(owner, family)`. Always 0 or 1 while the
/// single-active index is in place.
pub async fn count_active<'e, E>(executor: E, owner_id: Uuid, family: Family) -> Result<i64>
where
    E: PgExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM user_plans \
         WHERE owner_id = $1 AND family = $2 AND is_active",
    )
    .bind(owner_id)
    .bind(family)
    .fetch_one(executor)
    .await
    .context("failed to count active plans")?;

    Ok(count)
}
