//! Read-only views of templates and owned plans.
//!
//! Each listing reads the user row and the plan rows in one
//! `REPEATABLE READ, READ ONLY` transaction, so the active pointer and the
//! active flags always come from the same snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use fitplan_db::models::{Family, PersistedPlan, User};
use fitplan_db::queries::{plans, users};

use crate::catalog::{PlanCatalog, PlanTemplate};
use crate::error::PlanError;

/// A catalog template annotated for one owner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateListing {
    #[serde(flatten)]
    pub template: PlanTemplate,
    pub is_active: bool,
    /// The owner's materialized copy, if they have activated it before.
    pub plan_id: Option<Uuid>,
}

/// An owned plan with its active flag.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedListing {
    #[serde(flatten)]
    pub plan: PersistedPlan,
}

impl OwnedListing {
    pub fn is_active(&self) -> bool {
        self.plan.is_active
    }
}

/// One row of the merged listing shown to users.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayEntry {
    Template(TemplateListing),
    Custom(OwnedListing),
    /// A materialized copy whose template is no longer in the catalog.
    Retired(OwnedListing),
}

impl DisplayEntry {
    pub fn is_active(&self) -> bool {
        match self {
            Self::Template(t) => t.is_active,
            Self::Custom(o) | Self::Retired(o) => o.is_active(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Template(t) => &t.template.name,
            Self::Custom(o) | Self::Retired(o) => &o.plan.name,
        }
    }
}

#[derive(Clone)]
pub struct PlanQueryService {
    pool: PgPool,
    catalog: Arc<PlanCatalog>,
}

impl PlanQueryService {
    pub fn new(pool: PgPool, catalog: Arc<PlanCatalog>) -> Self {
        Self { pool, catalog }
    }

    /// Catalog templates of `family`, each marked active iff the owner's
    /// pointer references their materialized copy.
    pub async fn list_preset_templates(
        &self,
        owner_id: Uuid,
        family: Family,
    ) -> Result<Vec<TemplateListing>, PlanError> {
        let mut tx = self.snapshot().await?;
        let user = load_user(&mut tx, owner_id).await?;
        let owned = plans::list_by_owner(&mut *tx, owner_id, family)
            .await
            .map_err(PlanError::from_storage)?;
        finish(tx).await?;

        Ok(self.annotate_templates(&user, family, &owned))
    }

    /// Every plan the owner holds in `family`, oldest first.
    pub async fn list_owned_plans(
        &self,
        owner_id: Uuid,
        family: Family,
    ) -> Result<Vec<OwnedListing>, PlanError> {
        let mut tx = self.snapshot().await?;
        load_user(&mut tx, owner_id).await?;
        let owned = plans::list_by_owner(&mut *tx, owner_id, family)
            .await
            .map_err(PlanError::from_storage)?;
        finish(tx).await?;

        Ok(owned.into_iter().map(|plan| OwnedListing { plan }).collect())
    }

    /// Templates followed by the owner's custom plans, then any copies of
    /// templates that have left the catalog. At most one entry is active.
    pub async fn list_for_display(
        &self,
        owner_id: Uuid,
        family: Family,
    ) -> Result<Vec<DisplayEntry>, PlanError> {
        let mut tx = self.snapshot().await?;
        let user = load_user(&mut tx, owner_id).await?;
        let owned = plans::list_by_owner(&mut *tx, owner_id, family)
            .await
            .map_err(PlanError::from_storage)?;
        finish(tx).await?;

        let templates = self.annotate_templates(&user, family, &owned);
        let (custom, copies): (Vec<_>, Vec<_>) = owned.into_iter().partition(|p| p.is_custom);
        let retired = copies
            .into_iter()
            .filter(|p| self.catalog.find(family, &p.name, &p.category).is_none())
            .map(|plan| DisplayEntry::Retired(OwnedListing { plan }));

        Ok(templates
            .into_iter()
            .map(DisplayEntry::Template)
            .chain(custom.into_iter().map(|plan| DisplayEntry::Custom(OwnedListing { plan })))
            .chain(retired)
            .collect())
    }

    fn annotate_templates(
        &self,
        user: &User,
        family: Family,
        owned: &[PersistedPlan],
    ) -> Vec<TemplateListing> {
        let pointer = user.active_plan_id(family);
        let materialized: HashMap<(&str, &str), Uuid> = owned
            .iter()
            .filter(|p| p.is_preset)
            .map(|p| ((p.name.as_str(), p.category.as_str()), p.id))
            .collect();

        self.catalog
            .list(family)
            .into_iter()
            .map(|template| {
                let plan_id = materialized
                    .get(&(template.name.as_str(), template.category.as_str()))
                    .copied();
                TemplateListing {
                    template: template.clone(),
                    is_active: plan_id.is_some() && plan_id == pointer,
                    plan_id,
                }
            })
            .collect()
    }

    async fn snapshot(&self) -> Result<Transaction<'static, Postgres>, PlanError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin read transaction")
            .map_err(PlanError::from_storage)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .context("failed to set snapshot isolation")
            .map_err(PlanError::from_storage)?;
        Ok(tx)
    }
}

async fn load_user(tx: &mut Transaction<'_, Postgres>, owner_id: Uuid) -> Result<User, PlanError> {
    users::get_user(&mut **tx, owner_id)
        .await
        .map_err(PlanError::from_storage)?
        .ok_or_else(|| PlanError::not_found(format!("user {owner_id}")))
}

async fn finish(tx: Transaction<'_, Postgres>) -> Result<(), PlanError> {
    tx.commit()
        .await
        .context("failed to close read transaction")
        .map_err(PlanError::from_storage)
}
