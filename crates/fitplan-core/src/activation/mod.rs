//! Plan activation: the only code path that changes which plan is active.
//!
//! Every operation reduces its input to a [`PlanResolution`] and hands it to
//! one commit routine, which runs a single transaction:
//!
//! 1. lock the owner's user row (serializes activations per owner),
//! 2. resolve the target plan, inserting it if it does not exist yet,
//! 3. clear every other active flag, raise the target's, and point the
//!    user's family slot at it,
//! 4. commit.
//!
//! An error at any step, or dropping the returned future, rolls the whole
//! transaction back.

mod state;

pub use state::ActivationState;

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use fitplan_db::models::{Family, PersistedPlan, Provenance};
use fitplan_db::queries::plans::{self, NewPlan, PlanUpdate};
use fitplan_db::queries::users;

use crate::catalog::{PlanCatalog, PlanTemplate, TemplateRef};
use crate::draft::{PlanDraft, PlanPatch, ValidatedPlan};
use crate::error::PlanError;

/// What an activation request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationTarget {
    /// A plan the owner already has.
    Owned(Uuid),
    /// A catalog template, materialized on first use.
    Preset(TemplateRef),
}

/// The plan an activation will commit, as resolved from the request.
#[derive(Debug, Clone)]
pub enum PlanResolution<'a> {
    Existing(Uuid),
    Materialize(&'a PlanTemplate),
    Create(ValidatedPlan),
}

/// Result of a committed activation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    /// The now-active plan, as committed.
    pub plan: PersistedPlan,
    /// Whether this activation inserted the plan.
    pub created: bool,
    /// What the owner's pointer referenced before.
    pub previous_plan_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct PlanActivationService {
    pool: PgPool,
    catalog: Arc<PlanCatalog>,
}

impl PlanActivationService {
    pub fn new(pool: PgPool, catalog: Arc<PlanCatalog>) -> Self {
        Self { pool, catalog }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Activate whatever `target` names.
    pub async fn activate(
        &self,
        owner_id: Uuid,
        family: Family,
        target: &ActivationTarget,
    ) -> Result<Activation, PlanError> {
        match target {
            ActivationTarget::Owned(plan_id) => {
                self.activate_custom(owner_id, family, *plan_id).await
            }
            ActivationTarget::Preset(template) => {
                self.activate_preset(owner_id, family, template).await
            }
        }
    }

    /// Activate a catalog template, reusing the owner's copy if one exists.
    ///
    /// The stored payload always comes from the catalog.
    pub async fn activate_preset(
        &self,
        owner_id: Uuid,
        family: Family,
        template: &TemplateRef,
    ) -> Result<Activation, PlanError> {
        let template = self.catalog.resolve(family, template)?;
        self.commit(owner_id, family, PlanResolution::Materialize(template))
            .await
    }

    /// Activate a plan the owner already holds in `family`.
    pub async fn activate_custom(
        &self,
        owner_id: Uuid,
        family: Family,
        plan_id: Uuid,
    ) -> Result<Activation, PlanError> {
        let plan = plans::get_plan(&self.pool, plan_id)
            .await
            .map_err(PlanError::from_storage)?;
        if !plan.is_some_and(|p| p.owner_id == owner_id && p.family == family) {
            return Err(PlanError::not_found(format!("{family} plan {plan_id}")));
        }
        self.commit(owner_id, family, PlanResolution::Existing(plan_id))
            .await
    }

    /// Validate a draft, store it as a new custom plan, and activate it.
    pub async fn create_custom(
        &self,
        owner_id: Uuid,
        family: Family,
        draft: PlanDraft,
    ) -> Result<Activation, PlanError> {
        let plan = draft.validate(family)?;
        self.commit(owner_id, family, PlanResolution::Create(plan))
            .await
    }

    /// Apply a partial JSON update to an owned plan.
    ///
    /// Activation state, ownership, and provenance are not editable here,
    /// and a materialized template keeps its name and category.
    pub async fn update_owned(
        &self,
        owner_id: Uuid,
        family: Family,
        plan_id: Uuid,
        patch: serde_json::Value,
    ) -> Result<PersistedPlan, PlanError> {
        let patch = PlanPatch::from_json(patch)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin update transaction")
            .map_err(PlanError::from_storage)?;

        users::lock_user(&mut *tx, owner_id)
            .await
            .map_err(PlanError::from_storage)?
            .ok_or_else(|| PlanError::not_found(format!("user {owner_id}")))?;

        let current = plans::get_plan(&mut *tx, plan_id)
            .await
            .map_err(PlanError::from_storage)?
            .filter(|p| p.owner_id == owner_id && p.family == family)
            .ok_or_else(|| PlanError::not_found(format!("{family} plan {plan_id}")))?;

        let updated = patch.apply(&current)?;
        let update = PlanUpdate {
            name: &updated.name,
            category: &updated.category,
            description: updated.description.as_deref(),
            attributes: &updated.attributes,
            tags: &updated.tags,
        };
        let plan = plans::update_plan_fields(&mut *tx, owner_id, family, plan_id, &update)
            .await
            .map_err(PlanError::from_storage)?
            .ok_or_else(|| PlanError::not_found(format!("{family} plan {plan_id}")))?;

        tx.commit()
            .await
            .context("failed to commit plan update")
            .map_err(PlanError::from_storage)?;

        tracing::info!(owner = %owner_id, %family, plan = %plan_id, "plan updated");
        Ok(plan)
    }

    async fn commit(
        &self,
        owner_id: Uuid,
        family: Family,
        resolution: PlanResolution<'_>,
    ) -> Result<Activation, PlanError> {
        let mut state = ActivationState::Idle;
        let result = self.run(&mut state, owner_id, family, resolution).await;

        match &result {
            Ok(activation) => tracing::info!(
                owner = %owner_id,
                %family,
                plan = %activation.plan.id,
                created = activation.created,
                previous = ?activation.previous_plan_id,
                "plan activated"
            ),
            Err(e) => {
                tracing::warn!(
                    owner = %owner_id,
                    %family,
                    aborted_in = %state,
                    error = %e,
                    "activation aborted"
                );
                state.advance(ActivationState::Aborted);
            }
        }

        result
    }

    async fn run(
        &self,
        state: &mut ActivationState,
        owner_id: Uuid,
        family: Family,
        resolution: PlanResolution<'_>,
    ) -> Result<Activation, PlanError> {
        state.advance(ActivationState::Resolving);

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin activation transaction")
            .map_err(PlanError::from_storage)?;

        let user = users::lock_user(&mut *tx, owner_id)
            .await
            .map_err(PlanError::from_storage)?
            .ok_or_else(|| PlanError::not_found(format!("user {owner_id}")))?;
        let previous_plan_id = user.active_plan_id(family);

        let (plan_id, created) = match resolution {
            PlanResolution::Existing(id) => {
                // Re-checked under the lock: the pre-check ran outside it.
                let owned = plans::get_plan(&mut *tx, id)
                    .await
                    .map_err(PlanError::from_storage)?
                    .is_some_and(|p| p.owner_id == owner_id && p.family == family);
                if !owned {
                    return Err(PlanError::not_found(format!("{family} plan {id}")));
                }
                (id, false)
            }
            PlanResolution::Materialize(template) => {
                let existing = plans::find_by_identity(
                    &mut *tx,
                    owner_id,
                    &template.name,
                    &template.category,
                    family,
                )
                .await
                .map_err(PlanError::from_storage)?;

                match existing {
                    Some(plan) => (plan.id, false),
                    None => {
                        state.advance(ActivationState::Materializing);
                        let plan = plans::insert_plan(
                            &mut *tx,
                            &NewPlan {
                                owner_id,
                                family,
                                name: &template.name,
                                category: &template.category,
                                description: template.description.as_deref(),
                                attributes: &template.attributes,
                                tags: &template.tags,
                                provenance: Provenance::Preset,
                                template_id: Some(&template.id),
                            },
                        )
                        .await
                        .map_err(PlanError::from_storage)?;
                        tracing::debug!(
                            owner = %owner_id,
                            template = %template.id,
                            plan = %plan.id,
                            "materialized template"
                        );
                        (plan.id, true)
                    }
                }
            }
            PlanResolution::Create(custom) => {
                state.advance(ActivationState::Materializing);
                let plan = plans::insert_plan(
                    &mut *tx,
                    &NewPlan {
                        owner_id,
                        family,
                        name: &custom.name,
                        category: &custom.category,
                        description: custom.description.as_deref(),
                        attributes: &custom.attributes,
                        tags: &custom.tags,
                        provenance: Provenance::Custom,
                        template_id: None,
                    },
                )
                .await
                .map_err(PlanError::from_storage)?;
                (plan.id, true)
            }
        };

        state.advance(ActivationState::Committing);
        let now = Utc::now();
        plans::set_active_exclusive(&mut tx, owner_id, family, plan_id, now)
            .await
            .map_err(PlanError::from_storage)?;
        users::set_active_pointer(&mut *tx, owner_id, family, plan_id, now)
            .await
            .map_err(PlanError::from_storage)?;

        let plan = plans::get_plan(&mut *tx, plan_id)
            .await
            .map_err(PlanError::from_storage)?
            .ok_or_else(|| {
                PlanError::Storage(anyhow::anyhow!("plan {plan_id} missing after activation"))
            })?;

        tx.commit()
            .await
            .context("failed to commit activation")
            .map_err(PlanError::from_storage)?;
        state.advance(ActivationState::Done);

        Ok(Activation {
            plan,
            created,
            previous_plan_id,
        })
    }
}
