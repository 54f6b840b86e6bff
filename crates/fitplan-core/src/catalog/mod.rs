//! Built-in plan template catalog.
//!
//! Templates are defined in `catalog.toml` and embedded in the binary at
//! compile time. The catalog is read-only: activating a template creates a
//! private copy owned by the user (see [`crate::activation`]).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fitplan_db::models::{Family, PlanAttributes};

use crate::draft::{PlanDraft, ValidationError};
use crate::error::PlanError;

/// The embedded template catalog.
static CATALOG_TOML: &str = include_str!("catalog.toml");

/// A read-only plan template.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTemplate {
    /// Stable identifier (e.g. `keto-burn`).
    pub id: String,
    pub family: Family,
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub attributes: PlanAttributes,
}

/// How a caller names a template: by catalog id or by `(name, category)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateRef {
    Id { id: String },
    Identity { name: String, category: String },
}

impl std::fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id { id } => write!(f, "template {id:?}"),
            Self::Identity { name, category } => write!(f, "template {name:?}/{category:?}"),
        }
    }
}

/// Error loading a catalog file.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to parse plan catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("duplicate template id {0:?}")]
    DuplicateId(String),

    #[error("duplicate {family} template {name:?}/{category:?}")]
    DuplicateIdentity {
        family: Family,
        name: String,
        category: String,
    },

    #[error("template {id:?}: {source}")]
    InvalidTemplate {
        id: String,
        #[source]
        source: ValidationError,
    },
}

#[derive(Debug, Deserialize)]
struct TemplateEntry {
    id: String,
    #[serde(flatten)]
    draft: PlanDraft,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    diet: Vec<TemplateEntry>,
    #[serde(default)]
    workout: Vec<TemplateEntry>,
}

/// The set of available templates, in file order per family.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    templates: Vec<PlanTemplate>,
}

impl PlanCatalog {
    /// Load the catalog embedded in the binary.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_toml_str(CATALOG_TOML)
    }

    /// Parse and validate a catalog. Every template must pass the same
    /// validation as a user-created plan of its family.
    pub fn from_toml_str(s: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(s)?;

        let entries = file
            .diet
            .into_iter()
            .map(|e| (Family::Diet, e))
            .chain(file.workout.into_iter().map(|e| (Family::Workout, e)));

        let mut ids = HashSet::new();
        let mut identities = HashSet::new();
        let mut templates = Vec::new();

        for (family, entry) in entries {
            if !ids.insert(entry.id.clone()) {
                return Err(CatalogError::DuplicateId(entry.id));
            }
            let plan = entry
                .draft
                .validate(family)
                .map_err(|source| CatalogError::InvalidTemplate {
                    id: entry.id.clone(),
                    source,
                })?;
            if !identities.insert((family, plan.name.clone(), plan.category.clone())) {
                return Err(CatalogError::DuplicateIdentity {
                    family,
                    name: plan.name,
                    category: plan.category,
                });
            }
            templates.push(PlanTemplate {
                id: entry.id,
                family,
                name: plan.name,
                category: plan.category,
                description: plan.description,
                tags: plan.tags,
                attributes: plan.attributes,
            });
        }

        Ok(Self { templates })
    }

    /// Templates of `family`, in catalog order.
    pub fn list(&self, family: Family) -> Vec<&PlanTemplate> {
        self.templates.iter().filter(|t| t.family == family).collect()
    }

    pub fn get(&self, id: &str) -> Option<&PlanTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn find(&self, family: Family, name: &str, category: &str) -> Option<&PlanTemplate> {
        self.templates
            .iter()
            .find(|t| t.family == family && t.name == name && t.category == category)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Look up the template a caller asked for in `family`.
    ///
    /// A template that exists only in the other family is a validation
    /// error; one that does not exist at all is not found.
    pub fn resolve(
        &self,
        family: Family,
        template: &TemplateRef,
    ) -> Result<&PlanTemplate, PlanError> {
        let found = match template {
            TemplateRef::Id { id } => self.get(id),
            TemplateRef::Identity { name, category } => self
                .templates
                .iter()
                .find(|t| t.name == *name && t.category == *category && t.family == family)
                .or_else(|| {
                    self.templates
                        .iter()
                        .find(|t| t.name == *name && t.category == *category)
                }),
        };

        match found {
            Some(t) if t.family == family => Ok(t),
            Some(t) => Err(ValidationError::single(format!(
                "{template} is a {} template, not {family}",
                t.family
            ))
            .into()),
            None => Err(PlanError::not_found(template.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
