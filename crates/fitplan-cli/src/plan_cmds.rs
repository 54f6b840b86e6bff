//! CLI handlers for the plan commands.
//!
//! Implements:
//! - `fitplan catalog [family]`                      -- list built-in templates
//! - `fitplan plans <family> --owner <id>`           -- list owned plans
//! - `fitplan activate <family> --owner <id> ...`    -- activate a plan or template
//! - `fitplan create <family> --owner <id> --file`   -- create and activate a custom plan
//! - `fitplan update <family> --owner <id> <plan>`   -- edit an owned plan

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result, bail};
use uuid::Uuid;

use fitplan_core::activation::{Activation, ActivationTarget, PlanActivationService};
use fitplan_core::catalog::{PlanCatalog, TemplateRef};
use fitplan_core::draft::PlanDraft;
use fitplan_core::query::{DisplayEntry, PlanQueryService};
use fitplan_db::models::{Family, PersistedPlan, PlanAttributes};

// -----------------------------------------------------------------------
// fitplan catalog
// -----------------------------------------------------------------------

pub fn run_catalog(catalog: &PlanCatalog, family: Option<Family>) {
    print!("{}", render_catalog(catalog, family));
}

/// Render the catalog as one table per family.
pub fn render_catalog(catalog: &PlanCatalog, family: Option<Family>) -> String {
    let families: Vec<Family> = match family {
        Some(f) => vec![f],
        None => Family::ALL.to_vec(),
    };

    let mut out = String::new();
    for family in families {
        let templates = catalog.list(family);
        let id_w = templates.iter().map(|t| t.id.len()).max().unwrap_or(2).max(2);
        let name_w = templates.iter().map(|t| t.name.len()).max().unwrap_or(4).max(4);

        let _ = writeln!(out, "{} templates:", family);
        let _ = writeln!(out, "  {:<id_w$}  {:<name_w$}  {}", "ID", "NAME", "CATEGORY");
        for t in templates {
            let _ = writeln!(out, "  {:<id_w$}  {:<name_w$}  {}", t.id, t.name, t.category);
        }
        out.push('\n');
    }
    out
}

// -----------------------------------------------------------------------
// fitplan plans
// -----------------------------------------------------------------------

pub async fn run_plans(
    query: &PlanQueryService,
    family: Family,
    owner: Uuid,
    display: bool,
) -> Result<()> {
    if display {
        let entries = query.list_for_display(owner, family).await?;
        for entry in &entries {
            let marker = if entry.is_active() { "*" } else { " " };
            let kind = match entry {
                DisplayEntry::Template(_) => "template",
                DisplayEntry::Custom(_) => "custom",
                DisplayEntry::Retired(_) => "retired",
            };
            println!("{marker} {:<8}  {}", kind, entry.name());
        }
        return Ok(());
    }

    let plans = query.list_owned_plans(owner, family).await?;
    if plans.is_empty() {
        println!("No {family} plans. Use `fitplan activate` or `fitplan create` to add one.");
        return Ok(());
    }

    let name_w = plans.iter().map(|p| p.plan.name.len()).max().unwrap_or(4).max(4);
    println!(
        "  {:<36}  {:<name_w$}  {:<7}  LAST ACTIVATED",
        "ID", "NAME", "SOURCE"
    );
    for listing in &plans {
        let p = &listing.plan;
        let marker = if listing.is_active() { "*" } else { " " };
        let source = if p.is_preset { "preset" } else { "custom" };
        let last = p
            .last_active_update
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        println!("{marker} {:<36}  {:<name_w$}  {:<7}  {}", p.id, p.name, source, last);
    }

    Ok(())
}

// -----------------------------------------------------------------------
// fitplan activate / create / update
// -----------------------------------------------------------------------

pub async fn run_activate(
    service: &PlanActivationService,
    family: Family,
    owner: Uuid,
    plan: Option<Uuid>,
    template: Option<String>,
) -> Result<()> {
    let target = match (plan, template) {
        (Some(id), None) => ActivationTarget::Owned(id),
        (None, Some(id)) => ActivationTarget::Preset(TemplateRef::Id { id }),
        _ => bail!("pass exactly one of --plan or --template"),
    };

    let activation = service.activate(owner, family, &target).await?;
    print_activation(&activation);
    Ok(())
}

pub async fn run_create(
    service: &PlanActivationService,
    family: Family,
    owner: Uuid,
    file: &Path,
) -> Result<()> {
    let draft = PlanDraft::from_json(read_json_file(file)?)?;
    let activation = service.create_custom(owner, family, draft).await?;
    print_activation(&activation);
    Ok(())
}

pub async fn run_update(
    service: &PlanActivationService,
    family: Family,
    owner: Uuid,
    plan_id: Uuid,
    file: &Path,
) -> Result<()> {
    let patch = read_json_file(file)?;
    let plan = service.update_owned(owner, family, plan_id, patch).await?;
    println!("Plan updated.");
    print_plan(&plan);
    Ok(())
}

/// Read and parse a JSON document from disk.
pub fn read_json_file(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_activation(activation: &Activation) {
    if activation.created {
        println!("Plan created and activated.");
    } else {
        println!("Plan activated.");
    }
    print_plan(&activation.plan);
    if let Some(prev) = activation.previous_plan_id.filter(|p| *p != activation.plan.id) {
        println!("  Replaced:     {prev}");
    }
}

fn print_plan(plan: &PersistedPlan) {
    println!();
    println!("  ID:           {}", plan.id);
    println!("  Name:         {}", plan.name);
    println!("  Category:     {}", plan.category);
    println!("  Active:       {}", plan.is_active);
    match &plan.attributes.0 {
        PlanAttributes::Diet(d) => {
            println!("  Calories:     {}", d.calories);
            println!("  Meals:        {}", d.meals.len());
        }
        PlanAttributes::Workout(w) => {
            println!("  Difficulty:   {}", w.difficulty);
            println!("  Schedule:     {}, {}", w.frequency, w.duration);
            println!("  Exercises:    {}", w.exercises.len());
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
