//! Validation of plan drafts and partial updates.
//!
//! Drafts arrive from people and from plan generators, so every field is
//! optional on the way in. Validation reports every problem it finds, not
//! just the first one.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use fitplan_db::models::{
    DietAttributes, Difficulty, Exercise, Family, Meal, PersistedPlan, PlanAttributes, RepSpec,
    WorkoutAttributes,
};

/// Keys an update may never carry. Activation state and ownership change
/// only through activation.
const PROTECTED_KEYS: &[&str] = &[
    "id",
    "isActive",
    "is_active",
    "ownerId",
    "owner_id",
    "isPreset",
    "is_preset",
    "isCustom",
    "is_custom",
    "family",
    "templateId",
    "template_id",
    "lastActiveUpdate",
    "last_active_update",
    "createdAt",
    "created_at",
    "updatedAt",
    "updated_at",
];

const DIET_KEYS: &[&str] = &["calories", "protein", "carbs", "fats", "meals"];
const WORKOUT_KEYS: &[&str] = &["difficulty", "duration", "frequency", "exercises"];

fn attribute_keys(family: Family) -> &'static [&'static str] {
    match family {
        Family::Diet => DIET_KEYS,
        Family::Workout => WORKOUT_KEYS,
    }
}

/// One or more problems with a draft or patch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid plan: {}", .problems.join("; "))]
pub struct ValidationError {
    pub problems: Vec<String>,
}

impl ValidationError {
    pub fn new(problems: Vec<String>) -> Self {
        Self { problems }
    }

    pub fn single(problem: impl Into<String>) -> Self {
        Self {
            problems: vec![problem.into()],
        }
    }
}

/// A plan as submitted for creation, before validation.
///
/// Diet and workout fields share one flat shape; the family passed to
/// [`PlanDraft::validate`] decides which of them are required.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDraft {
    pub name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,

    pub calories: Option<u32>,
    pub protein: Option<u32>,
    pub carbs: Option<u32>,
    pub fats: Option<u32>,
    #[serde(default)]
    pub meals: Vec<Meal>,

    pub difficulty: Option<String>,
    pub duration: Option<String>,
    pub frequency: Option<String>,
    #[serde(default)]
    pub exercises: Vec<Exercise>,
}

/// A draft or patched plan that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPlan {
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub attributes: PlanAttributes,
}

impl ValidatedPlan {
    pub fn family(&self) -> Family {
        self.attributes.family()
    }
}

impl PlanDraft {
    /// Parse a JSON body into a draft. Type mismatches (a string where a
    /// number belongs) are reported as validation problems.
    pub fn from_json(value: Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value)
            .map_err(|e| ValidationError::single(format!("malformed plan: {e}")))
    }

    /// Check the draft against the rules for `family`.
    pub fn validate(self, family: Family) -> Result<ValidatedPlan, ValidationError> {
        let mut problems = Vec::new();
        let name = required_text(self.name, "name", &mut problems);
        let category = required_text(self.category, "category", &mut problems);

        let attributes = match family {
            Family::Diet => {
                let calories = match self.calories {
                    Some(c) => Some(c),
                    None => {
                        problems.push("calories is required".to_owned());
                        None
                    }
                };
                check_meals(&self.meals, &mut problems);
                calories.map(|calories| {
                    PlanAttributes::Diet(DietAttributes {
                        calories,
                        protein: self.protein,
                        carbs: self.carbs,
                        fats: self.fats,
                        meals: self.meals,
                    })
                })
            }
            Family::Workout => {
                let difficulty = match self.difficulty.as_deref().map(str::parse::<Difficulty>) {
                    Some(Ok(d)) => Some(d),
                    Some(Err(e)) => {
                        problems.push(e.to_string());
                        None
                    }
                    None => {
                        problems.push("difficulty is required".to_owned());
                        None
                    }
                };
                let duration = required_text(self.duration, "duration", &mut problems);
                let frequency = required_text(self.frequency, "frequency", &mut problems);
                check_exercises(&self.exercises, &mut problems);
                match (difficulty, duration, frequency) {
                    (Some(difficulty), Some(duration), Some(frequency)) => {
                        Some(PlanAttributes::Workout(WorkoutAttributes {
                            difficulty,
                            duration,
                            frequency,
                            exercises: self.exercises,
                        }))
                    }
                    _ => None,
                }
            }
        };

        if let Some(PlanAttributes::Diet(diet)) = &attributes {
            if diet.calories == 0 {
                problems.push("calories must be greater than zero".to_owned());
            }
        }

        match (name, category, attributes) {
            (Some(name), Some(category), Some(attributes)) if problems.is_empty() => {
                Ok(ValidatedPlan {
                    name,
                    category,
                    description: self.description.filter(|d| !d.trim().is_empty()),
                    tags: self.tags,
                    attributes,
                })
            }
            _ => Err(ValidationError::new(problems)),
        }
    }
}

/// A partial update to an owned plan.
///
/// `name`, `category`, `description`, and `tags` address the record itself;
/// every other key is merged over the stored attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanPatch {
    pub name: Option<String>,
    pub category: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub attributes: Map<String, Value>,
}

impl PlanPatch {
    /// Parse a JSON object into a patch, rejecting protected keys.
    pub fn from_json(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(mut fields) = value else {
            return Err(ValidationError::single("update must be a JSON object"));
        };

        let mut problems: Vec<String> = PROTECTED_KEYS
            .iter()
            .filter(|key| fields.contains_key(**key))
            .map(|key| format!("{key} cannot be changed through an update"))
            .collect();

        let name = take_string(&mut fields, "name", &mut problems);
        let category = take_string(&mut fields, "category", &mut problems);
        let description = match fields.remove("description") {
            None => None,
            Some(Value::Null) => Some(None),
            Some(Value::String(s)) => Some(Some(s)),
            Some(_) => {
                problems.push("description must be a string or null".to_owned());
                None
            }
        };
        let tags = match fields.remove("tags") {
            None => None,
            Some(v) => match serde_json::from_value::<Vec<String>>(v) {
                Ok(tags) => Some(tags),
                Err(_) => {
                    problems.push("tags must be a list of strings".to_owned());
                    None
                }
            },
        };

        if !problems.is_empty() {
            return Err(ValidationError::new(problems));
        }

        Ok(Self {
            name,
            category,
            description,
            tags,
            attributes: fields,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.category.is_none()
            && self.description.is_none()
            && self.tags.is_none()
            && self.attributes.is_empty()
    }

    /// Apply the patch to a stored plan and re-validate the result.
    ///
    /// A plan materialized from a template keeps its name and category:
    /// they identify which template it came from.
    pub fn apply(&self, plan: &PersistedPlan) -> Result<ValidatedPlan, ValidationError> {
        let mut problems = Vec::new();

        if plan.is_preset {
            let renamed = self.name.as_deref().is_some_and(|n| n.trim() != plan.name);
            let recategorized = self
                .category
                .as_deref()
                .is_some_and(|c| c.trim() != plan.category);
            if renamed || recategorized {
                problems.push(
                    "name and category of a plan created from a template cannot be changed"
                        .to_owned(),
                );
            }
        }

        let name = required_text(
            Some(self.name.clone().unwrap_or_else(|| plan.name.clone())),
            "name",
            &mut problems,
        );
        let category = required_text(
            Some(self.category.clone().unwrap_or_else(|| plan.category.clone())),
            "category",
            &mut problems,
        );

        let known = attribute_keys(plan.attributes.0.family());
        problems.extend(
            self.attributes
                .keys()
                .filter(|key| !known.contains(&key.as_str()))
                .map(|key| format!("{key} is not a {} plan field", plan.family)),
        );

        let mut merged = match serde_json::to_value(&plan.attributes.0) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in &self.attributes {
            merged.insert(key.clone(), value.clone());
        }
        if let Some(Value::String(difficulty)) = merged.get_mut("difficulty") {
            *difficulty = difficulty.trim().to_ascii_lowercase();
        }

        let attributes = match serde_json::from_value::<PlanAttributes>(Value::Object(merged)) {
            Ok(attributes) => {
                problems.extend(attribute_problems(&attributes));
                Some(attributes)
            }
            Err(e) => {
                problems.push(format!("invalid attributes: {e}"));
                None
            }
        };

        match (name, category, attributes) {
            (Some(name), Some(category), Some(attributes)) if problems.is_empty() => {
                Ok(ValidatedPlan {
                    name,
                    category,
                    description: match &self.description {
                        Some(d) => d.clone(),
                        None => plan.description.clone(),
                    },
                    tags: self.tags.clone().unwrap_or_else(|| plan.tags.clone()),
                    attributes,
                })
            }
            _ => Err(ValidationError::new(problems)),
        }
    }
}

/// Structural problems with a complete attribute payload.
pub fn attribute_problems(attributes: &PlanAttributes) -> Vec<String> {
    let mut problems = Vec::new();
    match attributes {
        PlanAttributes::Diet(diet) => {
            if diet.calories == 0 {
                problems.push("calories must be greater than zero".to_owned());
            }
            check_meals(&diet.meals, &mut problems);
        }
        PlanAttributes::Workout(workout) => {
            if workout.duration.trim().is_empty() {
                problems.push("duration is required".to_owned());
            }
            if workout.frequency.trim().is_empty() {
                problems.push("frequency is required".to_owned());
            }
            check_exercises(&workout.exercises, &mut problems);
        }
    }
    problems
}

fn required_text(value: Option<String>, field: &str, problems: &mut Vec<String>) -> Option<String> {
    match value.map(|v| v.trim().to_owned()) {
        Some(v) if !v.is_empty() => Some(v),
        _ => {
            problems.push(format!("{field} is required"));
            None
        }
    }
}

fn take_string(
    fields: &mut Map<String, Value>,
    key: &str,
    problems: &mut Vec<String>,
) -> Option<String> {
    match fields.remove(key) {
        None => None,
        Some(Value::String(s)) => Some(s),
        Some(_) => {
            problems.push(format!("{key} must be a string"));
            None
        }
    }
}

fn check_meals(meals: &[Meal], problems: &mut Vec<String>) {
    for (i, meal) in meals.iter().enumerate() {
        if meal.name.trim().is_empty() {
            problems.push(format!("meals[{i}].name is required"));
        }
    }
}

fn check_exercises(exercises: &[Exercise], problems: &mut Vec<String>) {
    if exercises.is_empty() {
        problems.push("at least one exercise is required".to_owned());
    }
    for (i, exercise) in exercises.iter().enumerate() {
        if exercise.name.trim().is_empty() {
            problems.push(format!("exercises[{i}].name is required"));
        }
        if exercise.sets == 0 {
            problems.push(format!("exercises[{i}].sets must be at least 1"));
        }
        let empty_reps = match &exercise.reps {
            RepSpec::Fixed(n) => *n == 0,
            RepSpec::Range(s) => s.trim().is_empty(),
        };
        if empty_reps {
            problems.push(format!("exercises[{i}].reps must not be zero or empty"));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
