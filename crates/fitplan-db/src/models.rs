use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Plan family. Each family has its own single-active invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Diet,
    Workout,
}

impl Family {
    pub const ALL: [Family; 2] = [Family::Diet, Family::Workout];
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Diet => "diet",
            Self::Workout => "workout",
        };
        f.write_str(s)
    }
}

impl FromStr for Family {
    type Err = FamilyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "diet" => Ok(Self::Diet),
            "workout" => Ok(Self::Workout),
            other => Err(FamilyParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Family`] string.
#[derive(Debug, Clone)]
pub struct FamilyParseError(pub String);

impl fmt::Display for FamilyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan family: {:?} (expected diet or workout)", self.0)
    }
}

impl std::error::Error for FamilyParseError {}

// ---------------------------------------------------------------------------

/// How an owned plan came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Materialized from a catalog template.
    Preset,
    /// Created directly by the user.
    Custom,
}

impl Provenance {
    pub fn is_preset(self) -> bool {
        self == Self::Preset
    }

    pub fn is_custom(self) -> bool {
        self == Self::Custom
    }
}

// ---------------------------------------------------------------------------

/// Workout difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        };
        f.write_str(s)
    }
}

impl FromStr for Difficulty {
    type Err = DifficultyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "beginner" => Ok(Self::Beginner),
            "intermediate" => Ok(Self::Intermediate),
            "advanced" => Ok(Self::Advanced),
            _ => Err(DifficultyParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Difficulty`] string.
#[derive(Debug, Clone)]
pub struct DifficultyParseError(pub String);

impl fmt::Display for DifficultyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid difficulty: {:?} (expected beginner, intermediate, or advanced)",
            self.0
        )
    }
}

impl std::error::Error for DifficultyParseError {}

// ---------------------------------------------------------------------------

/// Repetition target for an exercise.
///
/// On the wire this is either a bare number (`12`) or a descriptive string
/// (`"8-12"`, `"to failure"`, `"30s hold"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepSpec {
    Fixed(u32),
    Range(String),
}

impl fmt::Display for RepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "{n}"),
            Self::Range(s) => f.write_str(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Attribute payloads
// ---------------------------------------------------------------------------

/// A meal within a diet plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<u32>,
    #[serde(default)]
    pub items: Vec<String>,
}

/// Diet-specific attributes. Macros are in grams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DietAttributes {
    pub calories: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fats: Option<u32>,
    #[serde(default)]
    pub meals: Vec<Meal>,
}

/// A single exercise in a workout plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub name: String,
    pub sets: u32,
    pub reps: RepSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Workout-specific attributes.
///
/// `duration` and `frequency` are free text as shown to users
/// (e.g. `"45 minutes"`, `"4x per week"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutAttributes {
    pub difficulty: Difficulty,
    pub duration: String,
    pub frequency: String,
    pub exercises: Vec<Exercise>,
}

/// Family-specific plan attributes, stored as JSONB tagged by `family`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum PlanAttributes {
    Diet(DietAttributes),
    Workout(WorkoutAttributes),
}

impl PlanAttributes {
    pub fn family(&self) -> Family {
        match self {
            Self::Diet(_) => Family::Diet,
            Self::Workout(_) => Family::Workout,
        }
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// An owned plan record (`user_plans`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPlan {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub family: Family,
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub attributes: Json<PlanAttributes>,
    pub tags: Vec<String>,
    pub is_active: bool,
    pub is_preset: bool,
    pub is_custom: bool,
    pub template_id: Option<String>,
    pub last_active_update: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The parts of a user record this engine reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub active_diet_plan_id: Option<Uuid>,
    pub active_workout_plan_id: Option<Uuid>,
    pub last_active_plan_update: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PersistedPlan {
    pub fn provenance(&self) -> Provenance {
        if self.is_preset {
            Provenance::Preset
        } else {
            Provenance::Custom
        }
    }
}

impl User {
    /// The pointer field for `family`.
    pub fn active_plan_id(&self, family: Family) -> Option<Uuid> {
        match family {
            Family::Diet => self.active_diet_plan_id,
            Family::Workout => self.active_workout_plan_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
