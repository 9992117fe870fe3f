use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

// --- progress records ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(format!("unknown enrollment status: {other}")),
        }
    }
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRecord {
    pub learner_id: String,
    pub course_id: String,
    pub status: EnrollmentStatus,
    pub progress: u8,
    pub current_lesson_id: Option<String>,
    #[serde(default)]
    pub completed_lesson_ids: BTreeSet<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabRunRecord {
    pub learner_id: String,
    pub lab_id: String,
    pub progress: u8,
    #[serde(default)]
    pub active_step_index: usize,
    #[serde(default)]
    pub completed_step_ids: BTreeSet<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LabRunRecord {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

// --- catalog ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum RegionCode {
    GH,
    NG,
    #[default]
    US,
    EU,
}

impl RegionCode {
    pub const ALL: [RegionCode; 4] = [RegionCode::GH, RegionCode::NG, RegionCode::US, RegionCode::EU];

    pub fn as_str(self) -> &'static str {
        match self {
            RegionCode::GH => "GH",
            RegionCode::NG => "NG",
            RegionCode::US => "US",
            RegionCode::EU => "EU",
        }
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegionCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GH" => Ok(RegionCode::GH),
            "NG" => Ok(RegionCode::NG),
            "US" => Ok(RegionCode::US),
            "EU" => Ok(RegionCode::EU),
            other => Err(format!("unknown region: {other}")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegionPrice {
    pub region: RegionCode,
    pub currency: String,
    pub amount: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub duration_minutes: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CourseModule {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub duration_hours: u32,
    #[serde(default)]
    pub modules: Vec<CourseModule>,
    #[serde(default)]
    pub pricing: Vec<RegionPrice>,
}

impl Course {
    /// Lesson ids in module order.
    pub fn lesson_ids(&self) -> Vec<&str> {
        self.modules
            .iter()
            .flat_map(|m| m.lessons.iter().map(|l| l.id.as_str()))
            .collect()
    }

    pub fn total_lessons(&self) -> usize {
        self.modules.iter().map(|m| m.lessons.len()).sum()
    }

    pub fn first_lesson_id(&self) -> Option<&str> {
        self.lesson_ids().into_iter().next()
    }

    pub fn price_for(&self, region: RegionCode) -> Option<&RegionPrice> {
        self.pricing.iter().find(|p| p.region == region)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabStep {
    pub id: String,
    pub title: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lab {
    pub id: String,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub duration_minutes: u32,
    #[serde(default)]
    pub steps: Vec<LabStep>,
}

impl Lab {
    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }
}

// --- preferences ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub user: UserProfile,
    pub tokens: TokenPair,
    pub signed_in_at: DateTime<Utc>,
}

// --- request bodies ---

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SignInReq {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EnrollReq {
    pub course_id: String,
    #[serde(default)]
    pub first_item_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CurrentItemReq {
    pub item_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CompleteItemReq {
    pub item_id: String,
    pub total_item_count: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResetReq {
    #[serde(default)]
    pub current_item_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StartLabReq {
    pub lab_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ActiveStepReq {
    pub index: usize,
    pub total_steps: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CompleteStepReq {
    pub step_id: String,
    pub total_steps: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegionReq {
    pub region: RegionCode,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ThemeReq {
    pub theme: Theme,
}
