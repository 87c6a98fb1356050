use serde::{Deserialize, Serialize};

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginReq {
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResp {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthCheckResp {
    pub authenticated: bool,
}

// Config
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigDto {
    pub persons: Vec<String>,
    pub categories: Vec<String>,
    #[serde(rename = "currentYear")]
    pub current_year: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct YearsDto {
    pub years: Vec<i32>,
}

// Goals
#[derive(Debug, Serialize, Deserialize)]
pub struct GoalDto {
    pub id: i32,
    pub person: String,
    pub year: i32,
    pub title: String,
    pub description: String,
    pub category: String,
    pub progress: i32,
    pub target_date: Option<String>, // YYYY-MM-DD
    pub is_habit: bool,
    pub created_at: String, // RFC3339 UTC
    pub checkins: Vec<CheckinDto>,
    pub milestones: Vec<MilestoneDto>,
    /// Derived at read time from the milestone set; never stored.
    pub milestones_done: usize,
    pub milestones_total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GoalCreateReq {
    pub person: String,
    pub year: i32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub target_date: Option<String>,
    #[serde(default)]
    pub is_habit: bool,
    /// Initial milestone titles, created atomically with the goal.
    #[serde(default)]
    pub milestones: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GoalUpdateReq {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub progress: Option<i32>,
    #[serde(default)]
    pub target_date: Option<String>,
    #[serde(default)]
    pub is_habit: Option<bool>,
}

/// PATCH /api/goals/{id} response: the updated goal plus the completion
/// signal, computed from stored-before vs stored-after progress.
#[derive(Debug, Serialize, Deserialize)]
pub struct GoalUpdateResp {
    #[serde(flatten)]
    pub goal: GoalDto,
    pub just_completed: bool,
}

// Checkins
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckinCreateReq {
    pub note: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckinDto {
    pub id: i32,
    pub goal_id: i32,
    pub note: String,
    pub created_at: String, // RFC3339 UTC
}

// Milestones
#[derive(Debug, Serialize, Deserialize)]
pub struct MilestoneCreateReq {
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MilestoneUpdateReq {
    pub completed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MilestoneDto {
    pub id: i32,
    pub goal_id: i32,
    pub title: String,
    pub completed: bool,
    pub position: i32,
}

// Health
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthDto {
    pub status: String,
}
