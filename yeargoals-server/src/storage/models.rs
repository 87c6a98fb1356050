use crate::storage::schema::{checkins, goals, milestones, sessions};
use chrono::NaiveDateTime;
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = goals)]
pub struct Goal {
    pub id: i32,
    pub person: String,
    pub year: i32,
    pub title: String,
    pub description: String,
    pub category: String,
    pub progress: i32,
    pub target_date: Option<String>,
    pub is_habit: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = goals)]
pub struct NewGoal<'a> {
    pub person: &'a str,
    pub year: i32,
    pub title: &'a str,
    pub description: &'a str,
    pub category: &'a str,
    pub target_date: Option<&'a str>,
    pub is_habit: bool,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = goals)]
pub struct GoalChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub progress: Option<i32>,
    pub target_date: Option<String>,
    pub is_habit: Option<bool>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = checkins)]
#[diesel(belongs_to(Goal, foreign_key = goal_id))]
pub struct Checkin {
    pub id: i32,
    pub goal_id: i32,
    pub note: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = checkins)]
pub struct NewCheckin<'a> {
    pub goal_id: i32,
    pub note: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = milestones)]
#[diesel(belongs_to(Goal, foreign_key = goal_id))]
pub struct Milestone {
    pub id: i32,
    pub goal_id: i32,
    pub title: String,
    pub completed: bool,
    pub position: i32,
}

#[derive(Insertable)]
#[diesel(table_name = milestones)]
pub struct NewMilestone<'a> {
    pub goal_id: i32,
    pub title: &'a str,
    pub position: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = sessions)]
#[diesel(primary_key(jti))]
pub struct Session {
    pub jti: String,
    pub issued_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub jti: &'a str,
}
