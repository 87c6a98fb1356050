//! Monthly summary email: renders the shared goal list into an HTML digest
//! and hands it to the configured HTTP mail API.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::time::Duration;
use tinytemplate::TinyTemplate;
use yeargoals_shared::api::GoalDto;

use super::{AppError, AppState, EmailConfig};

const SUMMARY_TEMPLATE: &str = include_str!("../../templates/monthly_summary.html");

/// Delivery must not hang the request forever.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// How many of the newest checkins to show per goal.
const RECENT_CHECKINS: usize = 2;

const QUOTES: &[&str] = &[
    "The secret of getting ahead is getting started.",
    "It does not matter how slowly you go as long as you do not stop.",
    "Success is the sum of small efforts repeated day in and day out.",
    "A year from now you may wish you had started today.",
    "Progress, not perfection.",
    "Small steps every day lead to big changes.",
    "Together you can achieve anything.",
    "Every accomplishment starts with the decision to try.",
];

#[derive(Serialize)]
struct SummaryCtx {
    month: String,
    quote: String,
    total_goals: usize,
    completed_goals: usize,
    avg_progress: i32,
    app_url: String,
    sections: Vec<PersonSection>,
}

#[derive(Serialize)]
struct PersonSection {
    person: String,
    empty: bool,
    goals: Vec<GoalRow>,
}

#[derive(Serialize)]
struct GoalRow {
    title: String,
    category: String,
    progress: i32,
    emoji: String,
    has_recent: bool,
    recent: Vec<CheckinRow>,
}

#[derive(Serialize)]
struct CheckinRow {
    date: String,
    note: String,
}

pub async fn send_summary(state: &AppState, year: i32) -> Result<(), AppError> {
    let Some(email_cfg) = &state.config.email else {
        return Err(AppError::bad_request(
            "email is not configured; set the email section in the config file",
        ));
    };
    let rows = state.store.list_goals(Some(year), None).await?;
    let goals: Vec<GoalDto> = rows.into_iter().map(super::goal_dto).collect();

    let now = Utc::now();
    let (subject, html) = build_summary(
        &state.config.persons,
        &goals,
        &now.format("%B %Y").to_string(),
        now.ordinal() as usize,
        email_cfg.app_url.as_deref().unwrap_or("/"),
    )?;
    deliver(email_cfg, &subject, &html).await
}

/// Pure rendering step, separated from delivery so it can be tested
/// without a mail endpoint. `day_seed` varies the quote across sends.
pub fn build_summary(
    persons: &[String],
    goals: &[GoalDto],
    month: &str,
    day_seed: usize,
    app_url: &str,
) -> Result<(String, String), AppError> {
    let total_goals = goals.len();
    let completed_goals = goals.iter().filter(|g| g.progress == 100).count();
    let avg_progress = if total_goals > 0 {
        (goals.iter().map(|g| g.progress as i64).sum::<i64>() / total_goals as i64) as i32
    } else {
        0
    };

    let sections = persons
        .iter()
        .map(|person| {
            let rows: Vec<GoalRow> = goals
                .iter()
                .filter(|g| &g.person == person)
                .map(goal_row)
                .collect();
            PersonSection {
                person: person.clone(),
                empty: rows.is_empty(),
                goals: rows,
            }
        })
        .collect();

    let ctx = SummaryCtx {
        month: month.to_string(),
        quote: QUOTES[day_seed % QUOTES.len()].to_string(),
        total_goals,
        completed_goals,
        avg_progress,
        app_url: app_url.to_string(),
        sections,
    };

    let mut tt = TinyTemplate::new();
    tt.add_template("summary", SUMMARY_TEMPLATE)
        .map_err(AppError::internal)?;
    let html = tt.render("summary", &ctx).map_err(AppError::internal)?;
    let subject = format!("Your Goals Update - {month}");
    Ok((subject, html))
}

fn goal_row(goal: &GoalDto) -> GoalRow {
    let emoji = match goal.progress {
        100 => "\u{1F389}",       // party popper
        75..=99 => "\u{1F525}",   // fire
        50..=74 => "\u{1F4AA}",   // flexed biceps
        _ => "\u{1F331}",         // seedling
    };
    let recent: Vec<CheckinRow> = goal
        .checkins
        .iter()
        .take(RECENT_CHECKINS)
        .map(|c| CheckinRow {
            date: DateTime::parse_from_rfc3339(&c.created_at)
                .map(|dt| dt.format("%b %d").to_string())
                .unwrap_or_else(|_| c.created_at.clone()),
            note: c.note.chars().take(100).collect(),
        })
        .collect();
    GoalRow {
        title: goal.title.clone(),
        category: goal.category.clone(),
        progress: goal.progress,
        emoji: emoji.to_string(),
        has_recent: !recent.is_empty(),
        recent,
    }
}

#[derive(Serialize)]
struct MailPayload<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
}

async fn deliver(cfg: &EmailConfig, subject: &str, html: &str) -> Result<(), AppError> {
    if cfg.recipients.is_empty() {
        return Err(AppError::bad_request("no email recipients configured"));
    }
    let client = reqwest::Client::builder()
        .timeout(SEND_TIMEOUT)
        .build()
        .map_err(AppError::internal)?;
    let payload = MailPayload {
        from: &cfg.from,
        to: &cfg.recipients,
        subject,
        html,
    };
    let resp = client
        .post(&cfg.endpoint)
        .bearer_auth(&cfg.api_key)
        .json(&payload)
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error=%e, "email: delivery request failed");
            AppError::internal(e)
        })?;
    if !resp.status().is_success() {
        let status = resp.status();
        tracing::error!(%status, "email: mail API rejected the message");
        return Err(AppError::internal(format!("mail API returned {status}")));
    }
    tracing::info!(recipients = cfg.recipients.len(), "email: summary sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use yeargoals_shared::api::{CheckinDto, GoalDto};

    fn goal(person: &str, title: &str, progress: i32) -> GoalDto {
        GoalDto {
            id: 1,
            person: person.into(),
            year: 2026,
            title: title.into(),
            description: String::new(),
            category: "Health".into(),
            progress,
            target_date: None,
            is_habit: false,
            created_at: "2026-01-10T12:00:00+00:00".into(),
            checkins: vec![],
            milestones: vec![],
            milestones_done: 0,
            milestones_total: 0,
        }
    }

    #[test]
    fn subject_carries_month() {
        let persons = vec!["Mark".to_string(), "Gabs".to_string()];
        let (subject, _) =
            build_summary(&persons, &[], "March 2026", 0, "https://goals.example").unwrap();
        assert_eq!(subject, "Your Goals Update - March 2026");
    }

    #[test]
    fn renders_sections_per_person() {
        let persons = vec!["Mark".to_string(), "Gabs".to_string()];
        let goals = vec![
            goal("Mark", "Run 500km", 100),
            goal("Mark", "Read 12 books", 40),
        ];
        let (_, html) =
            build_summary(&persons, &goals, "March 2026", 3, "https://goals.example").unwrap();
        assert!(html.contains("Run 500km"));
        assert!(html.contains("Mark's Goals"));
        // Gabs has no goals yet; the empty placeholder renders instead
        assert!(html.contains("No goals set yet for Gabs"));
        assert!(html.contains("https://goals.example"));
    }

    #[test]
    fn stats_are_aggregated() {
        let persons = vec!["Mark".to_string()];
        let goals = vec![goal("Mark", "A", 100), goal("Mark", "B", 0)];
        let (_, html) = build_summary(&persons, &goals, "June 2026", 1, "/").unwrap();
        // 2 goals, 1 completed, 50% average
        assert!(html.contains(">2</span>"));
        assert!(html.contains(">1</span>"));
        assert!(html.contains(">50%</span>"));
    }

    #[test]
    fn recent_checkins_limited_and_dated() {
        let persons = vec!["Mark".to_string()];
        let mut g = goal("Mark", "Run", 10);
        g.checkins = (0..4)
            .map(|i| CheckinDto {
                id: i,
                goal_id: 1,
                note: format!("note {i}"),
                created_at: "2026-02-14T08:30:00+00:00".into(),
            })
            .collect();
        let row = goal_row(&g);
        assert_eq!(row.recent.len(), RECENT_CHECKINS);
        assert_eq!(row.recent[0].date, "Feb 14");
    }
}
