pub mod models;
pub mod schema;

use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use models::{Checkin, Goal, GoalChanges, Milestone, NewCheckin, NewGoal, NewMilestone, NewSession};

/// Hard cap on milestones per goal.
pub const MILESTONE_CAP: usize = 10;

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The referenced row does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The goal already has the maximum number of milestones.
    #[error("goal already has the maximum of {MILESTONE_CAP} milestones")]
    MilestoneLimit,
}

/// A goal together with its children, display-ordered: checkins newest
/// first, milestones in creation order.
pub type GoalWithChildren = (Goal, Vec<Checkin>, Vec<Milestone>);

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    pub async fn list_goals(
        &self,
        year: Option<i32>,
        person: Option<&str>,
    ) -> Result<Vec<GoalWithChildren>, StorageError> {
        use schema::goals;
        let pool = self.pool.clone();
        let person_owned = person.map(|s| s.to_string());
        tokio::task::spawn_blocking(move || -> Result<Vec<GoalWithChildren>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let mut query = goals::table.into_boxed();
            if let Some(y) = year {
                query = query.filter(goals::year.eq(y));
            }
            if let Some(p) = &person_owned {
                query = query.filter(goals::person.eq(p));
            }
            let parents = query.order(goals::created_at.desc()).load::<Goal>(&mut conn)?;
            load_children(&mut conn, parents)
        })
        .await?
    }

    pub async fn get_goal(&self, goal_id: i32) -> Result<GoalWithChildren, StorageError> {
        use schema::goals;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<GoalWithChildren, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let goal = goals::table
                .filter(goals::id.eq(goal_id))
                .first::<Goal>(&mut conn)
                .optional()?
                .ok_or(StorageError::NotFound("goal"))?;
            let mut rows = load_children(&mut conn, vec![goal])?;
            Ok(rows.remove(0))
        })
        .await?
    }

    /// Create a goal and its initial milestones in one transaction.
    /// `milestone_titles` is expected to be pre-validated and capped.
    pub async fn create_goal(
        &self,
        goal: NewGoalSpec,
    ) -> Result<GoalWithChildren, StorageError> {
        use schema::{goals, milestones};
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<GoalWithChildren, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let created = conn.immediate_transaction(|conn| -> Result<Goal, StorageError> {
                let new_goal = NewGoal {
                    person: &goal.person,
                    year: goal.year,
                    title: &goal.title,
                    description: &goal.description,
                    category: &goal.category,
                    target_date: goal.target_date.as_deref(),
                    is_habit: goal.is_habit,
                };
                let row: Goal = diesel::insert_into(goals::table)
                    .values(&new_goal)
                    .get_result(conn)?;
                for (i, title) in goal.milestone_titles.iter().enumerate() {
                    let m = NewMilestone {
                        goal_id: row.id,
                        title,
                        position: i as i32,
                    };
                    diesel::insert_into(milestones::table).values(&m).execute(conn)?;
                }
                Ok(row)
            })?;
            let mut rows = load_children(&mut conn, vec![created])?;
            Ok(rows.remove(0))
        })
        .await?
    }

    /// Apply a partial update, returning the progress value stored before
    /// the write alongside the updated goal. The caller derives the
    /// completion transition from the pair.
    pub async fn update_goal(
        &self,
        goal_id: i32,
        changes: GoalChanges,
    ) -> Result<(i32, GoalWithChildren), StorageError> {
        use schema::goals;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(i32, GoalWithChildren), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let (old_progress, updated) =
                conn.immediate_transaction(|conn| -> Result<(i32, Goal), StorageError> {
                    let before = goals::table
                        .filter(goals::id.eq(goal_id))
                        .first::<Goal>(conn)
                        .optional()?
                        .ok_or(StorageError::NotFound("goal"))?;
                    let now = Utc::now().naive_utc();
                    diesel::update(goals::table.filter(goals::id.eq(goal_id)))
                        .set((&changes, goals::updated_at.eq(now)))
                        .execute(conn)?;
                    let after = goals::table
                        .filter(goals::id.eq(goal_id))
                        .first::<Goal>(conn)?;
                    Ok((before.progress, after))
                })?;
            let mut rows = load_children(&mut conn, vec![updated])?;
            Ok((old_progress, rows.remove(0)))
        })
        .await?
    }

    /// Delete a goal and all of its checkins and milestones atomically.
    pub async fn delete_goal(&self, goal_id: i32) -> Result<(), StorageError> {
        use schema::{checkins, goals, milestones};
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                diesel::delete(checkins::table.filter(checkins::goal_id.eq(goal_id)))
                    .execute(conn)?;
                diesel::delete(milestones::table.filter(milestones::goal_id.eq(goal_id)))
                    .execute(conn)?;
                let deleted = diesel::delete(goals::table.filter(goals::id.eq(goal_id)))
                    .execute(conn)?;
                if deleted == 0 {
                    return Err(StorageError::NotFound("goal"));
                }
                Ok(())
            })
        })
        .await?
    }

    pub async fn add_checkin(&self, goal_id: i32, note: &str) -> Result<Checkin, StorageError> {
        use schema::{checkins, goals};
        let pool = self.pool.clone();
        let note_owned = note.to_string();
        tokio::task::spawn_blocking(move || -> Result<Checkin, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<Checkin, StorageError> {
                let exists: i64 = goals::table
                    .filter(goals::id.eq(goal_id))
                    .count()
                    .get_result(conn)?;
                if exists == 0 {
                    return Err(StorageError::NotFound("goal"));
                }
                let new_row = NewCheckin {
                    goal_id,
                    note: &note_owned,
                };
                Ok(diesel::insert_into(checkins::table)
                    .values(&new_row)
                    .get_result(conn)?)
            })
        })
        .await?
    }

    pub async fn delete_checkin(&self, checkin_id: i32) -> Result<(), StorageError> {
        use schema::checkins::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted =
                diesel::delete(checkins.filter(id.eq(checkin_id))).execute(&mut conn)?;
            if deleted == 0 {
                return Err(StorageError::NotFound("checkin"));
            }
            Ok(())
        })
        .await?
    }

    /// Append a milestone; the cap check and position assignment share one
    /// transaction so concurrent adds cannot overshoot the cap.
    pub async fn add_milestone(
        &self,
        goal_id: i32,
        title: &str,
    ) -> Result<Milestone, StorageError> {
        use schema::{goals, milestones};
        let pool = self.pool.clone();
        let title_owned = title.to_string();
        tokio::task::spawn_blocking(move || -> Result<Milestone, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<Milestone, StorageError> {
                let exists: i64 = goals::table
                    .filter(goals::id.eq(goal_id))
                    .count()
                    .get_result(conn)?;
                if exists == 0 {
                    return Err(StorageError::NotFound("goal"));
                }
                let count: i64 = milestones::table
                    .filter(milestones::goal_id.eq(goal_id))
                    .count()
                    .get_result(conn)?;
                if count as usize >= MILESTONE_CAP {
                    return Err(StorageError::MilestoneLimit);
                }
                let new_row = NewMilestone {
                    goal_id,
                    title: &title_owned,
                    position: count as i32,
                };
                Ok(diesel::insert_into(milestones::table)
                    .values(&new_row)
                    .get_result(conn)?)
            })
        })
        .await?
    }

    /// Idempotent: setting the current value again is a no-op success.
    pub async fn set_milestone_completed(
        &self,
        milestone_id: i32,
        value: bool,
    ) -> Result<Milestone, StorageError> {
        use schema::milestones::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Milestone, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            diesel::update(milestones.filter(id.eq(milestone_id)))
                .set(completed.eq(value))
                .execute(&mut conn)?;
            milestones
                .filter(id.eq(milestone_id))
                .first::<Milestone>(&mut conn)
                .optional()?
                .ok_or(StorageError::NotFound("milestone"))
        })
        .await?
    }

    pub async fn delete_milestone(&self, milestone_id: i32) -> Result<(), StorageError> {
        use schema::milestones::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted =
                diesel::delete(milestones.filter(id.eq(milestone_id))).execute(&mut conn)?;
            if deleted == 0 {
                return Err(StorageError::NotFound("milestone"));
            }
            Ok(())
        })
        .await?
    }

    pub async fn list_years(&self) -> Result<Vec<i32>, StorageError> {
        use schema::goals::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<i32>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(goals
                .select(year)
                .distinct()
                .order(year.desc())
                .load::<i32>(&mut conn)?)
        })
        .await?
    }

    // Session helpers backing JWT revocation and idle expiry
    pub async fn create_session(&self, jti_: &str) -> Result<(), StorageError> {
        use schema::sessions;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let new = NewSession { jti: &j };
            diesel::insert_into(sessions::table)
                .values(&new)
                .on_conflict_do_nothing()
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    pub async fn delete_session(&self, jti_: &str) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted = diesel::delete(sessions.filter(jti.eq(&j))).execute(&mut conn)?;
            Ok(deleted > 0)
        })
        .await?
    }

    /// Touch session atomically, but only if it hasn't expired.
    /// Returns `true` if the session was found and updated, `false` otherwise.
    ///
    /// This combines the idle timeout check and the `last_used_at` update into
    /// a single atomic UPDATE, eliminating the race condition between checking
    /// and updating the session.
    pub async fn touch_session_with_cutoff(
        &self,
        jti_: &str,
        cutoff: chrono::NaiveDateTime,
    ) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = Utc::now().naive_utc();
            let updated =
                diesel::update(sessions.filter(jti.eq(&j)).filter(last_used_at.ge(cutoff)))
                    .set(last_used_at.eq(now))
                    .execute(&mut conn)?;
            Ok(updated > 0)
        })
        .await?
    }
}

/// Input for [`Store::create_goal`]; owned strings because the insert runs
/// on a blocking thread.
#[derive(Debug, Clone)]
pub struct NewGoalSpec {
    pub person: String,
    pub year: i32,
    pub title: String,
    pub description: String,
    pub category: String,
    pub target_date: Option<String>,
    pub is_habit: bool,
    pub milestone_titles: Vec<String>,
}

fn load_children(
    conn: &mut SqliteConnection,
    parents: Vec<Goal>,
) -> Result<Vec<GoalWithChildren>, StorageError> {
    use schema::{checkins, milestones};
    let checkin_rows = Checkin::belonging_to(&parents)
        .order(checkins::created_at.desc())
        .load::<Checkin>(conn)?
        .grouped_by(&parents);
    let milestone_rows = Milestone::belonging_to(&parents)
        .order(milestones::position.asc())
        .load::<Milestone>(conn)?
        .grouped_by(&parents);
    Ok(parents
        .into_iter()
        .zip(checkin_rows)
        .zip(milestone_rows)
        .map(|((g, c), m)| (g, c, m))
        .collect())
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // WAL for read/write concurrency, busy timeout for writer contention,
    // and FK enforcement so child rows can never outlive their goal.
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::connect_sqlite(path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    fn spec(person: &str, year: i32, title: &str) -> NewGoalSpec {
        NewGoalSpec {
            person: person.into(),
            year,
            title: title.into(),
            description: String::new(),
            category: "Health".into(),
            target_date: None,
            is_habit: false,
            milestone_titles: vec![],
        }
    }

    #[tokio::test]
    async fn goal_crud_roundtrip() {
        let (store, _dir) = temp_store().await;
        let (goal, cks, ms) = store.create_goal(spec("Mark", 2026, "Run 500km")).await.unwrap();
        assert_eq!(goal.progress, 0);
        assert!(cks.is_empty());
        assert!(ms.is_empty());

        let listed = store.list_goals(Some(2026), None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0.title, "Run 500km");

        let changes = GoalChanges {
            progress: Some(40),
            ..Default::default()
        };
        let (old, (updated, _, _)) = store.update_goal(goal.id, changes).await.unwrap();
        assert_eq!(old, 0);
        assert_eq!(updated.progress, 40);

        store.delete_goal(goal.id).await.unwrap();
        assert!(store.list_goals(Some(2026), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn year_filter_is_exact() {
        let (store, _dir) = temp_store().await;
        store.create_goal(spec("Mark", 2025, "Old goal")).await.unwrap();
        store.create_goal(spec("Mark", 2026, "New goal")).await.unwrap();
        store.create_goal(spec("Gabs", 2026, "Another")).await.unwrap();

        let y2026 = store.list_goals(Some(2026), None).await.unwrap();
        assert_eq!(y2026.len(), 2);
        assert!(y2026.iter().all(|(g, _, _)| g.year == 2026));

        let marks = store.list_goals(Some(2026), Some("Mark")).await.unwrap();
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].0.person, "Mark");
    }

    #[tokio::test]
    async fn delete_goal_cascades_to_children() {
        let (store, _dir) = temp_store().await;
        let mut s = spec("Mark", 2026, "Read 12 books");
        s.milestone_titles = vec!["Book 1".into(), "Book 2".into()];
        let (goal, _, ms) = store.create_goal(s).await.unwrap();
        assert_eq!(ms.len(), 2);
        let checkin = store.add_checkin(goal.id, "Finished chapter one").await.unwrap();

        store.delete_goal(goal.id).await.unwrap();

        assert!(matches!(
            store.delete_checkin(checkin.id).await,
            Err(StorageError::NotFound("checkin"))
        ));
        assert!(matches!(
            store.delete_milestone(ms[0].id).await,
            Err(StorageError::NotFound("milestone"))
        ));
        assert!(matches!(
            store.get_goal(goal.id).await,
            Err(StorageError::NotFound("goal"))
        ));
    }

    #[tokio::test]
    async fn milestone_cap_enforced() {
        let (store, _dir) = temp_store().await;
        let (goal, _, _) = store.create_goal(spec("Gabs", 2026, "Save money")).await.unwrap();
        for i in 0..MILESTONE_CAP {
            store
                .add_milestone(goal.id, &format!("Step {i}"))
                .await
                .unwrap();
        }
        assert!(matches!(
            store.add_milestone(goal.id, "One too many").await,
            Err(StorageError::MilestoneLimit)
        ));
    }

    #[tokio::test]
    async fn milestone_toggle_is_idempotent() {
        let (store, _dir) = temp_store().await;
        let (goal, _, _) = store.create_goal(spec("Mark", 2026, "Meditate")).await.unwrap();
        let m = store.add_milestone(goal.id, "30 days straight").await.unwrap();
        assert!(!m.completed);

        let toggled = store.set_milestone_completed(m.id, true).await.unwrap();
        assert!(toggled.completed);
        let again = store.set_milestone_completed(m.id, true).await.unwrap();
        assert!(again.completed);
        let back = store.set_milestone_completed(m.id, false).await.unwrap();
        assert!(!back.completed);
    }

    #[tokio::test]
    async fn years_listed_distinct_desc() {
        let (store, _dir) = temp_store().await;
        store.create_goal(spec("Mark", 2024, "A")).await.unwrap();
        store.create_goal(spec("Mark", 2026, "B")).await.unwrap();
        store.create_goal(spec("Gabs", 2026, "C")).await.unwrap();
        assert_eq!(store.list_years().await.unwrap(), vec![2026, 2024]);
    }

    #[tokio::test]
    async fn sessions_touch_and_delete() {
        let (store, _dir) = temp_store().await;
        store.create_session("jti-1").await.unwrap();
        let cutoff = (Utc::now() - chrono::Duration::days(30)).naive_utc();
        assert!(store.touch_session_with_cutoff("jti-1", cutoff).await.unwrap());
        assert!(store.delete_session("jti-1").await.unwrap());
        assert!(!store.touch_session_with_cutoff("jti-1", cutoff).await.unwrap());
    }
}
