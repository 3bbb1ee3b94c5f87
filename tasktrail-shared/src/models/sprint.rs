/// Sprint model and database operations
///
/// Sprints group tasks into time boxes. Status only moves forward:
///
/// ```text
/// planning → active → completed
/// ```
///
/// # Schema
///
/// ```sql
/// CREATE TYPE sprint_status AS ENUM ('planning', 'active', 'completed');
///
/// CREATE TABLE sprints (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     organization_id UUID NOT NULL REFERENCES organizations(id),
///     name VARCHAR(255) NOT NULL,
///     goal TEXT,
///     status sprint_status NOT NULL DEFAULT 'planning',
///     start_date DATE NOT NULL,
///     end_date DATE NOT NULL,
///     created_by UUID NOT NULL REFERENCES users(id),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     CONSTRAINT sprints_dates_check CHECK (end_date >= start_date)
/// );
/// ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

const SPRINT_COLUMNS: &str = "id, organization_id, name, goal, status, start_date, end_date, \
                              created_by, created_at, updated_at";

/// Sprint lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "sprint_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SprintStatus {
    Planning,
    Active,
    Completed,
}

impl SprintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SprintStatus::Planning => "planning",
            SprintStatus::Active => "active",
            SprintStatus::Completed => "completed",
        }
    }

    /// Checks if transition to target status is valid
    pub fn can_transition_to(&self, target: SprintStatus) -> bool {
        matches!(
            (self, target),
            (SprintStatus::Planning, SprintStatus::Active)
                | (SprintStatus::Active, SprintStatus::Completed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sprint {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub goal: Option<String>,
    pub status: SprintStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new sprint
#[derive(Debug, Clone)]
pub struct CreateSprint {
    pub organization_id: Uuid,
    pub name: String,
    pub goal: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_by: Uuid,
}

/// Editable sprint fields; `goal: Some(None)` clears the goal
#[derive(Debug, Clone, Default)]
pub struct UpdateSprint {
    pub name: Option<String>,
    pub goal: Option<Option<String>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl UpdateSprint {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.goal.is_none() && self.start_date.is_none() && self.end_date.is_none()
    }

    /// Applies the changes to an in-memory sprint
    pub fn apply(self, sprint: &mut Sprint) {
        if let Some(name) = self.name {
            sprint.name = name;
        }
        if let Some(goal) = self.goal {
            sprint.goal = goal;
        }
        if let Some(start_date) = self.start_date {
            sprint.start_date = start_date;
        }
        if let Some(end_date) = self.end_date {
            sprint.end_date = end_date;
        }
    }
}

impl Sprint {
    /// Checks the date range the table constraint enforces
    pub fn has_valid_dates(&self) -> bool {
        self.end_date >= self.start_date
    }

    pub async fn create<'e, E>(executor: E, data: CreateSprint) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "INSERT INTO sprints (organization_id, name, goal, start_date, end_date, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            SPRINT_COLUMNS
        );

        sqlx::query_as::<_, Sprint>(&query)
            .bind(data.organization_id)
            .bind(data.name)
            .bind(data.goal)
            .bind(data.start_date)
            .bind(data.end_date)
            .bind(data.created_by)
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!("SELECT {} FROM sprints WHERE id = $1", SPRINT_COLUMNS);

        sqlx::query_as::<_, Sprint>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Locks a sprint row for the rest of the transaction
    pub async fn find_for_update<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!("SELECT {} FROM sprints WHERE id = $1 FOR UPDATE", SPRINT_COLUMNS);

        sqlx::query_as::<_, Sprint>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn save<'e, E>(executor: E, sprint: &Sprint) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "UPDATE sprints SET name = $2, goal = $3, start_date = $4, end_date = $5, \
             updated_at = NOW() WHERE id = $1 RETURNING {}",
            SPRINT_COLUMNS
        );

        sqlx::query_as::<_, Sprint>(&query)
            .bind(sprint.id)
            .bind(&sprint.name)
            .bind(&sprint.goal)
            .bind(sprint.start_date)
            .bind(sprint.end_date)
            .fetch_one(executor)
            .await
    }

    pub async fn set_status<'e, E>(
        executor: E,
        id: Uuid,
        status: SprintStatus,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "UPDATE sprints SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            SPRINT_COLUMNS
        );

        sqlx::query_as::<_, Sprint>(&query)
            .bind(id)
            .bind(status)
            .fetch_optional(executor)
            .await
    }

    /// Number of tasks still scheduled in the sprint
    pub async fn task_count<'e, E>(executor: E, id: Uuid) -> Result<i64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE sprint_id = $1")
            .bind(id)
            .fetch_one(executor)
            .await?;

        Ok(count.0)
    }

    /// Deletes a sprint
    ///
    /// Fails with a foreign key violation while tasks still reference it;
    /// check [`Sprint::task_count`] first.
    pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM sprints WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists sprints for an organization, latest start date first
    pub async fn list_by_organization(
        pool: &PgPool,
        organization_id: Uuid,
        status: Option<SprintStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let sprints = if let Some(status) = status {
            let query = format!(
                "SELECT {} FROM sprints WHERE organization_id = $1 AND status = $2 \
                 ORDER BY start_date DESC, id DESC LIMIT $3 OFFSET $4",
                SPRINT_COLUMNS
            );
            sqlx::query_as::<_, Sprint>(&query)
                .bind(organization_id)
                .bind(status)
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?
        } else {
            let query = format!(
                "SELECT {} FROM sprints WHERE organization_id = $1 \
                 ORDER BY start_date DESC, id DESC LIMIT $2 OFFSET $3",
                SPRINT_COLUMNS
            );
            sqlx::query_as::<_, Sprint>(&query)
                .bind(organization_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?
        };

        Ok(sprints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_sprint() -> Sprint {
        Sprint {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "Sprint 1".to_string(),
            goal: Some("Ship login".to_string()),
            status: SprintStatus::Planning,
            start_date: date(2025, 3, 3),
            end_date: date(2025, 3, 14),
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_moves_forward_only() {
        assert!(SprintStatus::Planning.can_transition_to(SprintStatus::Active));
        assert!(SprintStatus::Active.can_transition_to(SprintStatus::Completed));

        assert!(!SprintStatus::Planning.can_transition_to(SprintStatus::Completed));
        assert!(!SprintStatus::Completed.can_transition_to(SprintStatus::Active));
        assert!(!SprintStatus::Active.can_transition_to(SprintStatus::Active));
    }

    #[test]
    fn test_apply_and_date_check() {
        let mut sprint = sample_sprint();
        assert!(sprint.has_valid_dates());

        UpdateSprint {
            goal: Some(None),
            end_date: Some(date(2025, 3, 1)),
            ..Default::default()
        }
        .apply(&mut sprint);

        assert_eq!(sprint.goal, None);
        assert_eq!(sprint.name, "Sprint 1");
        assert!(!sprint.has_valid_dates());
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(SprintStatus::Planning.as_str(), "planning");
        assert_eq!(SprintStatus::Completed.as_str(), "completed");
    }
}
