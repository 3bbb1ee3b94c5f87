/// Task model and database operations
///
/// Tasks are the main work items of an organization. List queries are scoped
/// by `organization_id`; single-row lookups return the owning organization so
/// handlers can hand it to the permission evaluator.
///
/// # Status
///
/// ```text
/// todo ⇄ in_progress ⇄ done
///   any → cancelled → todo
/// ```
///
/// # Schema
///
/// ```sql
/// CREATE TYPE task_status AS ENUM ('todo', 'in_progress', 'done', 'cancelled');
/// CREATE TYPE task_priority AS ENUM ('low', 'medium', 'high', 'critical');
///
/// CREATE TABLE tasks (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     organization_id UUID NOT NULL REFERENCES organizations(id),
///     sprint_id UUID REFERENCES sprints(id) ON DELETE SET NULL,
///     title VARCHAR(255) NOT NULL,
///     description TEXT,
///     status task_status NOT NULL DEFAULT 'todo',
///     priority task_priority NOT NULL DEFAULT 'medium',
///     assignee_id UUID REFERENCES users(id),
///     created_by UUID NOT NULL REFERENCES users(id),
///     estimated_hours DOUBLE PRECISION,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use tasktrail_shared::models::task::{CreateTask, Task, TaskPriority};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, org: Uuid, user: Uuid) -> Result<(), sqlx::Error> {
/// let mut tx = pool.begin().await?;
/// let task = Task::create(&mut *tx, CreateTask {
///     organization_id: org,
///     sprint_id: None,
///     title: "Write release notes".to_string(),
///     description: None,
///     priority: TaskPriority::High,
///     assignee_id: Some(user),
///     created_by: user,
///     estimated_hours: Some(2.0),
/// }).await?;
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, organization_id, sprint_id, title, description, status, priority, \
                            assignee_id, created_by, estimated_hours, created_at, updated_at";

/// Task workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Checks if a status change is allowed
    ///
    /// Work can move freely between the open states and may be cancelled at
    /// any point. A cancelled task can only be reopened as `todo`.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        match (self, target) {
            (from, to) if *from == to => false,
            (TaskStatus::Cancelled, TaskStatus::Todo) => true,
            (TaskStatus::Cancelled, _) => false,
            _ => true,
        }
    }
}

/// Task priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Task record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub sprint_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee_id: Option<Uuid>,
    pub created_by: Uuid,
    pub estimated_hours: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new task
#[derive(Debug, Clone)]
pub struct CreateTask {
    pub organization_id: Uuid,
    pub sprint_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub assignee_id: Option<Uuid>,
    pub created_by: Uuid,
    pub estimated_hours: Option<f64>,
}

/// Editable task fields
///
/// Nullable columns use `Option<Option<T>>`: `Some(None)` clears the value.
/// Status is changed separately through [`Task::set_status`].
#[derive(Debug, Clone, Default)]
pub struct UpdateTask {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<Option<Uuid>>,
    pub sprint_id: Option<Option<Uuid>>,
    pub estimated_hours: Option<Option<f64>>,
}

impl UpdateTask {
    /// Returns true if no field would change
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.assignee_id.is_none()
            && self.sprint_id.is_none()
            && self.estimated_hours.is_none()
    }

    /// Applies the changes to an in-memory task
    pub fn apply(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(assignee_id) = self.assignee_id {
            task.assignee_id = assignee_id;
        }
        if let Some(sprint_id) = self.sprint_id {
            task.sprint_id = sprint_id;
        }
        if let Some(estimated_hours) = self.estimated_hours {
            task.estimated_hours = estimated_hours;
        }
    }
}

/// Filters for listing tasks within an organization
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<Uuid>,
    pub sprint_id: Option<Uuid>,
}

impl Task {
    pub async fn create<'e, E>(executor: E, data: CreateTask) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "INSERT INTO tasks (organization_id, sprint_id, title, description, priority, \
             assignee_id, created_by, estimated_hours) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            TASK_COLUMNS
        );

        sqlx::query_as::<_, Task>(&query)
            .bind(data.organization_id)
            .bind(data.sprint_id)
            .bind(data.title)
            .bind(data.description)
            .bind(data.priority)
            .bind(data.assignee_id)
            .bind(data.created_by)
            .bind(data.estimated_hours)
            .fetch_one(executor)
            .await
    }

    /// Finds a task by ID regardless of organization
    ///
    /// Callers must run the returned `organization_id` through the
    /// permission evaluator before exposing the task.
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS);

        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Locks a task row for the rest of the transaction
    pub async fn find_for_update<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!("SELECT {} FROM tasks WHERE id = $1 FOR UPDATE", TASK_COLUMNS);

        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Writes all editable fields of `task` back to the row
    pub async fn save<'e, E>(executor: E, task: &Task) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "UPDATE tasks SET title = $2, description = $3, priority = $4, assignee_id = $5, \
             sprint_id = $6, estimated_hours = $7, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            TASK_COLUMNS
        );

        sqlx::query_as::<_, Task>(&query)
            .bind(task.id)
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.priority)
            .bind(task.assignee_id)
            .bind(task.sprint_id)
            .bind(task.estimated_hours)
            .fetch_one(executor)
            .await
    }

    pub async fn set_status<'e, E>(
        executor: E,
        id: Uuid,
        status: TaskStatus,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "UPDATE tasks SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            TASK_COLUMNS
        );

        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .bind(status)
            .fetch_optional(executor)
            .await
    }

    pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists tasks for an organization, newest first
    pub async fn list_by_organization(
        pool: &PgPool,
        organization_id: Uuid,
        filter: &TaskFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut query = format!("SELECT {} FROM tasks WHERE organization_id = $1", TASK_COLUMNS);
        let mut bind_count = 1;

        if filter.status.is_some() {
            bind_count += 1;
            query.push_str(&format!(" AND status = ${}", bind_count));
        }
        if filter.assignee_id.is_some() {
            bind_count += 1;
            query.push_str(&format!(" AND assignee_id = ${}", bind_count));
        }
        if filter.sprint_id.is_some() {
            bind_count += 1;
            query.push_str(&format!(" AND sprint_id = ${}", bind_count));
        }

        query.push_str(&format!(
            " ORDER BY created_at DESC, id DESC LIMIT ${} OFFSET ${}",
            bind_count + 1,
            bind_count + 2
        ));

        let mut q = sqlx::query_as::<_, Task>(&query).bind(organization_id);

        if let Some(status) = filter.status {
            q = q.bind(status);
        }
        if let Some(assignee_id) = filter.assignee_id {
            q = q.bind(assignee_id);
        }
        if let Some(sprint_id) = filter.sprint_id {
            q = q.bind(sprint_id);
        }

        q.bind(limit).bind(offset).fetch_all(pool).await
    }

    pub async fn count_by_organization(
        pool: &PgPool,
        organization_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE organization_id = $1")
                .bind(organization_id)
                .fetch_one(pool)
                .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            sprint_id: None,
            title: "Original".to_string(),
            description: Some("desc".to_string()),
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            assignee_id: None,
            created_by: Uuid::new_v4(),
            estimated_hours: Some(3.0),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(TaskStatus::Todo.as_str(), "todo");
        assert_eq!(TaskStatus::InProgress.as_str(), "in_progress");
        assert_eq!(TaskStatus::Done.as_str(), "done");
        assert_eq!(TaskStatus::Cancelled.as_str(), "cancelled");
    }

    #[test]
    fn test_status_serde_matches_db_labels() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Todo.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::Done.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Cancelled.can_transition_to(TaskStatus::Todo));

        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Done));
        assert!(!TaskStatus::Todo.can_transition_to(TaskStatus::Todo));
    }

    #[test]
    fn test_update_apply_touches_only_given_fields() {
        let mut task = sample_task();
        let assignee = Uuid::new_v4();

        UpdateTask {
            title: Some("Renamed".to_string()),
            description: Some(None),
            assignee_id: Some(Some(assignee)),
            ..Default::default()
        }
        .apply(&mut task);

        assert_eq!(task.title, "Renamed");
        assert_eq!(task.description, None);
        assert_eq!(task.assignee_id, Some(assignee));
        assert_eq!(task.priority, TaskPriority::Medium);
        assert_eq!(task.estimated_hours, Some(3.0));
    }

    #[test]
    fn test_update_is_empty() {
        assert!(UpdateTask::default().is_empty());
        assert!(!UpdateTask {
            priority: Some(TaskPriority::Critical),
            ..Default::default()
        }
        .is_empty());
    }
}
