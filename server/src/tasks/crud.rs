use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::db::models::{Task, TASK_PRIORITIES, TASK_STATUSES};
use crate::state::AppState;
use crate::teams::crud::team_exists;

use super::notify::{notify_task_assigned, MSG_NEW_TASK, MSG_REASSIGNED};

const DEFAULT_PRIORITY: &str = "normal";
const DEFAULT_STATUS: &str = "todo";

const TASK_COLUMNS: &str = "id, team_id, title, description, priority, status, due_date, \
                            creator_id, assigned_to, created_at, updated_at";

// --- Response types ---

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub id: String,
    pub team_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: String,
    pub status: String,
    pub due_date: Option<String>,
    pub creator_id: String,
    pub assigned_to: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            team_id: task.team_id,
            title: task.title,
            description: task.description,
            priority: task.priority,
            status: task.status,
            due_date: task.due_date,
            creator_id: task.creator_id,
            assigned_to: task.assigned_to,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

// --- Request types ---

/// `assigned_to` accepts a string or a number; user ids are opaque.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub due_date: Option<String>,
    pub assigned_to: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub due_date: Option<String>,
    pub assigned_to: Option<Value>,
}

/// `?sortField=&sortOrder=` on the team task listing.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListQuery {
    pub sort_field: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

// --- Helpers ---

/// Normalise a JSON user id. Null, empty strings and non-scalar values mean "unassigned".
fn user_id_from_json(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn validate_priority(priority: &str) -> Result<(), (StatusCode, String)> {
    if TASK_PRIORITIES.contains(&priority) {
        Ok(())
    } else {
        Err((StatusCode::BAD_REQUEST, format!("Invalid priority: {}", priority)))
    }
}

fn validate_status(status: &str) -> Result<(), (StatusCode, String)> {
    if TASK_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err((StatusCode::BAD_REQUEST, format!("Invalid status: {}", status)))
    }
}

/// Columns a task listing may be ordered by. Only these names ever reach SQL.
const SORTABLE_COLUMNS: &[&str] = &["title", "priority", "status", "due_date", "created_at", "updated_at"];

/// ORDER BY for a task listing. Ties fall back to id in the same direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSort {
    column: &'static str,
    descending: bool,
}

impl TaskSort {
    pub const NEWEST_FIRST: TaskSort = TaskSort {
        column: "created_at",
        descending: true,
    };

    /// `desc` (any case) sorts descending, any other order ascending.
    /// With no parameters at all the listing stays newest first.
    pub fn from_query(query: &TaskListQuery) -> Result<Self, (StatusCode, String)> {
        let descending = query
            .sort_order
            .as_deref()
            .map(|order| order.eq_ignore_ascii_case("desc"));

        let Some(field) = query.sort_field.as_deref() else {
            return Ok(match descending {
                None => Self::NEWEST_FIRST,
                Some(descending) => TaskSort {
                    column: "created_at",
                    descending,
                },
            });
        };

        let column = SORTABLE_COLUMNS
            .iter()
            .copied()
            .find(|column| *column == field)
            .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("Invalid sort field: {}", field)))?;

        Ok(TaskSort {
            column,
            descending: descending.unwrap_or(false),
        })
    }

    fn order_by(&self) -> String {
        let direction = if self.descending { "DESC" } else { "ASC" };
        format!("{column} {direction}, id {direction}", column = self.column)
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        team_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        priority: row.get(4)?,
        status: row.get(5)?,
        due_date: row.get(6)?,
        creator_id: row.get(7)?,
        assigned_to: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn load_task(conn: &Connection, task_id: &str) -> rusqlite::Result<Option<Task>> {
    conn.query_row(
        &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
        [task_id],
        task_from_row,
    )
    .optional()
}

fn list_where(
    conn: &Connection,
    clause: &str,
    params: &[&str],
    sort: TaskSort,
) -> rusqlite::Result<Vec<Task>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM tasks WHERE {} ORDER BY {}",
        TASK_COLUMNS,
        clause,
        sort.order_by()
    ))?;
    let tasks = stmt
        .query_map(rusqlite::params_from_iter(params), task_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(tasks)
}

fn db_error(context: &str, e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{}: {}", context, e))
}

// --- Handlers ---

/// POST /api/teams/{team_id}/tasks
/// Create a task and push `task_assigned`
/// to the assignee, if any.
pub async fn create_task(
    State(state): State<AppState>,
    claims: Claims,
    Path(team_id): Path<String>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), (StatusCode, String)> {
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Task title cannot be empty".to_string()));
    }
    let priority = req.priority.unwrap_or_else(|| DEFAULT_PRIORITY.to_string());
    validate_priority(&priority)?;
    let status = req.status.unwrap_or_else(|| DEFAULT_STATUS.to_string());
    validate_status(&status)?;

    let now = Utc::now().to_rfc3339();
    let task = Task {
        id: Uuid::now_v7().to_string(),
        team_id,
        title,
        description: req.description.filter(|d| !d.is_empty()),
        priority,
        status,
        due_date: req.due_date.filter(|d| !d.is_empty()),
        creator_id: claims.sub,
        assigned_to: user_id_from_json(req.assigned_to.as_ref()),
        created_at: now.clone(),
        updated_at: now,
    };

    let db = state.db.clone();
    let task = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "DB lock".to_string()))?;

        if !team_exists(&conn, &task.team_id).map_err(|e| db_error("Lookup team", e))? {
            return Err((StatusCode::NOT_FOUND, "Team not found".to_string()));
        }

        conn.execute(
            &format!(
                "INSERT INTO tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                TASK_COLUMNS
            ),
            rusqlite::params![
                task.id,
                task.team_id,
                task.title,
                task.description,
                task.priority,
                task.status,
                task.due_date,
                task.creator_id,
                task.assigned_to,
                task.created_at,
                task.updated_at,
            ],
        )
        .map_err(|e| db_error("Insert task", e))?;

        Ok::<_, (StatusCode, String)>(task)
    })
    .await
    .map_err(|e| db_error("Task join", e))??;

    tracing::info!(task_id = %task.id, team_id = %task.team_id, "Task created");

    if let Some(assignee) = &task.assigned_to {
        notify_task_assigned(&state.connections, assignee, &task.id, &task.title, MSG_NEW_TASK);
    }

    Ok((StatusCode::CREATED, Json(task.into())))
}

/// GET /api/teams/{team_id}/tasks?sortField=&sortOrder=
/// All tasks of a team, newest first unless a sort is requested.
pub async fn list_tasks(
    State(state): State<AppState>,
    _claims: Claims,
    Path(team_id): Path<String>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Vec<TaskResponse>>, (StatusCode, String)> {
    let sort = TaskSort::from_query(&query)?;
    let db = state.db.clone();

    let tasks = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "DB lock".to_string()))?;
        if !team_exists(&conn, &team_id).map_err(|e| db_error("Lookup team", e))? {
            return Err((StatusCode::NOT_FOUND, "Team not found".to_string()));
        }
        list_where(&conn, "team_id = ?1", &[team_id.as_str()], sort).map_err(|e| db_error("List tasks", e))
    })
    .await
    .map_err(|e| db_error("Task join", e))??;

    Ok(Json(tasks.into_iter().map(TaskResponse::from).collect()))
}

/// GET /api/teams/{team_id}/tasks/assigned
/// The caller's tasks in a team.
pub async fn list_assigned_tasks(
    State(state): State<AppState>,
    claims: Claims,
    Path(team_id): Path<String>,
) -> Result<Json<Vec<TaskResponse>>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let tasks = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        list_where(
            &conn,
            "team_id = ?1 AND assigned_to = ?2",
            &[team_id.as_str(), user_id.as_str()],
            TaskSort::NEWEST_FIRST,
        )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(tasks.into_iter().map(TaskResponse::from).collect()))
}

/// PUT /api/teams/{team_id}/tasks/{task_id}
/// Partial update.
/// Pushes `task_assigned` only when the assignee actually changes.
pub async fn update_task(
    State(state): State<AppState>,
    _claims: Claims,
    Path((team_id, task_id)): Path<(String, String)>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<TaskResponse>, (StatusCode, String)> {
    if let Some(priority) = &req.priority {
        validate_priority(priority)?;
    }
    if let Some(status) = &req.status {
        validate_status(status)?;
    }
    let new_assignee = user_id_from_json(req.assigned_to.as_ref());
    let title = req.title.as_deref().map(str::trim).filter(|t| !t.is_empty()).map(String::from);

    let has_changes = title.is_some()
        || req.description.is_some()
        || req.priority.is_some()
        || req.status.is_some()
        || req.due_date.is_some()
        || new_assignee.is_some();
    if !has_changes {
        return Err((StatusCode::BAD_REQUEST, "No fields to update".to_string()));
    }

    let db = state.db.clone();
    let (task, previous_assignee) = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "DB lock".to_string()))?;

        let mut task = match load_task(&conn, &task_id).map_err(|e| db_error("Load task", e))? {
            Some(task) if task.team_id == team_id => task,
            _ => return Err((StatusCode::NOT_FOUND, "Task not found".to_string())),
        };
        let previous_assignee = task.assigned_to.clone();

        if let Some(title) = title {
            task.title = title;
        }
        if let Some(description) = req.description {
            task.description = Some(description);
        }
        if let Some(priority) = req.priority {
            task.priority = priority;
        }
        if let Some(status) = req.status {
            task.status = status;
        }
        if let Some(due_date) = req.due_date {
            task.due_date = Some(due_date);
        }
        if new_assignee.is_some() {
            task.assigned_to = new_assignee;
        }
        task.updated_at = Utc::now().to_rfc3339();

        conn.execute(
            "UPDATE tasks SET title = ?2, description = ?3, priority = ?4, status = ?5,
             due_date = ?6, assigned_to = ?7, updated_at = ?8 WHERE id = ?1",
            rusqlite::params![
                task.id,
                task.title,
                task.description,
                task.priority,
                task.status,
                task.due_date,
                task.assigned_to,
                task.updated_at,
            ],
        )
        .map_err(|e| db_error("Update task", e))?;

        Ok::<_, (StatusCode, String)>((task, previous_assignee))
    })
    .await
    .map_err(|e| db_error("Task join", e))??;

    if let Some(assignee) = &task.assigned_to {
        if previous_assignee.as_ref() != Some(assignee) {
            notify_task_assigned(&state.connections, assignee, &task.id, &task.title, MSG_REASSIGNED);
        }
    }

    Ok(Json(task.into()))
}

/// DELETE /api/teams/{team_id}/tasks/{task_id}
pub async fn delete_task(
    State(state): State<AppState>,
    _claims: Claims,
    Path((team_id, task_id)): Path<(String, String)>,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();

    let removed = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.execute(
            "DELETE FROM tasks WHERE id = ?1 AND team_id = ?2",
            rusqlite::params![task_id, team_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    if removed == 0 {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/tasks/{task_id}/status
pub async fn update_status(
    State(state): State<AppState>,
    _claims: Claims,
    Path(task_id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<TaskResponse>, (StatusCode, String)> {
    validate_status(&req.status)?;

    let db = state.db.clone();
    let task = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "DB lock".to_string()))?;

        let updated = conn
            .execute(
                "UPDATE tasks SET status = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![task_id, req.status, Utc::now().to_rfc3339()],
            )
            .map_err(|e| db_error("Update status", e))?;
        if updated == 0 {
            return Err((StatusCode::NOT_FOUND, "Task not found".to_string()));
        }

        load_task(&conn, &task_id)
            .map_err(|e| db_error("Load task", e))?
            .ok_or_else(|| (StatusCode::NOT_FOUND, "Task not found".to_string()))
    })
    .await
    .map_err(|e| db_error("Task join", e))??;

    Ok(Json(task.into()))
}
