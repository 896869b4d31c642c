/// Database row types for all tables.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.

/// Team record in the teams table
#[derive(Debug, Clone)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: String,
}

/// Membership of a user in a team
#[derive(Debug, Clone)]
pub struct TeamMember {
    pub team_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: String,
}

/// Membership role values
pub const ROLE_OWNER: &str = "owner";
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MEMBER: &str = "member";

/// Task record in the tasks table
#[derive(Debug, Clone)]
pub struct Task {
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

/// Allowed task priorities, lowest first
pub const TASK_PRIORITIES: &[&str] = &["low", "normal", "high"];

/// Allowed task statuses in workflow order
pub const TASK_STATUSES: &[&str] = &["todo", "in progress", "completed"];

/// Persisted team chat message; `id` is the durable ordering key
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub team_id: String,
    pub sender: String,
    pub content: String,
    pub created_at: String,
}
