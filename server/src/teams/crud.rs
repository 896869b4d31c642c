use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::db::models::{Team, TeamMember, ROLE_ADMIN, ROLE_MEMBER, ROLE_OWNER};
use crate::state::AppState;

// --- Response types ---

#[derive(Debug, Serialize, Deserialize)]
pub struct TeamResponse {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: String,
}

impl From<Team> for TeamResponse {
    fn from(team: Team) -> Self {
        Self {
            id: team.id,
            name: team.name,
            owner_id: team.owner_id,
            created_at: team.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemberResponse {
    pub team_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: String,
}

impl From<TeamMember> for MemberResponse {
    fn from(member: TeamMember) -> Self {
        Self {
            team_id: member.team_id,
            user_id: member.user_id,
            role: member.role,
            joined_at: member.joined_at,
        }
    }
}

// --- Request types ---

#[derive(Debug, Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: String,
    pub role: Option<String>,
}

// --- Queries shared with the task routes ---

/// Role of `user_id` in `team_id`, if they are a member.
pub fn member_role(conn: &Connection, team_id: &str, user_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT role FROM team_members WHERE team_id = ?1 AND user_id = ?2",
        rusqlite::params![team_id, user_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn team_exists(conn: &Connection, team_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM teams WHERE id = ?1",
        [team_id],
        |row| row.get::<_, i64>(0).map(|c| c > 0),
    )
}

// --- Handlers ---

/// POST /api/teams
/// Create a team. The caller becomes its owner.
pub async fn create_team(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<CreateTeamRequest>,
) -> Result<(StatusCode, Json<TeamResponse>), (StatusCode, String)> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Team name cannot be empty".to_string()));
    }

    let db = state.db.clone();
    let owner_id = claims.sub.clone();

    let team = tokio::task::spawn_blocking(move || {
        let mut conn = db
            .lock()
            .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "DB lock".to_string()))?;

        let team = Team {
            id: Uuid::now_v7().to_string(),
            name,
            owner_id,
            created_at: Utc::now().to_rfc3339(),
        };

        let tx = conn
            .transaction()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Begin: {}", e)))?;
        tx.execute(
            "INSERT INTO teams (id, name, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![team.id, team.name, team.owner_id, team.created_at],
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert team: {}", e)))?;
        tx.execute(
            "INSERT INTO team_members (team_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![team.id, team.owner_id, ROLE_OWNER, team.created_at],
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert owner: {}", e)))?;
        tx.commit()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Commit: {}", e)))?;

        Ok::<_, (StatusCode, String)>(team)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    tracing::info!(team_id = %team.id, owner_id = %team.owner_id, "Team created");
    Ok((StatusCode::CREATED, Json(team.into())))
}

/// GET /api/teams
/// Teams the caller belongs to, oldest first.
pub async fn list_teams(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<TeamResponse>>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let teams = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let mut stmt = conn
            .prepare(
                "SELECT t.id, t.name, t.owner_id, t.created_at FROM teams t
                 JOIN team_members m ON m.team_id = t.id
                 WHERE m.user_id = ?1
                 ORDER BY t.created_at ASC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let teams: Vec<TeamResponse> = stmt
            .query_map([&user_id], |row| {
                Ok(Team {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    owner_id: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .map(TeamResponse::from)
            .collect();

        Ok::<_, StatusCode>(teams)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(teams))
}

/// GET /api/teams/{team_id}/members
pub async fn list_members(
    State(state): State<AppState>,
    _claims: Claims,
    Path(team_id): Path<String>,
) -> Result<Json<Vec<MemberResponse>>, StatusCode> {
    let db = state.db.clone();

    let members = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if !team_exists(&conn, &team_id).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)? {
            return Err(StatusCode::NOT_FOUND);
        }

        let mut stmt = conn
            .prepare(
                "SELECT team_id, user_id, role, joined_at FROM team_members
                 WHERE team_id = ?1 ORDER BY joined_at ASC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let members: Vec<MemberResponse> = stmt
            .query_map([&team_id], |row| {
                Ok(TeamMember {
                    team_id: row.get(0)?,
                    user_id: row.get(1)?,
                    role: row.get(2)?,
                    joined_at: row.get(3)?,
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .map(MemberResponse::from)
            .collect();

        Ok(members)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(members))
}

/// POST /api/teams/{team_id}/members
/// Add a member (owner or admin only).
/// New members default to the `member` role; nobody can be added as owner.
pub async fn add_member(
    State(state): State<AppState>,
    claims: Claims,
    Path(team_id): Path<String>,
    Json(req): Json<AddMemberRequest>,
) -> Result<(StatusCode, Json<MemberResponse>), (StatusCode, String)> {
    let user_id = req.user_id.trim().to_string();
    if user_id.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "user_id cannot be empty".to_string()));
    }
    let role = req.role.unwrap_or_else(|| ROLE_MEMBER.to_string());
    if role != ROLE_MEMBER && role != ROLE_ADMIN {
        return Err((StatusCode::BAD_REQUEST, format!("Invalid role: {}", role)));
    }

    let db = state.db.clone();
    let caller = claims.sub;

    let member = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "DB lock".to_string()))?;

        let exists = team_exists(&conn, &team_id)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Lookup team: {}", e)))?;
        if !exists {
            return Err((StatusCode::NOT_FOUND, "Team not found".to_string()));
        }

        let caller_role = member_role(&conn, &team_id, &caller)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Lookup role: {}", e)))?;
        match caller_role.as_deref() {
            Some(ROLE_OWNER) | Some(ROLE_ADMIN) => {}
            _ => {
                return Err((
                    StatusCode::FORBIDDEN,
                    "Only team owners and admins can add members".to_string(),
                ))
            }
        }

        let already = member_role(&conn, &team_id, &user_id)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Lookup member: {}", e)))?;
        if already.is_some() {
            return Err((StatusCode::CONFLICT, "User is already a member".to_string()));
        }

        let member = TeamMember {
            team_id,
            user_id,
            role,
            joined_at: Utc::now().to_rfc3339(),
        };
        conn.execute(
            "INSERT INTO team_members (team_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![member.team_id, member.user_id, member.role, member.joined_at],
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert member: {}", e)))?;

        Ok::<_, (StatusCode, String)>(member)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    tracing::info!(team_id = %member.team_id, user_id = %member.user_id, role = %member.role, "Member added");
    Ok((StatusCode::CREATED, Json(member.into())))
}
