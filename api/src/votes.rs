use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use agora_shared::{CreateVote, NotificationKind, VoteResponse};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;

use crate::{auth, error::ApiError, notifications, AppState};

pub const TARGET_POST: &str = "post";
pub const TARGET_COMMENT: &str = "comment";

/// Where a vote landed: who owns the content and which post page it lives on.
struct Target {
    owner_id: i64,
    post_id: i64,
}

// ── Ledger ──

/// Net score of a target, always derived from live rows. There is no stored
/// counter anywhere that could race under concurrent voters.
pub fn score(conn: &Connection, target_type: &str, target_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(SUM(value), 0) FROM votes
         WHERE target_type = ?1 AND target_id = ?2",
        params![target_type, target_id],
        |row| row.get(0),
    )
}

pub(crate) fn current_vote(
    conn: &Connection,
    user_id: i64,
    target_type: &str,
    target_id: i64,
) -> rusqlite::Result<Option<i32>> {
    conn.query_row(
        "SELECT value FROM votes
         WHERE user_id = ?1 AND target_type = ?2 AND target_id = ?3",
        params![user_id, target_type, target_id],
        |row| row.get(0),
    )
    .optional()
}

fn lookup_target(
    conn: &Connection,
    target_type: &str,
    target_id: i64,
) -> Result<Option<Target>, ApiError> {
    let sql = match target_type {
        TARGET_POST => "SELECT author_id, id FROM posts WHERE id = ?1",
        TARGET_COMMENT => "SELECT author_id, post_id FROM comments WHERE id = ?1",
        _ => {
            return Err(ApiError::Validation(format!(
                "unknown vote target type '{target_type}'"
            )))
        }
    };

    Ok(conn
        .query_row(sql, [target_id], |row| {
            Ok(Target {
                owner_id: row.get(0)?,
                post_id: row.get(1)?,
            })
        })
        .optional()?)
}

/// Apply one vote action. Same value again retracts the vote, the opposite
/// value replaces it, otherwise a new row is inserted. Replaying the
/// identical request is always safe.
pub fn apply_vote(
    conn: &Connection,
    voter_id: i64,
    target_type: &str,
    target_id: i64,
    value: i32,
) -> Result<VoteResponse, ApiError> {
    if value != 1 && value != -1 {
        return Err(ApiError::Validation("vote value must be 1 or -1".into()));
    }

    let target = lookup_target(conn, target_type, target_id)?
        .ok_or(ApiError::NotFound("vote target"))?;

    let existing = current_vote(conn, voter_id, target_type, target_id)?;

    let user_vote = match existing {
        Some(v) if v == value => {
            // Same vote → remove (toggle off)
            conn.execute(
                "DELETE FROM votes WHERE user_id = ?1 AND target_type = ?2 AND target_id = ?3",
                params![voter_id, target_type, target_id],
            )?;
            None
        }
        Some(_) => {
            // Different vote → update
            conn.execute(
                "UPDATE votes SET value = ?4
                 WHERE user_id = ?1 AND target_type = ?2 AND target_id = ?3",
                params![voter_id, target_type, target_id, value],
            )?;
            Some(value)
        }
        None => {
            // New vote. The unique index arbitrates racing inserts for the
            // same row; last write wins, matching rapid double-click intent.
            conn.execute(
                "INSERT INTO votes (user_id, target_type, target_id, value)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, target_type, target_id) DO UPDATE SET value = ?4",
                params![voter_id, target_type, target_id, value],
            )?;
            Some(value)
        }
    };

    // Only votes that land notify; retractions stay silent, as do self-votes.
    if user_vote.is_some() && target.owner_id != voter_id {
        notifications::best_effort(notify_vote(conn, voter_id, &target, target_type));
    }

    Ok(VoteResponse {
        score: score(conn, target_type, target_id)?,
        user_vote,
    })
}

fn notify_vote(
    conn: &Connection,
    voter_id: i64,
    target: &Target,
    target_type: &str,
) -> rusqlite::Result<()> {
    let actor: String = conn.query_row(
        "SELECT username FROM users WHERE id = ?1",
        [voter_id],
        |row| row.get(0),
    )?;
    let noun = if target_type == TARGET_POST {
        "post"
    } else {
        "comment"
    };
    notifications::fan_out(
        conn,
        &[target.owner_id],
        NotificationKind::Vote,
        &format!("{actor} voted on your {noun}"),
        Some(&format!("/posts/{}", target.post_id)),
    )
}

// ── Handlers ──

#[derive(Deserialize)]
pub struct VoteQuery {
    r#type: String,
    id: i64,
}

/// GET /api/votes?type=comment&id=123
pub async fn get_votes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<VoteQuery>,
) -> Result<Json<VoteResponse>, ApiError> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret).ok();

    let pool = state.db.clone();
    let VoteQuery {
        r#type: target_type,
        id: target_id,
    } = query;

    let resp = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;

        let score = score(&conn, &target_type, target_id)?;
        let user_vote = match user_id {
            Some(uid) => current_vote(&conn, uid, &target_type, target_id)?,
            None => None,
        };

        Ok::<_, ApiError>(VoteResponse { score, user_vote })
    })
    .await??;

    Ok(Json(resp))
}

/// POST /api/votes — upsert (toggle on re-vote with same value)
pub async fn cast_vote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateVote>,
) -> Result<Json<VoteResponse>, ApiError> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;

    let pool = state.db.clone();
    let CreateVote {
        target_type,
        target_id,
        value,
    } = payload;

    let resp = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        apply_vote(&conn, user_id, &target_type, target_id, value)
    })
    .await??;

    Ok(Json(resp))
}
