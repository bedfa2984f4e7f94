use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use agora_shared::{Comment, CreateComment, NotificationKind, User};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

use crate::{auth, error::ApiError, notifications, AppState};

/// Replies nest at most this deep; a comment at the limit cannot be replied to.
pub const MAX_DEPTH: i64 = 4;

// ── Tree operations ──

/// Insert a comment, placing it under `parent_id` when given. The stored row
/// carries its depth so the limit check never walks the ancestor chain.
pub fn add_comment(
    conn: &Connection,
    post_id: i64,
    author_id: i64,
    body: &str,
    parent_id: Option<i64>,
) -> Result<Comment, ApiError> {
    if body.trim().is_empty() {
        return Err(ApiError::Validation("comment body must not be empty".into()));
    }

    let post_author: i64 = conn
        .query_row("SELECT author_id FROM posts WHERE id = ?1", [post_id], |row| {
            row.get(0)
        })
        .optional()?
        .ok_or(ApiError::NotFound("post"))?;

    let (depth, recipient) = match parent_id {
        Some(pid) => {
            let parent = conn
                .query_row(
                    "SELECT post_id, author_id, depth FROM comments WHERE id = ?1",
                    [pid],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
                )
                .optional()?;

            let (parent_post, parent_author, parent_depth) =
                parent.ok_or(ApiError::NotFound("parent comment"))?;
            if parent_post != post_id {
                return Err(ApiError::NotFound("parent comment"));
            }

            let depth = parent_depth + 1;
            if depth > MAX_DEPTH {
                return Err(ApiError::Validation(format!(
                    "replies may nest at most {MAX_DEPTH} levels deep"
                )));
            }
            (depth, parent_author)
        }
        None => (0, post_author),
    };

    conn.execute(
        "INSERT INTO comments (post_id, parent_id, author_id, body, depth)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![post_id, parent_id, author_id, body, depth],
    )?;
    let id = conn.last_insert_rowid();

    if recipient != author_id {
        notifications::best_effort(notify_comment(
            conn,
            author_id,
            recipient,
            post_id,
            parent_id.is_some(),
        ));
    }

    fetch_comment(conn, id)
}

fn notify_comment(
    conn: &Connection,
    author_id: i64,
    recipient: i64,
    post_id: i64,
    nested: bool,
) -> rusqlite::Result<()> {
    let actor: String = conn.query_row(
        "SELECT username FROM users WHERE id = ?1",
        [author_id],
        |row| row.get(0),
    )?;
    let message = if nested {
        format!("{actor} replied to your comment")
    } else {
        format!("{actor} commented on your post")
    };
    notifications::fan_out(
        conn,
        &[recipient],
        NotificationKind::Comment,
        &message,
        Some(&format!("/posts/{post_id}")),
    )
}

fn fetch_comment(conn: &Connection, id: i64) -> Result<Comment, ApiError> {
    Ok(conn.query_row(
        "SELECT c.id, c.post_id, c.parent_id, c.depth, c.body, c.created_at,
                u.id, u.username, u.avatar_url
         FROM comments c JOIN users u ON c.author_id = u.id
         WHERE c.id = ?1",
        [id],
        |row| {
            Ok(Comment {
                id: row.get(0)?,
                post_id: row.get(1)?,
                parent_id: row.get(2)?,
                depth: row.get(3)?,
                body: row.get(4)?,
                created_at: row.get(5)?,
                user: User {
                    id: row.get(6)?,
                    username: row.get(7)?,
                    avatar_url: row.get(8)?,
                },
                vote_score: 0,
                replies: Vec::new(),
            })
        },
    )?)
}

/// Load the flat adjacency list for a post and fold it into a forest. The
/// nested view only ever exists in the response; rows and parent ids remain
/// the source of truth.
pub fn build_tree(conn: &Connection, post_id: i64) -> Result<Vec<Comment>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.post_id, c.parent_id, c.depth, c.body, c.created_at,
                u.id, u.username, u.avatar_url,
                COALESCE((SELECT SUM(v.value) FROM votes v
                          WHERE v.target_type = 'comment' AND v.target_id = c.id), 0)
         FROM comments c
         JOIN users u ON c.author_id = u.id
         WHERE c.post_id = ?1
         ORDER BY c.created_at ASC, c.id ASC",
    )?;

    let flat = stmt
        .query_map([post_id], |row| {
            Ok(Comment {
                id: row.get(0)?,
                post_id: row.get(1)?,
                parent_id: row.get(2)?,
                depth: row.get(3)?,
                body: row.get(4)?,
                created_at: row.get(5)?,
                user: User {
                    id: row.get(6)?,
                    username: row.get(7)?,
                    avatar_url: row.get(8)?,
                },
                vote_score: row.get(9)?,
                replies: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let index: HashMap<i64, usize> = flat.iter().enumerate().map(|(i, c)| (c.id, i)).collect();
    let mut nodes: Vec<Option<Comment>> = flat.into_iter().map(Some).collect();

    // Walk newest-to-oldest so every child is attached before its parent
    // moves; parents always precede children in creation order.
    for i in (0..nodes.len()).rev() {
        let Some(parent_id) = nodes[i].as_ref().and_then(|c| c.parent_id) else {
            continue;
        };
        if let Some(child) = nodes[i].take() {
            match index.get(&parent_id).and_then(|&p| nodes.get_mut(p)) {
                Some(Some(parent)) => parent.replies.insert(0, child),
                // parent vanished under a concurrent delete; drop the orphan
                _ => {}
            }
        }
    }

    Ok(nodes.into_iter().flatten().collect())
}

/// Remove a comment and its whole descendant subtree, along with any votes
/// referencing the removed rows. Only the author or a moderator may delete.
pub fn remove_comment(
    conn: &Connection,
    post_id: i64,
    comment_id: i64,
    requester_id: i64,
) -> Result<(), ApiError> {
    let row = conn
        .query_row(
            "SELECT author_id, post_id FROM comments WHERE id = ?1",
            [comment_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    let (author_id, owning_post) = row.ok_or(ApiError::NotFound("comment"))?;
    if owning_post != post_id {
        return Err(ApiError::NotFound("comment"));
    }

    if author_id != requester_id && !is_moderator(conn, requester_id)? {
        return Err(ApiError::Forbidden);
    }

    // Votes on the subtree go first so no orphaned ledger rows remain.
    conn.execute(
        "WITH RECURSIVE subtree(id) AS (
             SELECT id FROM comments WHERE id = ?1
             UNION ALL
             SELECT c.id FROM comments c JOIN subtree s ON c.parent_id = s.id
         )
         DELETE FROM votes
         WHERE target_type = 'comment' AND target_id IN (SELECT id FROM subtree)",
        [comment_id],
    )?;
    conn.execute(
        "WITH RECURSIVE subtree(id) AS (
             SELECT id FROM comments WHERE id = ?1
             UNION ALL
             SELECT c.id FROM comments c JOIN subtree s ON c.parent_id = s.id
         )
         DELETE FROM comments WHERE id IN (SELECT id FROM subtree)",
        [comment_id],
    )?;

    Ok(())
}

fn is_moderator(conn: &Connection, user_id: i64) -> rusqlite::Result<bool> {
    let flag: i64 = conn.query_row(
        "SELECT COALESCE((SELECT is_moderator FROM users WHERE id = ?1), 0)",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(flag != 0)
}

// ── Handlers ──

/// GET /api/posts/:id/comments
pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> Result<Json<Vec<Comment>>, ApiError> {
    let pool = state.db.clone();

    let tree = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        build_tree(&conn, post_id)
    })
    .await??;

    Ok(Json(tree))
}

/// POST /api/posts/:id/comments
pub async fn create_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<i64>,
    Json(payload): Json<CreateComment>,
) -> Result<Json<Comment>, ApiError> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;
    let body = ammonia::clean(&payload.body);

    let pool = state.db.clone();
    let comment = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        add_comment(&conn, post_id, user_id, &body, payload.parent_id)
    })
    .await??;

    Ok(Json(comment))
}

/// DELETE /api/posts/:id/comments/:comment_id
pub async fn delete_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((post_id, comment_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;

    let pool = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        remove_comment(&conn, post_id, comment_id, user_id)
    })
    .await??;

    Ok(StatusCode::NO_CONTENT)
}
