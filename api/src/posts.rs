use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use agora_shared::{BookmarkResponse, CreatePost, Post, User};
use rusqlite::{params, Connection, OptionalExtension};

use crate::{auth, error::ApiError, votes, AppState};

// ── Store operations ──

pub fn insert_post(
    conn: &Connection,
    author_id: i64,
    title: &str,
    body: &str,
) -> Result<Post, ApiError> {
    if title.trim().is_empty() || body.trim().is_empty() {
        return Err(ApiError::Validation("title and body must not be empty".into()));
    }

    conn.execute(
        "INSERT INTO posts (author_id, title, body) VALUES (?1, ?2, ?3)",
        params![author_id, title, body],
    )?;
    let id = conn.last_insert_rowid();

    post_row(conn, id, None)?.ok_or(ApiError::NotFound("post"))
}

/// Read one post and count the view. The caller's own vote rides along when
/// the request is authenticated.
pub fn fetch_post(
    conn: &Connection,
    post_id: i64,
    viewer_id: Option<i64>,
) -> Result<Post, ApiError> {
    let affected = conn.execute(
        "UPDATE posts SET view_count = view_count + 1 WHERE id = ?1",
        [post_id],
    )?;
    if affected == 0 {
        return Err(ApiError::NotFound("post"));
    }

    post_row(conn, post_id, viewer_id)?.ok_or(ApiError::NotFound("post"))
}

fn post_row(
    conn: &Connection,
    post_id: i64,
    viewer_id: Option<i64>,
) -> Result<Option<Post>, ApiError> {
    let post = conn
        .query_row(
            "SELECT p.id, p.title, p.body, p.created_at, p.view_count,
                    u.id, u.username, u.avatar_url,
                    COALESCE((SELECT SUM(v.value) FROM votes v
                              WHERE v.target_type = 'post' AND v.target_id = p.id), 0),
                    (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id)
             FROM posts p JOIN users u ON p.author_id = u.id
             WHERE p.id = ?1",
            [post_id],
            |row| {
                Ok(Post {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    body: row.get(2)?,
                    created_at: row.get(3)?,
                    view_count: row.get(4)?,
                    user: User {
                        id: row.get(5)?,
                        username: row.get(6)?,
                        avatar_url: row.get(7)?,
                    },
                    vote_score: row.get(8)?,
                    user_vote: None,
                    comment_count: row.get(9)?,
                })
            },
        )
        .optional()?;

    match (post, viewer_id) {
        (Some(mut post), Some(uid)) => {
            post.user_vote = votes::current_vote(conn, uid, votes::TARGET_POST, post_id)?;
            Ok(Some(post))
        }
        (post, _) => Ok(post),
    }
}

/// Flip the bookmark state for (user, post) and report the new state.
pub fn toggle_bookmark(
    conn: &Connection,
    user_id: i64,
    post_id: i64,
) -> Result<bool, ApiError> {
    let exists: Option<i64> = conn
        .query_row("SELECT id FROM posts WHERE id = ?1", [post_id], |row| {
            row.get(0)
        })
        .optional()?;
    if exists.is_none() {
        return Err(ApiError::NotFound("post"));
    }

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM bookmarks WHERE user_id = ?1 AND post_id = ?2",
            params![user_id, post_id],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute("DELETE FROM bookmarks WHERE id = ?1", [id])?;
            Ok(false)
        }
        None => {
            conn.execute(
                "INSERT OR IGNORE INTO bookmarks (user_id, post_id) VALUES (?1, ?2)",
                params![user_id, post_id],
            )?;
            Ok(true)
        }
    }
}

// ── Handlers ──

/// POST /api/posts
pub async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePost>,
) -> Result<Json<Post>, ApiError> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;
    let title = ammonia::clean(&payload.title);
    let body = ammonia::clean(&payload.body);

    let pool = state.db.clone();
    let post = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        insert_post(&conn, user_id, &title, &body)
    })
    .await??;

    Ok(Json(post))
}

/// GET /api/posts/:id
pub async fn get_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<i64>,
) -> Result<Json<Post>, ApiError> {
    let viewer_id = auth::extract_user_id(&headers, &state.jwt_secret).ok();

    let pool = state.db.clone();
    let post = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        fetch_post(&conn, post_id, viewer_id)
    })
    .await??;

    Ok(Json(post))
}

/// POST /api/posts/:id/bookmark — toggle
pub async fn bookmark_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<i64>,
) -> Result<Json<BookmarkResponse>, ApiError> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;

    let pool = state.db.clone();
    let is_bookmarked = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        toggle_bookmark(&conn, user_id, post_id)
    })
    .await??;

    Ok(Json(BookmarkResponse { is_bookmarked }))
}
