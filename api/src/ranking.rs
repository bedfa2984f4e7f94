use axum::{
    extract::{Query, State},
    Json,
};
use agora_shared::{Paginated, PostSummary, RankedUser, User};
use rusqlite::{params, Connection};
use serde::Deserialize;

use crate::{error::ApiError, AppState};

pub const PER_PAGE: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostSort {
    Latest,
    Popular,
    MostVoted,
    MostCommented,
}

impl PostSort {
    pub fn parse(s: &str) -> Result<Self, ApiError> {
        match s {
            "latest" => Ok(PostSort::Latest),
            "popular" => Ok(PostSort::Popular),
            "most_voted" => Ok(PostSort::MostVoted),
            "most_commented" => Ok(PostSort::MostCommented),
            other => Err(ApiError::Validation(format!("unknown sort '{other}'"))),
        }
    }

    /// Every strategy breaks ties on recency, newest first; the id keeps the
    /// order total within one timestamp.
    fn order_clause(&self) -> &'static str {
        match self {
            PostSort::Latest => "p.created_at DESC, p.id DESC",
            PostSort::Popular => "p.view_count DESC, p.created_at DESC, p.id DESC",
            PostSort::MostVoted => "vote_score DESC, p.created_at DESC, p.id DESC",
            PostSort::MostCommented => "comment_count DESC, p.created_at DESC, p.id DESC",
        }
    }
}

// ── Queries ──

/// Sorted, paginated posts. Vote score and comment count are computed from
/// the underlying rows at read time, matching whatever the ledger holds now.
pub fn posts_page(
    conn: &Connection,
    sort: PostSort,
    page: i64,
    per_page: i64,
) -> Result<Paginated<PostSummary>, ApiError> {
    let page = page.max(1);
    let offset = (page - 1) * per_page;

    let total: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;

    let sql = format!(
        "SELECT p.id, p.title, p.created_at, p.view_count,
                u.id, u.username, u.avatar_url,
                COALESCE((SELECT SUM(v.value) FROM votes v
                          WHERE v.target_type = 'post' AND v.target_id = p.id), 0) AS vote_score,
                (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count
         FROM posts p
         JOIN users u ON p.author_id = u.id
         ORDER BY {}
         LIMIT ?1 OFFSET ?2",
        sort.order_clause()
    );

    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params![per_page, offset], |row| {
            Ok(PostSummary {
                id: row.get(0)?,
                title: row.get(1)?,
                created_at: row.get(2)?,
                view_count: row.get(3)?,
                user: User {
                    id: row.get(4)?,
                    username: row.get(5)?,
                    avatar_url: row.get(6)?,
                },
                vote_score: row.get(7)?,
                comment_count: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(paginate(items, total, page, per_page))
}

/// Users ordered by overall engagement: posts written, comments written,
/// votes cast.
pub fn users_page(
    conn: &Connection,
    page: i64,
    per_page: i64,
) -> Result<Paginated<RankedUser>, ApiError> {
    let page = page.max(1);
    let offset = (page - 1) * per_page;

    let total: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;

    let mut stmt = conn.prepare(
        "SELECT id, username, avatar_url, post_count, comment_count, vote_count
         FROM (
             SELECT u.id, u.username, u.avatar_url, u.created_at,
                    (SELECT COUNT(*) FROM posts p WHERE p.author_id = u.id) AS post_count,
                    (SELECT COUNT(*) FROM comments c WHERE c.author_id = u.id) AS comment_count,
                    (SELECT COUNT(*) FROM votes v WHERE v.user_id = u.id) AS vote_count
             FROM users u
         )
         ORDER BY post_count + comment_count + vote_count DESC,
                  created_at DESC, id DESC
         LIMIT ?1 OFFSET ?2",
    )?;

    let items = stmt
        .query_map(params![per_page, offset], |row| {
            Ok(RankedUser {
                user: User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    avatar_url: row.get(2)?,
                },
                post_count: row.get(3)?,
                comment_count: row.get(4)?,
                vote_count: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(paginate(items, total, page, per_page))
}

fn paginate<T>(items: Vec<T>, total: i64, page: i64, per_page: i64) -> Paginated<T> {
    let total_pages = if total == 0 {
        0
    } else {
        (total + per_page - 1) / per_page
    };
    Paginated {
        items,
        total,
        page,
        per_page,
        total_pages,
    }
}

// ── Handlers ──

#[derive(Deserialize)]
pub struct RankParams {
    sort: Option<String>,
    page: Option<i64>,
}

/// GET /api/ranking/posts?sort=most_voted&page=1
pub async fn rank_posts(
    State(state): State<AppState>,
    Query(query): Query<RankParams>,
) -> Result<Json<Paginated<PostSummary>>, ApiError> {
    let sort = PostSort::parse(query.sort.as_deref().unwrap_or("latest"))?;
    let page = query.page.unwrap_or(1);

    let pool = state.db.clone();
    let result = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        posts_page(&conn, sort, page, PER_PAGE)
    })
    .await??;

    Ok(Json(result))
}

/// GET /api/ranking/users?page=1
pub async fn rank_users(
    State(state): State<AppState>,
    Query(query): Query<RankParams>,
) -> Result<Json<Paginated<RankedUser>>, ApiError> {
    let page = query.page.unwrap_or(1);

    let pool = state.db.clone();
    let result = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        users_page(&conn, page, PER_PAGE)
    })
    .await??;

    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comments;
    use crate::db::testutil::{conn, seed_post, seed_post_at, seed_user};
    use crate::votes::{self, TARGET_POST};

    #[test]
    fn most_voted_orders_by_derived_score() {
        let conn = conn();
        let alice = seed_user(&conn, "alice");
        let bob = seed_user(&conn, "bob");
        let carol = seed_user(&conn, "carol");

        let low = seed_post(&conn, alice, "low");
        let high = seed_post(&conn, alice, "high");
        let negative = seed_post(&conn, alice, "negative");

        votes::apply_vote(&conn, bob, TARGET_POST, high, 1).unwrap();
        votes::apply_vote(&conn, carol, TARGET_POST, high, 1).unwrap();
        votes::apply_vote(&conn, bob, TARGET_POST, low, 1).unwrap();
        votes::apply_vote(&conn, bob, TARGET_POST, negative, -1).unwrap();

        let result = posts_page(&conn, PostSort::MostVoted, 1, PER_PAGE).unwrap();
        let ids: Vec<_> = result.items.iter().map(|p| p.id).collect();
        assert_eq!(ids, [high, low, negative]);
        assert_eq!(result.items[0].vote_score, 2);
    }

    #[test]
    fn equal_scores_fall_back_to_recency() {
        let conn = conn();
        let alice = seed_user(&conn, "alice");
        let older = seed_post_at(&conn, alice, "older", "2026-01-01 10:00:00");
        let newer = seed_post_at(&conn, alice, "newer", "2026-02-01 10:00:00");

        let result = posts_page(&conn, PostSort::MostVoted, 1, PER_PAGE).unwrap();
        let ids: Vec<_> = result.items.iter().map(|p| p.id).collect();
        assert_eq!(ids, [newer, older]);
    }

    #[test]
    fn most_commented_counts_the_whole_subtree() {
        let conn = conn();
        let alice = seed_user(&conn, "alice");
        let quiet = seed_post(&conn, alice, "quiet");
        let busy = seed_post(&conn, alice, "busy");

        let root = comments::add_comment(&conn, busy, alice, "root", None).unwrap();
        comments::add_comment(&conn, busy, alice, "reply", Some(root.id)).unwrap();
        comments::add_comment(&conn, quiet, alice, "only one", None).unwrap();

        let result = posts_page(&conn, PostSort::MostCommented, 1, PER_PAGE).unwrap();
        let ids: Vec<_> = result.items.iter().map(|p| p.id).collect();
        assert_eq!(ids, [busy, quiet]);
        assert_eq!(result.items[0].comment_count, 2);
    }

    #[test]
    fn popular_orders_by_view_count() {
        let conn = conn();
        let alice = seed_user(&conn, "alice");
        let cold = seed_post(&conn, alice, "cold");
        let hot = seed_post(&conn, alice, "hot");
        conn.execute("UPDATE posts SET view_count = 9 WHERE id = ?1", [hot])
            .unwrap();

        let result = posts_page(&conn, PostSort::Popular, 1, PER_PAGE).unwrap();
        let ids: Vec<_> = result.items.iter().map(|p| p.id).collect();
        assert_eq!(ids, [hot, cold]);
    }

    #[test]
    fn pages_split_and_count_correctly() {
        let conn = conn();
        let alice = seed_user(&conn, "alice");
        for i in 0..25 {
            seed_post(&conn, alice, &format!("post {i}"));
        }

        let first = posts_page(&conn, PostSort::Latest, 1, 10).unwrap();
        assert_eq!(first.items.len(), 10);
        assert_eq!(first.total, 25);
        assert_eq!(first.total_pages, 3);

        let last = posts_page(&conn, PostSort::Latest, 3, 10).unwrap();
        assert_eq!(last.items.len(), 5);
        assert_eq!(last.page, 3);

        let empty = posts_page(&conn, PostSort::Latest, 4, 10).unwrap();
        assert!(empty.items.is_empty());
    }

    #[test]
    fn unknown_sort_is_rejected() {
        let err = PostSort::parse("spiciest").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn users_rank_by_combined_engagement() {
        let conn = conn();
        let busy = seed_user(&conn, "busy");
        let quiet = seed_user(&conn, "quiet");
        let silent = seed_user(&conn, "silent");

        let post = seed_post(&conn, busy, "one");
        seed_post(&conn, busy, "two");
        comments::add_comment(&conn, post, busy, "note", None).unwrap();
        votes::apply_vote(&conn, quiet, TARGET_POST, post, 1).unwrap();

        let result = users_page(&conn, 1, PER_PAGE).unwrap();
        let names: Vec<_> = result.items.iter().map(|r| r.user.username.as_str()).collect();
        assert_eq!(names, ["busy", "quiet", "silent"]);
        assert_eq!(result.items[0].post_count, 2);
        assert_eq!(result.items[0].comment_count, 1);
        assert_eq!(result.items[1].vote_count, 1);
    }
}
