use axum::{extract::State, http::HeaderMap, Json};
use agora_shared::{AchievementView, NotificationKind, ProgressResponse, Tier, UserStats};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};

use crate::{auth, error::ApiError, notifications, AppState};

pub const XP_PER_LEVEL: i64 = 50;

/// One achievement: a stable id, display metadata, and a pure predicate over
/// the stats snapshot. The catalog is fixed at compile time.
pub struct AchievementDef {
    pub id: &'static str,
    pub label: &'static str,
    pub tier: Tier,
    pub xp_reward: i64,
    pub unlocked: fn(&UserStats) -> bool,
}

pub static ACHIEVEMENTS: &[AchievementDef] = &[
    AchievementDef {
        id: "first_post",
        label: "First Post",
        tier: Tier::Bronze,
        xp_reward: 10,
        unlocked: |s| s.post_count >= 1,
    },
    AchievementDef {
        id: "first_comment",
        label: "Breaking the Ice",
        tier: Tier::Bronze,
        xp_reward: 10,
        unlocked: |s| s.comment_count >= 1,
    },
    AchievementDef {
        id: "first_vote",
        label: "Opinionated",
        tier: Tier::Bronze,
        xp_reward: 5,
        unlocked: |s| s.vote_count >= 1,
    },
    AchievementDef {
        id: "prolific_poster",
        label: "Prolific Poster",
        tier: Tier::Silver,
        xp_reward: 25,
        unlocked: |s| s.post_count >= 10,
    },
    AchievementDef {
        id: "conversationalist",
        label: "Conversationalist",
        tier: Tier::Silver,
        xp_reward: 25,
        unlocked: |s| s.comment_count >= 25,
    },
    AchievementDef {
        id: "active_voter",
        label: "Active Voter",
        tier: Tier::Silver,
        xp_reward: 20,
        unlocked: |s| s.vote_count >= 50,
    },
    AchievementDef {
        id: "simulator_pilot",
        label: "Simulator Pilot",
        tier: Tier::Silver,
        xp_reward: 20,
        unlocked: |s| s.simulator_usage_count >= 5,
    },
    AchievementDef {
        id: "verified_contributor",
        label: "Verified Contributor",
        tier: Tier::Gold,
        xp_reward: 50,
        unlocked: |s| s.verified_post_count >= 1,
    },
    AchievementDef {
        id: "curriculum_complete",
        label: "Curriculum Complete",
        tier: Tier::Gold,
        xp_reward: 50,
        unlocked: |s| s.topics_completed_count >= 10,
    },
];

pub fn level_for(total_xp: i64) -> i64 {
    total_xp / XP_PER_LEVEL + 1
}

pub fn xp_to_next(total_xp: i64) -> i64 {
    XP_PER_LEVEL - total_xp % XP_PER_LEVEL
}

// ── Stats & recompute ──

/// Assemble the snapshot the predicates see: engagement counts derived from
/// rows plus the externally maintained counters on the user record.
pub fn collect_stats(conn: &Connection, user_id: i64) -> Result<UserStats, ApiError> {
    let external = conn
        .query_row(
            "SELECT verified_post_count, simulator_usage_count, topics_completed_count
             FROM users WHERE id = ?1",
            [user_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
        )
        .optional()?;
    let (verified_post_count, simulator_usage_count, topics_completed_count) =
        external.ok_or(ApiError::NotFound("user"))?;

    let post_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM posts WHERE author_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;
    let comment_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE author_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;
    let vote_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM votes WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;

    Ok(UserStats {
        post_count,
        comment_count,
        vote_count,
        verified_post_count,
        simulator_usage_count,
        topics_completed_count,
    })
}

pub struct Recompute {
    pub newly_unlocked: Vec<&'static AchievementDef>,
    pub total_xp: i64,
    pub level: i64,
    pub xp_to_next_level: i64,
}

/// Evaluate every locked achievement against the snapshot and award the ones
/// that now pass. Unlocks only ever accumulate; the unique index makes a
/// racing recompute for the same user a no-op, never a double award.
pub fn recompute(conn: &Connection, user_id: i64, stats: &UserStats) -> Result<Recompute, ApiError> {
    let unlocked = unlocked_ids(conn, user_id)?;

    let mut newly_unlocked = Vec::new();
    for def in ACHIEVEMENTS {
        if unlocked.contains(def.id) || !(def.unlocked)(stats) {
            continue;
        }
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO achievement_unlocks (user_id, achievement_id)
             VALUES (?1, ?2)",
            params![user_id, def.id],
        )?;
        if inserted > 0 {
            newly_unlocked.push(def);
        }
    }

    for def in &newly_unlocked {
        notifications::best_effort(notifications::dispatch(
            conn,
            user_id,
            NotificationKind::Other,
            &format!("Achievement unlocked: {}", def.label),
            Some("/profile"),
        ));
    }

    let total_xp = total_xp(conn, user_id)?;
    Ok(Recompute {
        newly_unlocked,
        total_xp,
        level: level_for(total_xp),
        xp_to_next_level: xp_to_next(total_xp),
    })
}

fn unlocked_ids(conn: &Connection, user_id: i64) -> Result<HashSet<String>, ApiError> {
    let mut stmt =
        conn.prepare("SELECT achievement_id FROM achievement_unlocks WHERE user_id = ?1")?;
    let ids = stmt
        .query_map([user_id], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

/// XP is never stored; it is the sum of rewards over the live unlock set,
/// joined against the static catalog.
pub fn total_xp(conn: &Connection, user_id: i64) -> Result<i64, ApiError> {
    let ids = unlocked_ids(conn, user_id)?;
    Ok(ACHIEVEMENTS
        .iter()
        .filter(|def| ids.contains(def.id))
        .map(|def| def.xp_reward)
        .sum())
}

// ── Handlers ──

/// GET /api/users/progress — recompute runs lazily on every read
pub async fn get_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProgressResponse>, ApiError> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;

    let pool = state.db.clone();
    let resp = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;

        let stats = collect_stats(&conn, user_id)?;
        let outcome = recompute(&conn, user_id, &stats)?;

        let mut stmt = conn.prepare(
            "SELECT achievement_id, unlocked_at FROM achievement_unlocks WHERE user_id = ?1",
        )?;
        let unlocked_at: HashMap<String, String> = stmt
            .query_map([user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;

        let view = |def: &AchievementDef| AchievementView {
            id: def.id.to_string(),
            label: def.label.to_string(),
            tier: def.tier,
            xp_reward: def.xp_reward,
            unlocked: unlocked_at.contains_key(def.id),
            unlocked_at: unlocked_at.get(def.id).cloned(),
        };

        let achievements = ACHIEVEMENTS.iter().map(view).collect();
        let new_achievements = outcome
            .newly_unlocked
            .iter()
            .map(|def| view(def))
            .collect();

        Ok::<_, ApiError>(ProgressResponse {
            level: outcome.level,
            total_xp: outcome.total_xp,
            next_level_xp: outcome.xp_to_next_level,
            achievements,
            new_achievements,
            stats,
        })
    })
    .await??;

    Ok(Json(resp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comments;
    use crate::db::testutil::{conn, seed_post, seed_user};
    use crate::votes::{self, TARGET_POST};

    fn stats(post_count: i64) -> UserStats {
        UserStats {
            post_count,
            ..UserStats::default()
        }
    }

    #[test]
    fn predicates_fire_on_their_thresholds() {
        let def = |id: &str| ACHIEVEMENTS.iter().find(|d| d.id == id).unwrap();

        assert!(!(def("first_post").unlocked)(&stats(0)));
        assert!((def("first_post").unlocked)(&stats(1)));
        assert!(!(def("prolific_poster").unlocked)(&stats(9)));
        assert!((def("prolific_poster").unlocked)(&stats(10)));

        let verified = UserStats {
            verified_post_count: 1,
            ..UserStats::default()
        };
        assert!((def("verified_contributor").unlocked)(&verified));
    }

    #[test]
    fn level_boundaries() {
        assert_eq!(level_for(0), 1);
        assert_eq!(level_for(49), 1);
        assert_eq!(level_for(50), 2);
        assert_eq!(xp_to_next(0), 50);
        assert_eq!(xp_to_next(49), 1);
        assert_eq!(xp_to_next(50), 50);
    }

    #[test]
    fn recompute_awards_each_achievement_once() {
        let conn = conn();
        let alice = seed_user(&conn, "alice");
        seed_post(&conn, alice, "hello");

        let snapshot = collect_stats(&conn, alice).unwrap();
        let first = recompute(&conn, alice, &snapshot).unwrap();
        assert_eq!(first.newly_unlocked.len(), 1);
        assert_eq!(first.newly_unlocked[0].id, "first_post");
        assert_eq!(first.total_xp, 10);
        assert_eq!(first.level, 1);

        let second = recompute(&conn, alice, &snapshot).unwrap();
        assert!(second.newly_unlocked.is_empty());
        assert_eq!(second.total_xp, 10);
    }

    #[test]
    fn unlocks_survive_stats_dropping_back() {
        let conn = conn();
        let alice = seed_user(&conn, "alice");

        let inflated = stats(1);
        let first = recompute(&conn, alice, &inflated).unwrap();
        assert_eq!(first.total_xp, 10);

        // snapshot no longer satisfies the predicate; the unlock stays
        let outcome = recompute(&conn, alice, &stats(0)).unwrap();
        assert!(outcome.newly_unlocked.is_empty());
        assert_eq!(outcome.total_xp, 10);
    }

    #[test]
    fn collect_stats_counts_rows_and_reads_external_counters() {
        let conn = conn();
        let alice = seed_user(&conn, "alice");
        let bob = seed_user(&conn, "bob");
        let post = seed_post(&conn, alice, "hello");
        comments::add_comment(&conn, post, alice, "self reply", None).unwrap();
        votes::apply_vote(&conn, alice, TARGET_POST, post, 1).unwrap();
        conn.execute(
            "UPDATE users SET simulator_usage_count = 7, topics_completed_count = 3
             WHERE id = ?1",
            [alice],
        )
        .unwrap();

        let snapshot = collect_stats(&conn, alice).unwrap();
        assert_eq!(snapshot.post_count, 1);
        assert_eq!(snapshot.comment_count, 1);
        assert_eq!(snapshot.vote_count, 1);
        assert_eq!(snapshot.simulator_usage_count, 7);
        assert_eq!(snapshot.topics_completed_count, 3);

        let empty = collect_stats(&conn, bob).unwrap();
        assert_eq!(empty.post_count, 0);

        let err = collect_stats(&conn, 404).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn gold_tier_unlock_reaches_level_two() {
        let conn = conn();
        let alice = seed_user(&conn, "alice");
        conn.execute(
            "UPDATE users SET verified_post_count = 1 WHERE id = ?1",
            [alice],
        )
        .unwrap();
        seed_post(&conn, alice, "hello");

        let snapshot = collect_stats(&conn, alice).unwrap();
        let outcome = recompute(&conn, alice, &snapshot).unwrap();
        // first_post (10) + verified_contributor (50)
        assert_eq!(outcome.total_xp, 60);
        assert_eq!(outcome.level, 2);
        assert_eq!(outcome.xp_to_next_level, 40);
    }

    #[test]
    fn unlock_sends_an_inbox_note() {
        let conn = conn();
        let alice = seed_user(&conn, "alice");
        seed_post(&conn, alice, "hello");

        let snapshot = collect_stats(&conn, alice).unwrap();
        recompute(&conn, alice, &snapshot).unwrap();

        let inbox = notifications::list(&conn, alice).unwrap();
        assert_eq!(inbox.unread_count, 1);
        assert_eq!(inbox.notifications[0].kind, NotificationKind::Other);
        assert_eq!(
            inbox.notifications[0].message,
            "Achievement unlocked: First Post"
        );
    }
}
