use axum::{extract::State, http::HeaderMap, Json};
use agora_shared::{MarkRead, Notification, NotificationKind, NotificationList};
use rusqlite::{params, Connection};
use std::collections::HashSet;

use crate::{auth, error::ApiError, AppState};

// ── Dispatch ──

/// Write one notification row for one recipient.
pub fn dispatch(
    conn: &Connection,
    recipient_id: i64,
    kind: NotificationKind,
    message: &str,
    link: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO notifications (recipient_id, kind, message, link)
         VALUES (?1, ?2, ?3, ?4)",
        params![recipient_id, kind.as_str(), message, link],
    )?;
    Ok(())
}

/// One event, several recipients. Duplicate recipients collapse, so a single
/// cause never produces two rows for the same user. External collaborators
/// (moderation bans, ticket replies, announcements) enter through here too.
pub fn fan_out(
    conn: &Connection,
    recipients: &[i64],
    kind: NotificationKind,
    message: &str,
    link: Option<&str>,
) -> rusqlite::Result<()> {
    let mut seen = HashSet::new();
    for &recipient in recipients {
        if seen.insert(recipient) {
            dispatch(conn, recipient, kind, message, link)?;
        }
    }
    Ok(())
}

/// Notification writes ride along with some primary action and must never
/// fail it; the error stops here.
pub fn best_effort(result: rusqlite::Result<()>) {
    if let Err(err) = result {
        tracing::warn!(error = %err, "notification dispatch failed");
    }
}

// ── Reads & state ──

pub fn list(conn: &Connection, user_id: i64) -> rusqlite::Result<NotificationList> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, message, link, is_read, created_at
         FROM notifications
         WHERE recipient_id = ?1
         ORDER BY created_at DESC, id DESC",
    )?;

    let notifications = stmt
        .query_map([user_id], |row| {
            let kind: String = row.get(1)?;
            let is_read: i64 = row.get(4)?;
            Ok(Notification {
                id: row.get(0)?,
                kind: NotificationKind::parse(&kind),
                message: row.get(2)?,
                link: row.get(3)?,
                is_read: is_read != 0,
                created_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let unread_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND is_read = 0",
        [user_id],
        |row| row.get(0),
    )?;

    Ok(NotificationList {
        notifications,
        unread_count,
    })
}

pub fn mark_all_read(conn: &Connection, user_id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE recipient_id = ?1 AND is_read = 0",
        [user_id],
    )?;
    Ok(())
}

// ── Handlers ──

/// GET /api/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<NotificationList>, ApiError> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;

    let pool = state.db.clone();
    let resp = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        Ok::<_, ApiError>(list(&conn, user_id)?)
    })
    .await??;

    Ok(Json(resp))
}

/// PUT /api/notifications — currently only {mark_all: true}
pub async fn update_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<MarkRead>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;

    if payload.mark_all {
        let pool = state.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            Ok::<_, ApiError>(mark_all_read(&conn, user_id)?)
        })
        .await??;
    }

    Ok(Json(serde_json::json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testutil::{conn, seed_user};

    #[test]
    fn list_is_newest_first_with_unread_count() {
        let conn = conn();
        let user = seed_user(&conn, "alice");

        dispatch(&conn, user, NotificationKind::Comment, "first", None).unwrap();
        dispatch(&conn, user, NotificationKind::Vote, "second", None).unwrap();
        dispatch(&conn, user, NotificationKind::Ticket, "third", Some("/tickets/9")).unwrap();

        let result = list(&conn, user).unwrap();
        assert_eq!(result.unread_count, 3);
        let messages: Vec<_> = result
            .notifications
            .iter()
            .map(|n| n.message.as_str())
            .collect();
        assert_eq!(messages, ["third", "second", "first"]);
        assert_eq!(result.notifications[0].kind, NotificationKind::Ticket);
        assert_eq!(result.notifications[0].link.as_deref(), Some("/tickets/9"));
    }

    #[test]
    fn mark_all_read_is_idempotent() {
        let conn = conn();
        let user = seed_user(&conn, "alice");

        dispatch(&conn, user, NotificationKind::Vote, "a vote", None).unwrap();
        dispatch(&conn, user, NotificationKind::Comment, "a comment", None).unwrap();

        mark_all_read(&conn, user).unwrap();
        let first = list(&conn, user).unwrap();
        assert_eq!(first.unread_count, 0);
        assert!(first.notifications.iter().all(|n| n.is_read));

        mark_all_read(&conn, user).unwrap();
        let second = list(&conn, user).unwrap();
        assert_eq!(second.unread_count, 0);
        assert_eq!(second.notifications.len(), first.notifications.len());
    }

    #[test]
    fn fan_out_dedupes_recipients() {
        let conn = conn();
        let alice = seed_user(&conn, "alice");
        let bob = seed_user(&conn, "bob");

        fan_out(
            &conn,
            &[alice, alice, bob, alice],
            NotificationKind::AlgorithmUpdate,
            "ranking refresh shipped",
            Some("/updates/12"),
        )
        .unwrap();

        assert_eq!(list(&conn, alice).unwrap().notifications.len(), 1);
        assert_eq!(list(&conn, bob).unwrap().notifications.len(), 1);
    }

    #[test]
    fn unknown_kind_reads_back_as_other() {
        let conn = conn();
        let user = seed_user(&conn, "alice");
        conn.execute(
            "INSERT INTO notifications (recipient_id, kind, message) VALUES (?1, 'legacy', 'old row')",
            [user],
        )
        .unwrap();

        let result = list(&conn, user).unwrap();
        assert_eq!(result.notifications[0].kind, NotificationKind::Other);
    }

    #[test]
    fn marking_read_only_touches_own_rows() {
        let conn = conn();
        let alice = seed_user(&conn, "alice");
        let bob = seed_user(&conn, "bob");

        dispatch(&conn, alice, NotificationKind::Vote, "for alice", None).unwrap();
        dispatch(&conn, bob, NotificationKind::Vote, "for bob", None).unwrap();

        mark_all_read(&conn, alice).unwrap();
        assert_eq!(list(&conn, alice).unwrap().unread_count, 0);
        assert_eq!(list(&conn, bob).unwrap().unread_count, 1);
    }
}
