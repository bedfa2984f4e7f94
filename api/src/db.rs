use rusqlite::Connection;

use crate::DbPool;

pub fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get()?;
    migrate(&conn)?;
    Ok(())
}

pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            username               TEXT NOT NULL,
            avatar_url             TEXT NOT NULL DEFAULT '',
            is_moderator           INTEGER NOT NULL DEFAULT 0,
            -- counters owned by external systems; read-only for this service
            verified_post_count    INTEGER NOT NULL DEFAULT 0,
            simulator_usage_count  INTEGER NOT NULL DEFAULT 0,
            topics_completed_count INTEGER NOT NULL DEFAULT 0,
            created_at             TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS posts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id   INTEGER NOT NULL REFERENCES users(id),
            title       TEXT NOT NULL,
            body        TEXT NOT NULL,
            view_count  INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_id);

        CREATE TABLE IF NOT EXISTS comments (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id     INTEGER NOT NULL REFERENCES posts(id),
            parent_id   INTEGER REFERENCES comments(id),
            author_id   INTEGER NOT NULL REFERENCES users(id),
            body        TEXT NOT NULL,
            depth       INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id);
        CREATE INDEX IF NOT EXISTS idx_comments_parent ON comments(parent_id);

        CREATE TABLE IF NOT EXISTS votes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            target_type TEXT NOT NULL,
            target_id   INTEGER NOT NULL,
            value       INTEGER NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(user_id, target_type, target_id)
        );
        CREATE INDEX IF NOT EXISTS idx_votes_target ON votes(target_type, target_id);

        CREATE TABLE IF NOT EXISTS notifications (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            recipient_id INTEGER NOT NULL REFERENCES users(id),
            kind         TEXT NOT NULL,
            message      TEXT NOT NULL,
            link         TEXT,
            is_read      INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient_id);

        CREATE TABLE IF NOT EXISTS achievement_unlocks (
            user_id        INTEGER NOT NULL REFERENCES users(id),
            achievement_id TEXT NOT NULL,
            unlocked_at    TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(user_id, achievement_id)
        );

        CREATE TABLE IF NOT EXISTS bookmarks (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            post_id     INTEGER NOT NULL REFERENCES posts(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(user_id, post_id)
        );
        ",
    )
}

#[cfg(test)]
pub(crate) mod testutil {
    use rusqlite::Connection;

    pub fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        super::migrate(&conn).unwrap();
        conn
    }

    pub fn seed_user(conn: &Connection, username: &str) -> i64 {
        conn.execute("INSERT INTO users (username) VALUES (?1)", [username])
            .unwrap();
        conn.last_insert_rowid()
    }

    pub fn seed_post(conn: &Connection, author_id: i64, title: &str) -> i64 {
        conn.execute(
            "INSERT INTO posts (author_id, title, body) VALUES (?1, ?2, 'body')",
            rusqlite::params![author_id, title],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    /// Seed a post with an explicit timestamp, for ordering assertions.
    pub fn seed_post_at(conn: &Connection, author_id: i64, title: &str, created_at: &str) -> i64 {
        conn.execute(
            "INSERT INTO posts (author_id, title, body, created_at) VALUES (?1, ?2, 'body', ?3)",
            rusqlite::params![author_id, title, created_at],
        )
        .unwrap();
        conn.last_insert_rowid()
    }
}
