use serde::{Deserialize, Serialize};

// ── Auth ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub avatar_url: String,
}

// ── Posts ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub user: User,
    pub title: String,
    pub body: String,
    pub created_at: String,
    pub view_count: i64,
    pub vote_score: i64,
    pub user_vote: Option<i32>,
    pub comment_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePost {
    pub title: String,
    pub body: String,
}

/// Slim row used by the ranking views, where the full body is never needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: i64,
    pub user: User,
    pub title: String,
    pub created_at: String,
    pub view_count: i64,
    pub vote_score: i64,
    pub comment_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkResponse {
    pub is_bookmarked: bool,
}

// ── Comments ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub depth: i64,
    pub user: User,
    pub body: String,
    pub created_at: String,
    pub vote_score: i64,
    pub replies: Vec<Comment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateComment {
    pub body: String,
    pub parent_id: Option<i64>,
}

// ── Votes ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVote {
    pub target_type: String,
    pub target_id: i64,
    pub value: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub score: i64,
    pub user_vote: Option<i32>,
}

// ── Notifications ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Comment,
    Vote,
    Ticket,
    AlgorithmUpdate,
    Other,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Comment => "comment",
            NotificationKind::Vote => "vote",
            NotificationKind::Ticket => "ticket",
            NotificationKind::AlgorithmUpdate => "algorithm_update",
            NotificationKind::Other => "other",
        }
    }

    /// Unknown kinds fall back to `Other` instead of failing the read.
    pub fn parse(s: &str) -> Self {
        match s {
            "comment" => NotificationKind::Comment,
            "vote" => NotificationKind::Vote,
            "ticket" => NotificationKind::Ticket,
            "algorithm_update" => NotificationKind::AlgorithmUpdate,
            _ => NotificationKind::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub kind: NotificationKind,
    pub message: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationList {
    pub notifications: Vec<Notification>,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkRead {
    pub mark_all: bool,
}

// ── Progression ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
}

/// Counters the achievement predicates evaluate. The first three are derived
/// by the engagement core itself; the rest are maintained by external systems
/// and only ever read here.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UserStats {
    pub post_count: i64,
    pub comment_count: i64,
    pub vote_count: i64,
    pub verified_post_count: i64,
    pub simulator_usage_count: i64,
    pub topics_completed_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementView {
    pub id: String,
    pub label: String,
    pub tier: Tier,
    pub xp_reward: i64,
    pub unlocked: bool,
    pub unlocked_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub level: i64,
    pub total_xp: i64,
    pub next_level_xp: i64,
    pub achievements: Vec<AchievementView>,
    pub new_achievements: Vec<AchievementView>,
    pub stats: UserStats,
}

// ── Ranking ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedUser {
    pub user: User,
    pub post_count: i64,
    pub comment_count: i64,
    pub vote_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}
