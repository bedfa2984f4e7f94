mod auth;
mod comments;
mod db;
mod error;
mod notifications;
mod posts;
mod progress;
mod ranking;
mod votes;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

pub type DbPool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub jwt_secret: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "agora.db".to_string());
    let manager = r2d2_sqlite::SqliteConnectionManager::file(&database_url);
    let pool = r2d2::Pool::new(manager).expect("Failed to create DB pool");

    db::run_migrations(&pool).expect("Failed to run migrations");

    let cors_origin =
        std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:1313".to_string());

    let state = AppState {
        db: pool,
        jwt_secret: std::env::var("JWT_SECRET")
            .unwrap_or_else(|_| "dev-secret-change-me".to_string()),
    };

    let cors = CorsLayer::new()
        .allow_origin(
            cors_origin
                .parse::<axum::http::HeaderValue>()
                .expect("Invalid CORS_ORIGIN"),
        )
        .allow_methods(AllowMethods::any())
        .allow_headers(AllowHeaders::any());

    let app = Router::new()
        .route("/api/health", get(|| async { "ok" }))
        // Auth
        .route("/api/auth/me", get(auth::me))
        // Posts
        .route("/api/posts", post(posts::create_post))
        .route("/api/posts/{id}", get(posts::get_post))
        .route("/api/posts/{id}/bookmark", post(posts::bookmark_post))
        // Comments
        .route(
            "/api/posts/{id}/comments",
            get(comments::list_comments).post(comments::create_comment),
        )
        .route(
            "/api/posts/{id}/comments/{comment_id}",
            delete(comments::delete_comment),
        )
        // Votes
        .route("/api/votes", get(votes::get_votes).post(votes::cast_vote))
        // Notifications
        .route(
            "/api/notifications",
            get(notifications::list_notifications).put(notifications::update_notifications),
        )
        // Progression
        .route("/api/users/progress", get(progress::get_progress))
        // Ranking
        .route("/api/ranking/posts", get(ranking::rank_posts))
        .route("/api/ranking/users", get(ranking::rank_users))
        .layer(cors)
        .with_state(state);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    info!(%addr, "API server listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");
    axum::serve(listener, app).await.expect("Server error");
}
