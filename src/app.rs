use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config;
use crate::errors::AppError;
use crate::events::{init_event_bus, start_audit_listener, EventBusAuditSink};
use crate::jwt::JwtConfig;
use crate::routes::{groups, health, members, projects, tasks};
use crate::store::{Repositories, SqliteStore};
use crate::workflow::Workflow;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub workflow: Arc<Workflow>,
    pub jwt: Arc<JwtConfig>,
}

impl AppState {
    pub fn new(pool: SqlitePool, workflow: Workflow, jwt: JwtConfig) -> Self {
        Self {
            pool,
            workflow: Arc::new(workflow),
            jwt: Arc::new(jwt),
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let capacity = config::audit_channel_capacity()?;
    Ok(build_router(pool, jwt_config, capacity))
}

/// Wires the SQLite store, the audit bus and its listener, and all routes.
/// Must be called within a tokio runtime.
pub fn build_router(pool: SqlitePool, jwt: JwtConfig, audit_capacity: usize) -> Router {
    let (bus, rx) = init_event_bus(audit_capacity);
    tokio::spawn(start_audit_listener(rx, pool.clone()));

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let workflow = Workflow::new(Repositories::from_store(store), Arc::new(EventBusAuditSink::new(bus)));
    let state = AppState::new(pool, workflow, jwt);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let project_routes = Router::new()
        .route("/", get(projects::list_projects).post(projects::create_project))
        .route("/quota", get(projects::quota))
        .route(
            "/:id",
            get(projects::get_project)
                .put(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/:id/members", get(members::list_members).post(members::upsert_member))
        .route("/:id/groups", get(groups::list_groups).post(groups::create_group))
        .route("/:id/tasks", get(tasks::list_tasks).post(tasks::create_task));

    let group_routes = Router::new()
        .route("/:id", delete(groups::delete_group))
        .route("/:id/tasks", get(groups::group_tasks))
        .route("/:id/members", post(groups::add_group_member))
        .route("/:id/members/:user_id", delete(groups::remove_group_member));

    let task_routes = Router::new()
        .route(
            "/:id",
            get(tasks::get_task).put(tasks::update_task).delete(tasks::delete_task),
        )
        .route("/:id/status", put(tasks::update_status));

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/projects", project_routes)
        .nest("/groups", group_routes)
        .nest("/tasks", task_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
