use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{
    self, calendar, dashboard, episodes, kanban, programs, review, session,
};

fn build_cors(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    // Session bootstrap and liveness are reachable without a token
    let public_routes = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/auth/signup", post(session::sign_up))
        .route("/api/auth/signin", post(session::sign_in))
        .layer(middleware::from_fn(security_headers))
        .layer(build_cors(&state.allowed_origins))
        .with_state(state.clone());

    let authed_routes = Router::new()
        .route("/api/deployment", get(session::get_deployment))
        .route(
            "/api/programs",
            get(programs::list_programs).post(programs::create_program),
        )
        .route("/api/programs/nearby", get(programs::nearby_programs))
        .route(
            "/api/programs/{id}",
            get(programs::get_program)
                .patch(programs::update_program)
                .delete(programs::delete_program),
        )
        .route(
            "/api/programs/{id}/status",
            patch(programs::set_program_status),
        )
        .route(
            "/api/episodes",
            get(episodes::list_episodes).post(episodes::create_episode),
        )
        .route("/api/episodes/overdue", get(episodes::overdue_episodes))
        .route(
            "/api/episodes/{id}",
            get(episodes::get_episode)
                .patch(episodes::update_episode)
                .delete(episodes::delete_episode),
        )
        .route(
            "/api/episodes/{id}/status",
            patch(episodes::update_episode_status),
        )
        .route(
            "/api/episodes/{id}/history",
            get(episodes::episode_history),
        )
        .route("/api/kanban/episodes", get(kanban::episode_board))
        .route("/api/kanban/programs", get(kanban::program_board))
        .route(
            "/api/calendar/tasks",
            get(calendar::list_tasks).post(calendar::create_task),
        )
        .route(
            "/api/calendar/tasks/{id}",
            patch(calendar::update_task).delete(calendar::delete_task),
        )
        .route("/api/calendar/tasks/{id}/move", post(calendar::move_task))
        .route("/api/calendar", get(calendar::month_view))
        .route(
            "/api/dashboard/widgets",
            get(dashboard::get_dashboard).post(dashboard::create_widget),
        )
        .route(
            "/api/dashboard/widgets/reorder",
            post(dashboard::reorder_widgets),
        )
        .route(
            "/api/dashboard/widgets/{id}",
            patch(dashboard::update_widget).delete(dashboard::delete_widget),
        )
        .route("/api/review/run", post(review::run_review))
        .route("/api/events", get(super::sse_events_endpoint))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(middleware::from_fn(security_headers))
        .layer(build_cors(&state.allowed_origins))
        .with_state(state.clone());

    public_routes.merge(authed_routes)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    response
}
