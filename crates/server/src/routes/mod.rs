use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod admin;
pub mod public;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    let max_upload_bytes = state.hymie().definition().config.server.max_upload_bytes;

    let admin_routes = Router::new()
        .route("/admin", get(admin::admin_root))
        .route("/admin/users", get(admin::users))
        .route("/admin/users_data", get(admin::users_data))
        .route("/admin/history/{uid}", get(admin::history))
        .route("/admin/history/{uid}/{endpoint}", get(admin::latest_entry))
        .route("/admin/history/{uid}/{endpoint}/{timestamp}", get(admin::entry))
        .route("/admin/history_data/{uid}", get(admin::history_data));

    Router::new()
        .route("/", get(public::index))
        .route("/register", get(public::register_form).post(public::register))
        .route("/recover", get(public::recover_form).post(public::recover))
        .route("/recover/{email}", get(public::recover_email).post(public::recover_email))
        .route("/file/{*file_id}", get(public::file))
        .route("/view/{uid}", get(public::view_current).post(public::submit_current))
        .route(
            "/view/{uid}/{hcsf}/{endpoint}",
            get(public::view_endpoint).post(public::submit_endpoint),
        )
        .route("/endpoint_descriptions", get(public::endpoint_descriptions))
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
