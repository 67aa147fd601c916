pub mod servers;
pub mod sync;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/sync", sync::router(state.clone()))
        .nest("/api/servers", servers::router(state.clone()))
        .route("/ws", axum::routing::get(crate::ws::ui::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
