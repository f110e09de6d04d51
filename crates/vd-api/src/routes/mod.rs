pub mod vps;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};

use crate::auth::auth_middleware;
use crate::state::AppState;

pub fn api_router(state: AppState) -> Router {
    let authed = Router::new()
        .route("/vps", post(vps::create_vps).get(vps::list_vps))
        .route("/vps/{id}", get(vps::get_vps))
        .route("/vps/{id}/suspend", post(vps::suspend_vps))
        .route("/vps/{id}/resume", post(vps::resume_vps))
        .route("/vps/{id}/regenerate", post(vps::regenerate_vps))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new().merge(authed).with_state(state)
}
