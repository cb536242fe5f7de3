//! HTTP status endpoint for operators and supervisors.

use std::time::Duration;

use axum::{Router, http::StatusCode, routing::get};
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::state::AppState;

mod health;

/// Upper bound on a single status request (registry listing retries included)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Create the status router
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/status", get(health::status));

    with_layers(router, REQUEST_TIMEOUT).with_state(state)
}

/// Request tracing plus a hard deadline answered with 408
fn with_layers<S>(router: Router<S>, timeout: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                timeout,
            )),
    )
}
