//! # Server module
//!
//! This module provides the telemetry HTTP server (SPEC_FULL.md §10.8):
//! `/healthz` and, when the `metrics` feature is compiled in, `/metrics` in
//! prometheus text format.

use std::{net::AddrParseError, sync::Arc};

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::svc::{cfg::Configuration, http};

// -----------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to parse listen address '{0}', {1}")]
    Listen(String, AddrParseError),
    #[error("failed to serve content, {0}")]
    Serve(hyper::Error),
}

#[tracing::instrument(skip_all)]
pub async fn serve(config: Arc<Configuration>) -> Result<(), Error> {
    let addr = config
        .operator
        .listen
        .parse()
        .map_err(|err| Error::Listen(config.operator.listen.to_owned(), err))?;

    let app = router();

    info!(addr = %addr, "Start to listen for http request");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(Error::Serve)?;

    Ok(())
}

fn router() -> Router {
    let router = Router::new().route("/healthz", get(http::healthz));

    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(http::metrics::handler));

    router
        .fallback(http::not_found)
        .layer(axum::middleware::from_fn(http::layer::access))
        .layer(TraceLayer::new_for_http())
}
