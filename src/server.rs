//! Dashboard HTTP API.

use crate::artifacts::{self, ScreenshotArtifact};
use crate::reporting::DashboardSource;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::Filter;

#[derive(Debug, Deserialize)]
struct ScreenshotQuery {
    /// Include base64 image data (default true)
    inline: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ScreenshotList {
    pub count: usize,
    pub screenshots: Vec<ScreenshotArtifact>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

/// `/health`, `/api/test-results` and `/api/screenshots`
pub fn routes(
    source: Arc<dyn DashboardSource>,
    artifact_dir: PathBuf,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({ "status": "ok" })));

    let results = warp::path!("api" / "test-results")
        .and(warp::get())
        .and(warp::any().map(move || source.clone()))
        .and_then(handle_test_results);

    let screenshots = warp::path!("api" / "screenshots")
        .and(warp::get())
        .and(warp::query::<ScreenshotQuery>())
        .and(warp::any().map(move || artifact_dir.clone()))
        .and_then(handle_screenshots);

    let cors = warp::cors().allow_any_origin().allow_methods(vec!["GET"]);

    health
        .or(results)
        .or(screenshots)
        .with(cors)
        .with(warp::log("storefront_e2e::server"))
}

async fn handle_test_results(
    source: Arc<dyn DashboardSource>,
) -> Result<impl warp::Reply, Infallible> {
    let snapshot = source.snapshot().await;
    Ok(warp::reply::json(&snapshot))
}

async fn handle_screenshots(
    query: ScreenshotQuery,
    dir: PathBuf,
) -> Result<Box<dyn warp::Reply>, Infallible> {
    match artifacts::list_screenshots(&dir, query.inline.unwrap_or(true)).await {
        Ok(screenshots) => Ok(Box::new(warp::reply::json(&ScreenshotList {
            count: screenshots.len(),
            screenshots,
        }))),
        Err(e) => {
            log::error!("Failed to list screenshots in {}: {}", dir.display(), e);
            Ok(Box::new(warp::reply::with_status(
                warp::reply::json(&ErrorBody {
                    status: "error",
                    message: format!("Failed to list screenshots: {}", e),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            )))
        }
    }
}

/// Bind explicitly so an occupied port is reported instead of panicking
pub async fn serve(
    source: Arc<dyn DashboardSource>,
    artifact_dir: PathBuf,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Port {} is already in use or unavailable: {}", addr.port(), e))?;

    log::info!("Dashboard API listening on http://{}", addr);
    warp::serve(routes(source, artifact_dir))
        .run_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
        .await;
    Ok(())
}
