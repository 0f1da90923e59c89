//! HTTP admin surface.
//!
//! Read routes serve copy-out snapshots; the only mutating route,
//! `PUT /transaction`, requires the per-node API token and forwards to
//! the core executor over the command channel.

use crate::state::{ApiCommand, ApiSender, NodeState};
use crate::transport::{PeerInfo, PeerTable};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use diva_chain::Command;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Header carrying the API token for mutating routes.
pub const TOKEN_HEADER: &str = "diva-api-token";

/// Default and maximum page sizes for `/blocks/page`.
const PAGE_SIZE_DEFAULT: usize = 16;
const PAGE_SIZE_MAX: usize = 128;

/// Shared state for the admin handlers.
#[derive(Clone)]
pub struct AppState {
    pub state: Arc<NodeState>,
    pub commands: ApiSender,
    pub peers: Arc<PeerTable>,
    pub token: String,
}

/// Loads the per-node API token, generating one on first boot.
pub fn load_or_create_token(path_state: &std::path::Path) -> std::io::Result<String> {
    std::fs::create_dir_all(path_state)?;
    let path = path_state.join("api-token");

    if let Ok(token) = std::fs::read_to_string(&path) {
        let token = token.trim().to_string();
        if !token.is_empty() {
            return Ok(token);
        }
    }

    let token = diva_chain::random_ident() + &diva_chain::random_ident();
    std::fs::write(&path, &token)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(token)
}

/// Builds the admin router.
pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/transaction", put(put_transaction))
        .route("/block/{id}", get(get_block))
        .route("/blocks", get(get_blocks))
        .route("/blocks/page/{page}", get(get_blocks_page))
        .route("/peers", get(get_peers))
        .route("/network", get(get_network))
        .route("/state", get(get_state))
        .route("/pool/transactions", get(get_pool_transactions))
        .route("/pool/votes", get(get_pool_votes))
        .route("/stack/transactions", get(get_stack_transactions))
        .route("/about", get(get_about))
        .with_state(app)
}

/// Serves the admin API until the listener closes.
pub async fn serve(addr: SocketAddr, app: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "admin api listening");
    axum::serve(listener, router(app)).await
}

#[derive(Debug, Serialize)]
struct IdentResponse {
    ident: String,
}

async fn put_transaction(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(commands): Json<Vec<Command>>,
) -> Response {
    if !token_ok(&app, &headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if commands.is_empty() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let (resp, rx) = oneshot::channel();
    if app
        .commands
        .send(ApiCommand::Stack { commands, resp })
        .await
        .is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match rx.await {
        Ok(Ok(ident)) => Json(IdentResponse { ident }).into_response(),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "transaction rejected");
            StatusCode::FORBIDDEN.into_response()
        }
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn get_block(State(app): State<AppState>, Path(id): Path<String>) -> Response {
    let height = match id.as_str() {
        "genesis" => 0,
        "latest" => return Json(app.state.tip()).into_response(),
        other => match other.parse::<u64>() {
            Ok(height) => height,
            Err(_) => return StatusCode::NOT_FOUND.into_response(),
        },
    };

    let (resp, rx) = oneshot::channel();
    if app
        .commands
        .send(ApiCommand::GetBlock { height, resp })
        .await
        .is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match rx.await {
        Ok(Some(block)) => Json(block).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    gte: Option<u64>,
    lte: Option<u64>,
    limit: Option<usize>,
}

async fn get_blocks(State(app): State<AppState>, Query(query): Query<RangeQuery>) -> Response {
    let tip = app.state.tip().height;
    let gte = query.gte.unwrap_or(0);
    let lte = query.lte.unwrap_or(tip);
    let limit = query.limit.unwrap_or(PAGE_SIZE_MAX).min(PAGE_SIZE_MAX);

    range_response(&app, gte, lte, limit).await
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    size: Option<usize>,
}

async fn get_blocks_page(
    State(app): State<AppState>,
    Path(page): Path<u64>,
    Query(query): Query<PageQuery>,
) -> Response {
    let size = query
        .size
        .unwrap_or(PAGE_SIZE_DEFAULT)
        .clamp(1, PAGE_SIZE_MAX);
    let tip = app.state.tip().height;

    let Some((gte, lte)) = page_bounds(tip, page, size) else {
        return Json(Vec::<diva_chain::Block>::new()).into_response();
    };
    range_response(&app, gte, lte, size).await
}

async fn range_response(app: &AppState, gte: u64, lte: u64, limit: usize) -> Response {
    let (resp, rx) = oneshot::channel();
    if app
        .commands
        .send(ApiCommand::Range {
            gte,
            lte,
            limit,
            resp,
        })
        .await
        .is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match rx.await {
        Ok(blocks) => Json(blocks).into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// Heights covered by 1-based `page` of `size`, counting back from the
/// tip; `None` when the page lies beyond genesis.
fn page_bounds(tip: u64, page: u64, size: usize) -> Option<(u64, u64)> {
    if page == 0 {
        return None;
    }
    let size = size as u64;
    let lte = tip.checked_sub((page - 1) * size)?;
    let gte = lte.saturating_sub(size - 1);
    Some((gte, lte))
}

async fn get_peers(State(app): State<AppState>) -> Json<Vec<(String, PeerInfo)>> {
    let peers = app
        .peers
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();
    Json(peers)
}

async fn get_network(State(app): State<AppState>) -> Response {
    Json(app.state.network()).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StateResponse {
    public_key: diva_crypto::PublicKey,
    height: u64,
    phase: String,
    pool: usize,
    votes: usize,
    network: usize,
}

async fn get_state(State(app): State<AppState>) -> Json<StateResponse> {
    let tip = app.state.tip();
    Json(StateResponse {
        public_key: app.state.public_key(),
        height: tip.height,
        phase: format!("{:?}", app.state.phase()),
        pool: app.state.pool().len(),
        votes: app.state.votes().len(),
        network: app.state.network().len(),
    })
}

async fn get_pool_transactions(State(app): State<AppState>) -> Response {
    Json(app.state.pool()).into_response()
}

async fn get_pool_votes(State(app): State<AppState>) -> Response {
    Json(app.state.votes()).into_response()
}

async fn get_stack_transactions(State(app): State<AppState>) -> Response {
    let local = app.state.public_key();
    let stacked: Vec<_> = app
        .state
        .pool()
        .into_iter()
        .filter(|tx| tx.origin == local)
        .collect();
    Json(stacked).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AboutResponse {
    name: &'static str,
    version: &'static str,
    public_key: diva_crypto::PublicKey,
}

async fn get_about(State(app): State<AppState>) -> Json<AboutResponse> {
    Json(AboutResponse {
        name: "divachain",
        version: env!("CARGO_PKG_VERSION"),
        public_key: app.state.public_key(),
    })
}

fn token_ok(app: &AppState, headers: &HeaderMap) -> bool {
    headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == app.token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn page_bounds_count_back_from_tip() {
        // tip 10, size 4: page 1 = 7..=10, page 2 = 3..=6, page 3 = 0..=2.
        assert_eq!(page_bounds(10, 1, 4), Some((7, 10)));
        assert_eq!(page_bounds(10, 2, 4), Some((3, 6)));
        assert_eq!(page_bounds(10, 3, 4), Some((0, 2)));
        assert_eq!(page_bounds(10, 4, 4), None);
        assert_eq!(page_bounds(10, 0, 4), None);
    }

    #[test]
    fn page_bounds_clamp_at_genesis() {
        assert_eq!(page_bounds(2, 1, 16), Some((0, 2)));
    }

    #[test]
    fn token_is_created_once() {
        let tmp = TempDir::new().unwrap();

        let t1 = load_or_create_token(tmp.path()).unwrap();
        let t2 = load_or_create_token(tmp.path()).unwrap();

        assert_eq!(t1, t2);
        assert_eq!(t1.len(), 16);
    }
}
