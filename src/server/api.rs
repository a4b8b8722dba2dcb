use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use log::info;
use tokio::task::spawn_blocking;

use super::error::{BadRequest, Result};
use super::state::AppState;
use super::types::*;
use crate::engine::SearchError;
use crate::metrics;

/// 使用文本搜索图片
#[utoipa::path(
    post,
    path = "/search",
    request_body = SearchRequest,
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();
    let count = data.count.unwrap_or(state.count);

    info!("正在搜索: {:?}", data.query);

    let result = match state.engine.search_async(data.query, count).await {
        Ok(result) => result,
        // 还没有索引时视为没有结果
        Err(e) if matches!(e.downcast_ref::<SearchError>(), Some(SearchError::EmptyIndex)) => {
            vec![]
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(SearchResponse { time: start.elapsed().as_millis() as u64, result }))
}

/// 重新加载索引，加载失败时保留原有索引
#[utoipa::path(
    post,
    path = "/reload",
    request_body = ReloadRequest,
    responses(
        (status = 200, body = ReloadResponse),
    )
)]
pub async fn reload_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<ReloadRequest>,
) -> Result<Json<ReloadResponse>> {
    let path = data
        .path
        .map(PathBuf::from)
        .or_else(|| state.engine.store().location())
        .ok_or_else(|| BadRequest("没有指定索引文件".to_string()))?;

    info!("重新加载索引: {}", path.display());
    let engine = state.engine.clone();
    let count = spawn_blocking(move || engine.load_index(path)).await??;
    Ok(Json(ReloadResponse { count }))
}

/// Prometheus 指标
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, body = String, content_type = "text/plain"),
    )
)]
pub async fn metrics_handler() -> String {
    metrics::gather_text()
}
