use std::sync::Arc;

use crate::engine::SearchEngine;

/// 应用状态
pub struct AppState {
    pub engine: Arc<SearchEngine>,
    /// 默认返回的结果数量
    pub count: usize,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(engine: Arc<SearchEngine>, count: usize) -> Arc<Self> {
        Arc::new(AppState { engine, count })
    }
}
