use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::engine::SearchResult;

/// 搜索请求参数
#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    /// 搜索的文本
    pub query: String,
    /// 返回的结果数量，不填则使用启动参数
    pub count: Option<usize>,
}

/// 搜索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    /// 搜索耗时，单位为毫秒
    pub time: u64,
    /// 按相似度从高到低排列的结果
    pub result: Vec<SearchResult>,
}

/// 重新加载索引的参数
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReloadRequest {
    /// 索引文件路径，不填则重新加载当前索引文件
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReloadResponse {
    /// 加载后的图片数量
    pub count: usize,
}
