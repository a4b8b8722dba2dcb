use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::debug;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::task::{JoinHandle, spawn_blocking};

use crate::embed::{EmbedError, EmbeddingProvider};
use crate::metrics;
use crate::scan::{CancelToken, ScanError, ScanEvent, ScanOutcome, ScanRequest, Scanner};
use crate::similarity;
use crate::store::{IndexError, IndexStore};

/// 默认返回的结果数量
pub const DEFAULT_TOP_K: usize = 30;

#[derive(Error, Debug)]
pub enum SearchError {
    /// 还没有建立或加载索引，调用方应视为没有结果
    #[error("索引为空")]
    EmptyIndex,

    #[error("查询向量维度 {query} 与索引维度 {index} 不一致")]
    DimensionMismatch { query: usize, index: usize },

    #[error(transparent)]
    Embed(#[from] EmbedError),
}

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct SearchResult {
    pub path: String,
    /// 余弦相似度，范围为 [-1, 1]
    pub score: f32,
}

/// 在后台运行的建立索引任务
pub struct IndexJob {
    /// 进度事件，任务结束后通道关闭
    pub events: UnboundedReceiver<ScanEvent>,
    /// 用于中止任务
    pub cancel: CancelToken,
    pub handle: JoinHandle<Result<ScanOutcome, ScanError>>,
}

pub struct SearchEngine {
    provider: Arc<dyn EmbeddingProvider>,
    scanner: Scanner,
    store: IndexStore,
}

impl SearchEngine {
    /// 创建搜索引擎，`threads` 为特征提取线程数，0 表示使用 CPU 核心数
    pub fn new(provider: Arc<dyn EmbeddingProvider>, threads: usize) -> Result<Self, ScanError> {
        let scanner = Scanner::new(provider.clone(), threads)?;
        Ok(Self { provider, scanner, store: IndexStore::new() })
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// 建立索引，索引文件已存在时直接加载
    pub fn build_or_load_index(
        &self,
        request: &ScanRequest,
        progress: impl Fn(ScanEvent),
        cancel: &CancelToken,
    ) -> Result<ScanOutcome, ScanError> {
        self.scanner.run(request, &self.store, progress, cancel)
    }

    /// 加载指定的索引文件，返回图片数量
    ///
    /// 加载失败时保留当前索引
    pub fn load_index(&self, location: impl AsRef<Path>) -> Result<usize, IndexError> {
        let count = self.store.reload(location)?;
        metrics::set_indexed_images(count);
        Ok(count)
    }

    /// 搜索与文本最相似的 `top_k` 张图片，按相似度从高到低排列
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>, SearchError> {
        let snapshot = self.store.snapshot();
        let Some(dim) = snapshot.dim() else {
            return Err(SearchError::EmptyIndex);
        };
        if top_k == 0 {
            return Ok(vec![]);
        }

        let start = Instant::now();
        let query_vector = self.provider.embed_text(query)?;
        if query_vector.len() != dim {
            return Err(SearchError::DimensionMismatch { query: query_vector.len(), index: dim });
        }

        let vectors = snapshot.records.par_iter().map(|r| r.vector.as_slice());
        let results = similarity::top_k(&query_vector, vectors, top_k)
            .into_iter()
            .map(|(i, score)| SearchResult { path: snapshot.records[i].path.clone(), score })
            .collect::<Vec<_>>();

        let elapsed = start.elapsed().as_secs_f32();
        debug!("搜索 {query:?} 耗时 {elapsed:.4}s，共 {} 条结果", results.len());
        metrics::observe_search(elapsed, results.first().map(|r| r.score));

        Ok(results)
    }

    /// 在后台线程中建立索引，进度通过 `IndexJob::events` 返回
    ///
    /// 进度通道无界，发送方不会因为接收方处理缓慢而阻塞。
    pub fn spawn_index(self: &Arc<Self>, request: ScanRequest) -> IndexJob {
        let (tx, events) = unbounded_channel();
        let cancel = CancelToken::new();
        let engine = self.clone();
        let token = cancel.clone();
        let handle = spawn_blocking(move || {
            engine.build_or_load_index(
                &request,
                |event| {
                    // 接收方已关闭时忽略
                    let _ = tx.send(event);
                },
                &token,
            )
        });
        IndexJob { events, cancel, handle }
    }

    /// 在阻塞线程池中搜索，避免占用异步运行时
    pub async fn search_async(
        self: &Arc<Self>,
        query: String,
        top_k: usize,
    ) -> anyhow::Result<Vec<SearchResult>> {
        let engine = self.clone();
        let results = spawn_blocking(move || engine.search(&query, top_k)).await??;
        Ok(results)
    }

    /// 当前索引中的图片数量
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// 索引向量维度，索引为空时返回 `None`
    pub fn dim(&self) -> Option<usize> {
        self.store.dim()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::store::ImageRecord;

    /// 将固定的查询词映射到固定向量
    struct FixedProvider(HashMap<&'static str, Vec<f32>>);

    impl EmbeddingProvider for FixedProvider {
        fn dim(&self) -> usize {
            3
        }

        fn embed_image(&self, _bytes: &[u8]) -> Result<Vec<f32>, EmbedError> {
            Err(EmbedError::Model("unused".to_string()))
        }

        fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            self.0.get(text).cloned().ok_or_else(|| EmbedError::Model(text.to_string()))
        }
    }

    fn engine() -> Arc<SearchEngine> {
        let provider = FixedProvider(HashMap::from([
            ("x", vec![1., 0., 0.]),
            ("y", vec![0., 1., 0.]),
            ("zero", vec![0., 0., 0.]),
            ("short", vec![1., 0.]),
        ]));
        Arc::new(SearchEngine::new(Arc::new(provider), 2).unwrap())
    }

    fn five_records() -> Vec<ImageRecord> {
        vec![
            ImageRecord::new("a", vec![0., 1., 0.]),
            ImageRecord::new("b", vec![1., 0., 0.]),
            ImageRecord::new("c", vec![1., 1., 0.]),
            ImageRecord::new("d", vec![-1., 0., 0.]),
            ImageRecord::new("e", vec![2., 0., 0.]),
        ]
    }

    fn paths(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.path.as_str()).collect()
    }

    #[test]
    fn test_search_empty_index() {
        let engine = engine();
        assert!(engine.is_empty());
        assert_eq!(engine.dim(), None);
        assert!(matches!(engine.search("x", 30), Err(SearchError::EmptyIndex)));
        assert!(matches!(engine.search("x", 0), Err(SearchError::EmptyIndex)));
    }

    #[test]
    fn test_search_all_results() {
        let engine = engine();
        engine.store().replace(five_records()).unwrap();

        assert_eq!((engine.len(), engine.dim()), (5, Some(3)));

        let results = engine.search("x", DEFAULT_TOP_K).unwrap();
        assert_eq!(results.len(), 5);
        // b 和 e 分数相同，保持原有顺序
        assert_eq!(paths(&results), &["b", "e", "c", "a", "d"]);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert!((results[0].score - 1.).abs() < 1e-6);
        assert!((results[4].score + 1.).abs() < 1e-6);
    }

    #[test]
    fn test_search_top_k() {
        let engine = engine();
        engine.store().replace(five_records()).unwrap();

        assert_eq!(paths(&engine.search("y", 2).unwrap()), &["a", "c"]);
        assert!(engine.search("y", 0).unwrap().is_empty());
        for k in 0..8 {
            assert_eq!(engine.search("x", k).unwrap().len(), k.min(5));
        }
    }

    #[test]
    fn test_search_zero_query() {
        let engine = engine();
        engine.store().replace(five_records()).unwrap();

        let results = engine.search("zero", 30).unwrap();
        assert!(results.iter().all(|r| r.score == 0.));
        assert_eq!(paths(&results), &["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_search_errors() {
        let engine = engine();
        engine.store().replace(five_records()).unwrap();

        assert!(matches!(engine.search("unknown", 30), Err(SearchError::Embed(_))));
        assert!(matches!(
            engine.search("short", 30),
            Err(SearchError::DimensionMismatch { query: 2, index: 3 })
        ));
    }

    #[test]
    fn test_concurrent_search() {
        let engine = engine();
        engine.store().replace(five_records()).unwrap();
        let expected = engine.search("x", 30).unwrap();

        std::thread::scope(|s| {
            let handles = (0..8).map(|_| s.spawn(|| engine.search("x", 30).unwrap())).collect::<Vec<_>>();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), expected);
            }
        });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_search_async() {
        let engine = engine();
        engine.store().replace(five_records()).unwrap();
        let results = engine.search_async("y".to_string(), 1).await.unwrap();
        assert_eq!(paths(&results), &["a"]);

        let empty = Arc::new(SearchEngine::new(engine.provider().clone(), 1).unwrap());
        let err = empty.search_async("y".to_string(), 1).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<SearchError>(), Some(SearchError::EmptyIndex)));
    }
}
