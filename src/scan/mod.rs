mod types;

use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use log::{debug, info, warn};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use regex::Regex;
use thiserror::Error;
use walkdir::WalkDir;

pub use self::types::*;
use crate::embed::{EmbedError, EmbeddingProvider};
use crate::metrics;
use crate::store::{ImageRecord, IndexError, IndexStore, write_records};

/// 每处理多少个文件汇报一次进度
const PROGRESS_INTERVAL: usize = 10;
/// 等待单个任务时检查取消标记的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("扫描已取消")]
    Cancelled,

    #[error("扫描超时")]
    DeadlineExceeded,

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("无法创建线程池: {0}")]
    Pool(#[from] ThreadPoolBuildError),
}

/// 取消标记和截止时间，在枚举、提交、等待时检查
#[derive(Clone)]
struct Guard {
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl Guard {
    fn check(&self) -> Result<(), ScanError> {
        if self.cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ScanError::DeadlineExceeded);
        }
        Ok(())
    }
}

/// 遍历目录并提取图片特征
pub struct Scanner {
    provider: Arc<dyn EmbeddingProvider>,
    pool: ThreadPool,
}

impl Scanner {
    /// `threads` 为 0 时使用 CPU 核心数
    pub fn new(provider: Arc<dyn EmbeddingProvider>, threads: usize) -> Result<Self, ScanError> {
        let threads = if threads == 0 { num_cpus::get() } else { threads };
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("picsearch-embed-{i}"))
            .build()?;
        debug!("特征提取线程数: {threads}");
        Ok(Self { provider, pool })
    }

    /// 建立索引并保存到 `request.destination`
    ///
    /// 如果索引文件已经存在且没有指定 `force_rescan`，则直接加载该文件，不进行任何特征提取。
    /// 新的记录先写入磁盘，成功后才会替换 `store` 中的内容；取消、超时或保存失败时
    /// `store` 保持原样。
    pub fn run(
        &self,
        request: &ScanRequest,
        store: &IndexStore,
        progress: impl Fn(ScanEvent),
        cancel: &CancelToken,
    ) -> Result<ScanOutcome, ScanError> {
        if !request.force_rescan && request.destination.exists() {
            info!("索引文件已存在，直接加载: {}", request.destination.display());
            let count = store.reload(&request.destination)?;
            metrics::set_indexed_images(count);
            progress(ScanEvent::Loaded { path: request.destination.clone(), count });
            return Ok(ScanOutcome::Loaded { count });
        }

        if request.roots.is_empty() {
            progress(ScanEvent::NothingToIndex);
            return Ok(ScanOutcome::NothingToIndex);
        }

        let guard = Guard {
            cancel: cancel.clone(),
            deadline: request.timeout.map(|t| Instant::now() + t),
        };

        let candidates = self.enumerate(request, &progress, &guard)?;
        let total = candidates.len();
        info!("扫描完成，共 {total} 张图片");
        progress(ScanEvent::Found { total });

        let (records, skipped) = self.extract(candidates, &progress, &guard)?;
        let indexed = records.len();

        write_records(&request.destination, &records)?;
        store.install_persisted(records, request.destination.clone());
        metrics::set_indexed_images(indexed);

        info!("索引建立完成: {indexed} 张成功, {skipped} 张跳过");
        progress(ScanEvent::Complete {
            indexed,
            total,
            destination: request.destination.clone(),
        });
        Ok(ScanOutcome::Indexed { indexed, skipped })
    }

    /// 枚举所有根目录下扩展名符合要求的文件
    fn enumerate(
        &self,
        request: &ScanRequest,
        progress: &impl Fn(ScanEvent),
        guard: &Guard,
    ) -> Result<Vec<PathBuf>, ScanError> {
        let re_ext = extension_regex(&request.extensions);
        let mut candidates = vec![];

        for root in &request.roots {
            progress(ScanEvent::ScanningRoot { root: root.clone() });
            let root = match fs::canonicalize(root) {
                Ok(root) => root,
                Err(e) => {
                    warn!("无法访问目录 {}: {e}", root.display());
                    progress(ScanEvent::Skipped {
                        path: root.clone(),
                        reason: SkipReason::Io(e.to_string()),
                    });
                    continue;
                }
            };
            info!("开始扫描目录: {}", root.display());

            for entry in WalkDir::new(&root) {
                guard.check()?;
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        debug!("跳过无法读取的目录项: {e}");
                        continue;
                    }
                };
                if entry.file_type().is_file() && has_extension(entry.path(), &re_ext) {
                    candidates.push(entry.into_path());
                }
            }
        }

        Ok(candidates)
    }

    /// 并发提取特征，并按照提交顺序收集结果
    fn extract(
        &self,
        candidates: Vec<PathBuf>,
        progress: &impl Fn(ScanEvent),
        guard: &Guard,
    ) -> Result<(Vec<ImageRecord>, usize), ScanError> {
        let total = candidates.len();
        let mut slots: Vec<(PathBuf, Receiver<Extraction>)> = Vec::with_capacity(total);

        for path in candidates {
            guard.check()?;
            let (tx, rx) = bounded(1);
            slots.push((path.clone(), rx));
            let provider = self.provider.clone();
            let guard = guard.clone();
            self.pool.spawn(move || {
                let result = if guard.check().is_err() {
                    Extraction::Skipped { path, reason: SkipReason::Cancelled }
                } else {
                    extract_one(&*provider, path)
                };
                // 接收端已经放弃等待时忽略
                let _ = tx.send(result);
            });
        }

        let mut records = Vec::with_capacity(total);
        let mut skipped = 0;

        for (processed, (path, rx)) in slots.into_iter().enumerate() {
            let result = loop {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(result) => break result,
                    Err(RecvTimeoutError::Timeout) => guard.check()?,
                    Err(RecvTimeoutError::Disconnected) => {
                        let reason = SkipReason::Model("特征提取任务异常退出".to_string());
                        break Extraction::Skipped { path, reason };
                    }
                }
            };

            match result {
                Extraction::Indexed(record) => records.push(record),
                Extraction::Skipped { reason: SkipReason::Cancelled, .. } => guard.check()?,
                Extraction::Skipped { path, reason } => {
                    debug!("跳过 {}: {reason}", path.display());
                    skipped += 1;
                    metrics::inc_skipped_images();
                    progress(ScanEvent::Skipped { path, reason });
                }
            }

            let processed = processed + 1;
            if processed % PROGRESS_INTERVAL == 0 {
                progress(ScanEvent::Processed { current: processed, total });
            }
        }

        guard.check()?;
        Ok((records, skipped))
    }
}

/// 读取文件并提取特征，任何错误都转换为跳过
fn extract_one(provider: &dyn EmbeddingProvider, path: PathBuf) -> Extraction {
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => return Extraction::Skipped { path, reason: SkipReason::Io(e.to_string()) },
    };

    let result = match catch_unwind(AssertUnwindSafe(|| provider.embed_image(&bytes))) {
        Ok(result) => result,
        Err(_) => {
            let reason = SkipReason::Model("特征提取时发生 panic".to_string());
            return Extraction::Skipped { path, reason };
        }
    };

    match result {
        Ok(vector) if vector.len() == provider.dim() => {
            Extraction::Indexed(ImageRecord::new(path.to_string_lossy(), vector))
        }
        Ok(vector) => {
            let reason = SkipReason::Model(format!(
                "向量维度 {} 与提取器声明的 {} 不一致",
                vector.len(),
                provider.dim()
            ));
            Extraction::Skipped { path, reason }
        }
        Err(EmbedError::Decode(e)) => {
            Extraction::Skipped { path, reason: SkipReason::Decode(e.to_string()) }
        }
        Err(e) => Extraction::Skipped { path, reason: SkipReason::Model(e.to_string()) },
    }
}

/// 构建不区分大小写的扩展名匹配正则，例如 `(?i)^(jpg|png)$`
fn extension_regex(extensions: &[String]) -> Regex {
    let alternatives = extensions
        .iter()
        .map(|ext| regex::escape(ext.trim().trim_start_matches('.')))
        .filter(|ext| !ext.is_empty())
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)^({alternatives})$")).expect("failed to build regex")
}

fn has_extension(path: &Path, re_ext: &Regex) -> bool {
    path.extension().is_some_and(|ext| !ext.is_empty() && re_ext.is_match(&ext.to_string_lossy()))
}
