use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::store::ImageRecord;

pub const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// 一次扫描的参数
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// 需要扫描的根目录
    pub roots: Vec<PathBuf>,
    /// 索引文件保存位置
    pub destination: PathBuf,
    /// 允许的扩展名，不区分大小写，可以带或不带 `.`
    pub extensions: Vec<String>,
    /// 即使 `destination` 已存在也重新扫描
    pub force_rescan: bool,
    /// 整个扫描的最长耗时
    pub timeout: Option<Duration>,
}

impl ScanRequest {
    pub fn new(roots: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            roots,
            destination: destination.into(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            force_rescan: false,
            timeout: None,
        }
    }
}

/// 扫描过程中发出的进度事件，`Display` 即展示给用户的状态文本
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// 索引文件已存在，直接加载
    Loaded { path: PathBuf, count: usize },
    /// 没有需要扫描的目录
    NothingToIndex,
    /// 开始扫描某个根目录
    ScanningRoot { root: PathBuf },
    /// 枚举完成，共有 total 个候选文件
    Found { total: usize },
    /// 每处理 10 个文件汇报一次
    Processed { current: usize, total: usize },
    /// 某个文件被跳过
    Skipped { path: PathBuf, reason: SkipReason },
    /// 扫描结束，索引已保存
    Complete { indexed: usize, total: usize, destination: PathBuf },
}

impl fmt::Display for ScanEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded { count, .. } => {
                write!(f, "Loaded existing image database ({count} images)")
            }
            Self::NothingToIndex => write!(f, "Nothing to index"),
            Self::ScanningRoot { root } => write!(f, "Scanning: {}", root.display()),
            Self::Found { total } => write!(f, "Found {total} images"),
            Self::Processed { current, total } => write!(f, "Processed {current}/{total} images"),
            Self::Skipped { path, reason } => write!(f, "Skipped {}: {reason}", path.display()),
            Self::Complete { indexed, total, .. } => {
                write!(f, "Scanning complete: {indexed}/{total} images indexed")
            }
        }
    }
}

/// 文件被跳过的原因
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Io(String),
    Decode(String),
    Model(String),
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::Model(e) => write!(f, "model error: {e}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 单个文件的处理结果，失败不会中断整个扫描
#[derive(Debug)]
pub enum Extraction {
    Indexed(ImageRecord),
    Skipped { path: PathBuf, reason: SkipReason },
}

/// 扫描的最终结果
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// 加载了已有的索引文件，没有进行任何特征提取
    Loaded { count: usize },
    /// 完成扫描并保存了新的索引
    Indexed { indexed: usize, skipped: usize },
    /// 没有需要扫描的目录
    NothingToIndex,
}

/// 协作式取消标记，可以在任意线程中设置
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        assert_eq!(ScanEvent::Processed { current: 10, total: 42 }.to_string(), "Processed 10/42 images");
        assert_eq!(
            ScanEvent::Loaded { path: "/a.bin".into(), count: 3 }.to_string(),
            "Loaded existing image database (3 images)"
        );
        assert_eq!(
            ScanEvent::ScanningRoot { root: "/photos".into() }.to_string(),
            "Scanning: /photos"
        );
        assert_eq!(
            ScanEvent::Skipped { path: "/x.jpg".into(), reason: SkipReason::Cancelled }.to_string(),
            "Skipped /x.jpg: cancelled"
        );
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
