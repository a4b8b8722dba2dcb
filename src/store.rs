use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

const MAGIC: [u8; 4] = *b"PSIX";
const VERSION: u16 = 1;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("索引文件不存在: {0}")]
    NotFound(PathBuf),

    #[error("索引文件损坏 {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("向量维度不一致: 期望 {expected}, 实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 一张图片及其特征向量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub path: String,
    pub vector: Vec<f32>,
}

impl ImageRecord {
    pub fn new(path: impl Into<String>, vector: Vec<f32>) -> Self {
        Self { path: path.into(), vector }
    }
}

/// 某一时刻的索引内容，创建后不再修改
#[derive(Debug, Default)]
pub struct Snapshot {
    pub records: Vec<ImageRecord>,
    /// 对应的索引文件
    pub location: Option<PathBuf>,
}

impl Snapshot {
    /// 向量维度，空索引返回 None
    pub fn dim(&self) -> Option<usize> {
        self.records.first().map(|r| r.vector.len())
    }
}

/// 写入磁盘时借用记录，避免复制整个索引
#[derive(Serialize)]
struct IndexFileRef<'a> {
    magic: [u8; 4],
    version: u16,
    dim: u32,
    paths: Vec<&'a str>,
    features: Vec<&'a [f32]>,
}

/// 磁盘上的索引格式，paths[i] 与 features[i] 一一对应
#[derive(Deserialize)]
struct IndexFile {
    magic: [u8; 4],
    version: u16,
    dim: u32,
    paths: Vec<String>,
    features: Vec<Vec<f32>>,
}

/// 内存中的图片索引
///
/// 记录以快照的形式保存，读取方拿到 `Arc` 后不受之后的 `replace` 影响，
/// 因此不会看到只更新了一半的索引。
#[derive(Debug, Default)]
pub struct IndexStore {
    state: RwLock<Arc<Snapshot>>,
}

impl IndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从文件加载索引
    pub fn load(location: impl AsRef<Path>) -> Result<Self, IndexError> {
        let snapshot = read_snapshot(location.as_ref())?;
        Ok(Self { state: RwLock::new(Arc::new(snapshot)) })
    }

    /// 用另一个索引文件的内容替换当前索引，返回记录数量
    ///
    /// 加载失败时当前索引保持不变
    pub fn reload(&self, location: impl AsRef<Path>) -> Result<usize, IndexError> {
        let snapshot = read_snapshot(location.as_ref())?;
        let len = snapshot.records.len();
        self.install(snapshot);
        Ok(len)
    }

    /// 将当前索引保存到文件
    pub fn save(&self, location: impl AsRef<Path>) -> Result<(), IndexError> {
        let location = location.as_ref();
        let snapshot = self.snapshot();
        write_records(location, &snapshot.records)?;
        self.install(Snapshot { records: snapshot.records.clone(), location: Some(location.into()) });
        Ok(())
    }

    /// 替换全部记录，保留索引文件位置
    pub fn replace(&self, records: Vec<ImageRecord>) -> Result<(), IndexError> {
        check_dim(&records)?;
        let location = self.snapshot().location.clone();
        self.install(Snapshot { records, location });
        Ok(())
    }

    /// 安装一组已经写入 `location` 的记录
    pub(crate) fn install_persisted(&self, records: Vec<ImageRecord>, location: PathBuf) {
        self.install(Snapshot { records, location: Some(location) });
    }

    fn install(&self, snapshot: Snapshot) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = Arc::new(snapshot);
    }

    /// 获取当前索引的快照
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.snapshot().records.len()
    }

    pub fn dim(&self) -> Option<usize> {
        self.snapshot().dim()
    }

    pub fn location(&self) -> Option<PathBuf> {
        self.snapshot().location.clone()
    }
}

/// 检查所有向量维度是否一致
fn check_dim(records: &[ImageRecord]) -> Result<(), IndexError> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    let expected = first.vector.len();
    match records.iter().find(|r| r.vector.len() != expected) {
        Some(r) => Err(IndexError::DimensionMismatch { expected, actual: r.vector.len() }),
        None => Ok(()),
    }
}

fn read_snapshot(location: &Path) -> Result<Snapshot, IndexError> {
    // 从内存切片反序列化，长度前缀超过剩余数据时直接报错而不会预先分配
    let bytes = match fs::read(location) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(IndexError::NotFound(location.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let corrupt = |reason: String| IndexError::Corrupt { path: location.to_path_buf(), reason };

    let data: IndexFile = bincode::deserialize(&bytes).map_err(|e| corrupt(e.to_string()))?;
    if data.magic != MAGIC {
        return Err(corrupt("不是 picsearch 索引文件".to_string()));
    }
    if data.version != VERSION {
        return Err(corrupt(format!("不支持的版本 {}", data.version)));
    }
    if data.paths.len() != data.features.len() {
        return Err(corrupt(format!(
            "路径数量 {} 与向量数量 {} 不一致",
            data.paths.len(),
            data.features.len()
        )));
    }
    if let Some(v) = data.features.iter().find(|v| v.len() != data.dim as usize) {
        return Err(corrupt(format!("向量维度 {} 与声明的 {} 不一致", v.len(), data.dim)));
    }

    let records = data
        .paths
        .into_iter()
        .zip(data.features)
        .map(|(path, vector)| ImageRecord { path, vector })
        .collect::<Vec<_>>();

    if records.is_empty() {
        warn!("索引文件中没有任何图片: {}", location.display());
    } else {
        info!("加载索引 {}，共 {} 张图片", location.display(), records.len());
    }

    Ok(Snapshot { records, location: Some(location.to_path_buf()) })
}

/// 原子地写入索引文件
///
/// 先写入同目录下的临时文件，同步到磁盘后再重命名，
/// 写入失败时原有文件保持不变。
pub(crate) fn write_records(location: &Path, records: &[ImageRecord]) -> Result<(), IndexError> {
    check_dim(records)?;

    let dir = match location.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    debug!("写入临时索引文件: {}", tmp.path().display());

    let data = IndexFileRef {
        magic: MAGIC,
        version: VERSION,
        dim: records.first().map_or(0, |r| r.vector.len() as u32),
        paths: records.iter().map(|r| r.path.as_str()).collect(),
        features: records.iter().map(|r| r.vector.as_slice()).collect(),
    };

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        bincode::serialize_into(&mut writer, &data)
            .map_err(|e| IndexError::Io(std::io::Error::other(e)))?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(location).map_err(|e| e.error)?;

    info!("索引已保存到 {}，共 {} 张图片", location.display(), records.len());
    Ok(())
}
