use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::engine::DEFAULT_TOP_K;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs =
        ProjectDirs::from("", "picsearch", "picsearch").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

#[derive(Parser, Debug, Clone)]
pub struct EmbedOptions {
    /// 计算颜色直方图前将图片缩小到的最大边长
    #[arg(long, value_name = "SIZE", default_value_t = 64)]
    pub thumbnail_size: u32,
    /// 饱和度低于该值的像素视为黑白灰
    #[arg(long, value_name = "S", default_value_t = 0.15)]
    pub min_saturation: f32,
    /// 亮度低于该值的像素视为黑色
    #[arg(long, value_name = "V", default_value_t = 0.2)]
    pub min_value: f32,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self { thumbnail_size: 64, min_saturation: 0.15, min_value: 0.2 }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 索引文件路径，默认为配置目录下的 index.bin
    ///
    /// index 命令未指定 -o 时按目录名保存为 index_<目录名>.bin，需要通过此参数指定
    #[arg(short, long, value_name = "FILE")]
    pub index: Option<PathBuf>,
    /// 显示的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = DEFAULT_TOP_K)]
    pub count: usize,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "picsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// picsearch 配置目录，索引文件默认保存在这里
    #[arg(short, long, default_value_t = CONF_DIR.clone())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描目录并建立索引，索引文件已存在时直接加载
    Index(IndexCommand),
    /// 使用文本从索引中搜索图片
    Search(SearchCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
    /// 导出索引中的特征向量
    Export(ExportCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回默认索引文件的路径
    pub fn index(&self) -> PathBuf {
        self.path.join("index.bin")
    }

    /// 返回某个目录对应的索引文件路径，例如 `/photos/2024` 对应 `index_2024.bin`
    pub fn index_for(&self, root: &Path) -> PathBuf {
        match root.file_name() {
            Some(name) => self.path.join(format!("index_{}.bin", name.to_string_lossy())),
            None => self.index(),
        }
    }

    /// 解析用户指定的索引文件，未指定时使用默认路径
    pub fn resolve_index(&self, index: Option<&Path>) -> PathBuf {
        index.map(Path::to_path_buf).unwrap_or_else(|| self.index())
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

impl std::fmt::Display for ConfDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
