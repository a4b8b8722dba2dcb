use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};

use crate::cli::SubCommandExtend;
use crate::config::{EmbedOptions, Opts};
use crate::embed::ColorEmbedder;
use crate::engine::SearchEngine;
use crate::scan::{ScanOutcome, ScanRequest};
use crate::utils;

#[derive(Parser, Debug, Clone)]
pub struct IndexCommand {
    #[command(flatten)]
    pub embed: EmbedOptions,
    /// 需要扫描的目录，可以指定多个
    pub roots: Vec<PathBuf>,
    /// 索引文件保存位置，默认根据第一个目录名保存在配置目录下
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,gif")]
    pub suffix: String,
    /// 即使索引文件已存在也重新扫描
    #[arg(short, long)]
    pub force: bool,
    /// 扫描超时时间，单位为秒
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
    /// 特征提取线程数，0 表示使用 CPU 核心数
    #[arg(short = 'j', long, default_value_t = 0)]
    pub threads: usize,
}

impl IndexCommand {
    fn destination(&self, opts: &Opts) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => {
                let first = self.roots.first().map(PathBuf::as_path).unwrap_or(Path::new(""));
                opts.conf_dir.index_for(first)
            }
        }
    }

    fn request(&self, destination: PathBuf) -> ScanRequest {
        ScanRequest {
            extensions: self.suffix.split(',').map(str::to_string).collect(),
            force_rescan: self.force,
            timeout: self.timeout.map(Duration::from_secs),
            ..ScanRequest::new(self.roots.clone(), destination)
        }
    }
}

/// 索引不在默认位置时，提示搜索需要指定的参数
fn search_hint(opts: &Opts, destination: &Path) -> Option<String> {
    if destination == opts.conf_dir.index() {
        return None;
    }
    Some(format!("Search with: picsearch search -i {} <QUERY>", destination.display()))
}

impl SubCommandExtend for IndexCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let destination = self.destination(opts);
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("无法创建目录 {}", parent.display()))?;
        }

        let provider = Arc::new(ColorEmbedder::new(&self.embed)?);
        let engine = Arc::new(SearchEngine::new(provider, self.threads)?);

        let pb = ProgressBar::new_spinner().with_style(utils::pb_style_spinner());
        pb.enable_steady_tick(Duration::from_millis(200));

        let mut job = engine.spawn_index(self.request(destination.clone()));

        let cancel = job.cancel.clone();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("收到中断信号，正在停止扫描");
                cancel.cancel();
            }
        });

        while let Some(event) = job.events.recv().await {
            utils::update_progress(&pb, &event);
        }
        ctrl_c.abort();

        let outcome = job.handle.await?;
        pb.finish_and_clear();

        match outcome? {
            ScanOutcome::Loaded { count } => {
                println!("Loaded existing image database ({count} images)");
                info!("如需重新扫描请使用 --force");
            }
            ScanOutcome::NothingToIndex => println!("Nothing to index"),
            ScanOutcome::Indexed { indexed, skipped } => {
                println!("Indexing complete: {}", destination.display());
                info!("共 {indexed} 张图片，跳过 {skipped} 张");
            }
        }
        if let Some(hint) = search_hint(opts, &destination) {
            println!("{hint}");
        }
        Ok(())
    }
}
