use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, info};

use crate::cli::SubCommandExtend;
use crate::config::{EmbedOptions, Opts, SearchOptions};
use crate::embed::ColorEmbedder;
use crate::engine::{SearchEngine, SearchError, SearchResult};
use crate::store::IndexError;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub embed: EmbedOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 搜索的文本，例如 "red car"
    pub query: String,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let provider = Arc::new(ColorEmbedder::new(&self.embed)?);
        let engine = Arc::new(SearchEngine::new(provider, 1)?);

        let index = opts.conf_dir.resolve_index(self.search.index.as_deref());
        match engine.load_index(&index) {
            Ok(count) => debug!("已加载索引 {}，共 {count} 张图片", index.display()),
            Err(IndexError::NotFound(path)) => {
                anyhow::bail!("索引文件 {} 不存在，请先使用 index 命令建立索引", path.display())
            }
            Err(e) => return Err(e).context("加载索引失败"),
        }

        let result = match engine.search_async(self.query.clone(), self.search.count).await {
            Ok(result) => result,
            Err(e) if matches!(e.downcast_ref::<SearchError>(), Some(SearchError::EmptyIndex)) => {
                info!("索引为空，没有可以搜索的图片");
                vec![]
            }
            Err(e) => return Err(e),
        };

        print_result(&result, self)
    }
}

fn print_result(result: &[SearchResult], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for r in result {
                println!("{:.4}\t{}", r.score, r.path);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Json,
    Table,
}
