use std::sync::Arc;

use clap::Parser;
use log::{info, warn};
use tokio::net::TcpListener;

use crate::cli::SubCommandExtend;
use crate::config::{EmbedOptions, SearchOptions};
use crate::embed::ColorEmbedder;
use crate::engine::SearchEngine;
use crate::{Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub embed: EmbedOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let provider = Arc::new(ColorEmbedder::new(&self.embed)?);
        let engine = Arc::new(SearchEngine::new(provider, 1)?);

        let index = opts.conf_dir.resolve_index(self.search.index.as_deref());
        match engine.load_index(&index) {
            Ok(count) => info!(
                "已加载索引 {}，共 {count} 张图片，维度 {}",
                index.display(),
                engine.dim().unwrap_or(0)
            ),
            // 没有索引时仍然启动，之后可以通过 /reload 加载
            Err(e) => warn!("加载索引失败: {e}"),
        }

        // 创建应用状态
        let state = server::AppState::new(engine, self.search.count);

        // 创建应用
        let app = server::create_app(state);

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
