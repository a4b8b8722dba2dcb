pub mod cli;
pub mod config;
pub mod embed;
pub mod engine;
mod metrics;
pub mod scan;
mod server;
pub mod similarity;
pub mod store;
pub mod utils;

pub use config::Opts;
pub use embed::{ColorEmbedder, EmbedError, EmbeddingProvider};
pub use engine::{SearchEngine, SearchError, SearchResult};
pub use scan::{CancelToken, ScanError, ScanEvent, ScanOutcome, ScanRequest};
pub use store::{ImageRecord, IndexError, IndexStore};
