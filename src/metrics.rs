use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("picsearch_search_count", "count of the text queries").unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "picsearch_search_duration",
        "duration of the per-query search in seconds",
        exponential_buckets(0.0005, 2., 16).unwrap()
    )
    .unwrap()
});

static METRIC_SEARCH_MAX_SCORE: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "picsearch_search_max_score",
        "max cosine similarity of the per-query search",
        (-10..=10).map(|x| x as f64 / 10.).collect()
    )
    .unwrap()
});

static METRIC_INDEXED_IMAGES: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("picsearch_indexed_images", "number of images in the loaded index")
        .unwrap()
});

static METRIC_SKIPPED_IMAGES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("picsearch_skipped_images", "count of the files skipped while scanning")
        .unwrap()
});

/// 记录一次搜索
pub fn observe_search(duration: f32, max_score: Option<f32>) {
    METRIC_SEARCH_COUNT.inc();
    METRIC_SEARCH_DURATION.observe(duration as f64);
    if let Some(score) = max_score {
        METRIC_SEARCH_MAX_SCORE.observe(score as f64);
    }
}

pub fn set_indexed_images(count: usize) {
    METRIC_INDEXED_IMAGES.set(count as i64);
}

pub fn inc_skipped_images() {
    METRIC_SKIPPED_IMAGES.inc();
}

/// 以 Prometheus 文本格式导出所有指标
pub fn gather_text() -> String {
    TextEncoder::new().encode_to_string(&prometheus::gather()).unwrap_or_default()
}
