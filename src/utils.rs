use indicatif::{ProgressBar, ProgressStyle};

use crate::scan::ScanEvent;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {wide_bar:.cyan/blue} {pos:>7}/{len:7} {msg}")
        .expect("failed to build progress style")
}

pub fn pb_style_spinner() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
        .expect("failed to build progress style")
}

/// 根据扫描事件更新进度条
pub fn update_progress(pb: &ProgressBar, event: &ScanEvent) {
    match event {
        ScanEvent::Found { total } => {
            pb.set_style(pb_style());
            pb.set_length(*total as u64);
        }
        ScanEvent::Processed { current, .. } => pb.set_position(*current as u64),
        ScanEvent::Complete { total, .. } => pb.set_position(*total as u64),
        // 跳过的文件只输出一行提示，不覆盖状态栏
        ScanEvent::Skipped { .. } => {
            pb.println(event.to_string());
            return;
        }
        _ => {}
    }
    pb.set_message(event.to_string());
}
