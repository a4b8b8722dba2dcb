use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use ndarray::Array2;
use ndarray_npy::write_npy;

use crate::Opts;
use crate::cli::SubCommandExtend;
use crate::store::{IndexStore, Snapshot};

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    /// 索引文件路径，默认为配置目录下的 index.bin
    #[arg(short, long, value_name = "FILE")]
    pub index: Option<PathBuf>,
    /// 特征向量输出位置，图片路径会写入同名的 .txt 文件
    #[arg(short, long, value_name = "FILE", default_value = "features.npy")]
    pub output: PathBuf,
}

impl SubCommandExtend for ExportCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let index = opts.conf_dir.resolve_index(self.index.as_deref());
        let store = IndexStore::load(&index)?;
        let snapshot = store.snapshot();

        write_npy(&self.output, &to_array(&snapshot)?)?;

        let paths = self.output.with_extension("txt");
        let mut writer = BufWriter::new(File::create(&paths)?);
        for record in &snapshot.records {
            writeln!(writer, "{}", record.path)?;
        }
        writer.flush()?;

        info!("导出成功: {} 和 {}", self.output.display(), paths.display());
        Ok(())
    }
}

/// 将所有特征向量按顺序拼成一个 `(图片数量, 维度)` 的矩阵
fn to_array(snapshot: &Snapshot) -> Result<Array2<f32>> {
    let dim = snapshot.dim().unwrap_or(0);
    let data = snapshot.records.iter().flat_map(|r| r.vector.iter().copied()).collect();
    Ok(Array2::from_shape_vec((snapshot.records.len(), dim), data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ImageRecord;

    #[test]
    fn test_to_array() {
        let store = IndexStore::new();
        store
            .replace(vec![ImageRecord::new("a", vec![1., 2.]), ImageRecord::new("b", vec![3., 4.])])
            .unwrap();
        let array = to_array(&store.snapshot()).unwrap();
        assert_eq!(array.shape(), &[2, 2]);
        assert_eq!(array[[1, 0]], 3.);

        let empty = to_array(&IndexStore::new().snapshot()).unwrap();
        assert_eq!(empty.shape(), &[0, 0]);
    }
}
