use image::{DynamicImage, Rgb};
use log::debug;
use thiserror::Error;

use crate::config::EmbedOptions;

#[derive(Error, Debug)]
pub enum EmbedError {
    /// 输入不是可以解码的图片
    #[error("无法解码图片: {0}")]
    Decode(#[from] image::ImageError),

    #[error("特征提取失败: {0}")]
    Model(String),

    /// 提取器本身无法初始化，属于致命错误
    #[error("特征提取器初始化失败: {0}")]
    Init(String),
}

/// 将图片或文本转换为固定维度的向量
///
/// 同一个实例在整个生命周期内必须返回相同维度的向量，并且相同输入得到相同输出，
/// 与调用顺序和并发无关。
pub trait EmbeddingProvider: Send + Sync {
    /// 向量维度
    fn dim(&self) -> usize;

    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbedError>;

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// 色相扇区数量，每个扇区 30 度
const HUE_SECTORS: usize = 12;
const BLACK: usize = HUE_SECTORS;
const GRAY: usize = HUE_SECTORS + 1;
const WHITE: usize = HUE_SECTORS + 2;

/// 颜色直方图的维度：12 个色相扇区 + 黑、灰、白
pub const COLOR_DIM: usize = HUE_SECTORS + 3;

/// 查询词到直方图区间的映射
static COLOR_WORDS: &[(&str, &[usize])] = &[
    ("red", &[0]),
    ("crimson", &[0, 11]),
    ("orange", &[1]),
    ("brown", &[1, BLACK]),
    ("yellow", &[2]),
    ("gold", &[2, 1]),
    ("lime", &[3]),
    ("green", &[4]),
    ("teal", &[5, 6]),
    ("cyan", &[6]),
    ("aqua", &[6]),
    ("sky", &[7]),
    ("azure", &[7]),
    ("blue", &[8]),
    ("navy", &[8, BLACK]),
    ("purple", &[9]),
    ("violet", &[9]),
    ("magenta", &[10]),
    ("pink", &[11]),
    ("rose", &[11]),
    ("black", &[BLACK]),
    ("dark", &[BLACK]),
    ("gray", &[GRAY]),
    ("grey", &[GRAY]),
    ("silver", &[GRAY, WHITE]),
    ("white", &[WHITE]),
    ("snow", &[WHITE]),
];

fn color_bins(word: &str) -> Option<&'static [usize]> {
    COLOR_WORDS.iter().find(|(name, _)| name.eq_ignore_ascii_case(word)).map(|(_, bins)| *bins)
}

/// 基于颜色直方图的特征提取器
///
/// 不依赖任何模型权重，图片被缩小后统计每个像素落入的色相扇区，
/// 文本查询中的颜色词映射到相同的区间，因此两者可以直接计算余弦相似度。
#[derive(Debug, Clone)]
pub struct ColorEmbedder {
    thumbnail_size: u32,
    min_saturation: f32,
    min_value: f32,
}

impl ColorEmbedder {
    pub fn new(opts: &EmbedOptions) -> Result<Self, EmbedError> {
        if opts.thumbnail_size == 0 {
            return Err(EmbedError::Init("缩略图尺寸不能为 0".to_string()));
        }
        if !(0.0..1.0).contains(&opts.min_saturation) || !(0.0..1.0).contains(&opts.min_value) {
            return Err(EmbedError::Init("饱和度和亮度阈值必须位于 [0, 1) 区间".to_string()));
        }
        Ok(Self {
            thumbnail_size: opts.thumbnail_size,
            min_saturation: opts.min_saturation,
            min_value: opts.min_value,
        })
    }

    fn histogram(&self, image: &DynamicImage) -> Vec<f32> {
        let thumb = image.thumbnail(self.thumbnail_size, self.thumbnail_size).to_rgb8();
        let mut hist = vec![0f32; COLOR_DIM];
        for pixel in thumb.pixels() {
            hist[self.bin_of(pixel)] += 1.;
        }
        l2_normalize(hist)
    }

    fn bin_of(&self, &Rgb([r, g, b]): &Rgb<u8>) -> usize {
        let (h, s, v) = rgb_to_hsv(r, g, b);
        if v < self.min_value {
            BLACK
        } else if s < self.min_saturation {
            if v > 0.8 { WHITE } else { GRAY }
        } else {
            // 0 号扇区以红色为中心，即 [345, 15)
            ((h + 15.) / 30.) as usize % HUE_SECTORS
        }
    }
}

impl EmbeddingProvider for ColorEmbedder {
    fn dim(&self) -> usize {
        COLOR_DIM
    }

    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbedError> {
        let image = image::load_from_memory(bytes)?;
        if image.width() == 0 || image.height() == 0 {
            return Err(EmbedError::Model("图片尺寸为 0".to_string()));
        }
        Ok(self.histogram(&image))
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut hist = vec![0f32; COLOR_DIM];
        let mut matched = 0;
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            if let Some(bins) = color_bins(word) {
                for &bin in bins {
                    hist[bin] += 1.;
                }
                matched += 1;
            }
        }
        if matched == 0 {
            debug!("查询中没有颜色词: {text}");
            return Err(EmbedError::Model(format!("查询中没有可识别的颜色词: {text}")));
        }
        Ok(l2_normalize(hist))
    }
}

/// 返回 (色相 0~360, 饱和度 0~1, 亮度 0~1)
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32 / 255., g as f32 / 255., b as f32 / 255.);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0. {
        0.
    } else if max == r {
        60. * ((g - b) / delta).rem_euclid(6.)
    } else if max == g {
        60. * ((b - r) / delta + 2.)
    } else {
        60. * ((r - g) / delta + 4.)
    };
    let s = if max == 0. { 0. } else { delta / max };
    (h, s, max)
}

pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0. {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, RgbImage};

    use super::*;

    fn embedder() -> ColorEmbedder {
        ColorEmbedder::new(&EmbedOptions::default()).unwrap()
    }

    fn encode(color: [u8; 3], format: ImageFormat) -> Vec<u8> {
        let img = RgbImage::from_pixel(16, 16, Rgb(color));
        let mut buf = Cursor::new(vec![]);
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn argmax(v: &[f32]) -> usize {
        v.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1)).unwrap().0
    }

    #[test]
    fn test_embed_image_deterministic() {
        let embedder = embedder();
        let bytes = encode([200, 30, 30], ImageFormat::Png);
        let a = embedder.embed_image(&bytes).unwrap();
        let b = embedder.embed_image(&bytes).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), COLOR_DIM);
    }

    #[test]
    fn test_embed_image_bins() {
        let embedder = embedder();
        let red = embedder.embed_image(&encode([255, 0, 0], ImageFormat::Png)).unwrap();
        let blue = embedder.embed_image(&encode([0, 0, 255], ImageFormat::Png)).unwrap();
        let white = embedder.embed_image(&encode([255, 255, 255], ImageFormat::Png)).unwrap();
        let black = embedder.embed_image(&encode([0, 0, 0], ImageFormat::Png)).unwrap();
        assert_eq!(argmax(&red), 0);
        assert_eq!(argmax(&blue), 8);
        assert_eq!(argmax(&white), WHITE);
        assert_eq!(argmax(&black), BLACK);
        // 纯色图片归一化后全部落在一个区间
        assert!((red[0] - 1.).abs() < 1e-6);
    }

    #[test]
    fn test_embed_image_decode_error() {
        let embedder = embedder();
        let result = embedder.embed_image(b"definitely not an image");
        assert!(matches!(result, Err(EmbedError::Decode(_))));

        // 截断的 PNG 同样无法解码
        let bytes = encode([0, 255, 0], ImageFormat::Png);
        let result = embedder.embed_image(&bytes[..bytes.len() / 2]);
        assert!(result.is_err());
    }

    #[test]
    fn test_embed_text() {
        let embedder = embedder();
        let red = embedder.embed_text("A RED car").unwrap();
        assert_eq!(red.len(), COLOR_DIM);
        assert_eq!(argmax(&red), 0);
        assert_eq!(red, embedder.embed_text("red").unwrap());

        let mixed = embedder.embed_text("blue and white").unwrap();
        assert!(mixed[8] > 0. && mixed[WHITE] > 0.);
    }

    #[test]
    fn test_embed_text_without_color() {
        let result = embedder().embed_text("a photo of something");
        assert!(matches!(result, Err(EmbedError::Model(_))));
    }

    #[test]
    fn test_init_error() {
        let opts = EmbedOptions { thumbnail_size: 0, ..EmbedOptions::default() };
        assert!(matches!(ColorEmbedder::new(&opts), Err(EmbedError::Init(_))));
    }

    #[test]
    fn test_rgb_to_hsv() {
        assert_eq!(rgb_to_hsv(255, 0, 0), (0., 1., 1.));
        assert_eq!(rgb_to_hsv(0, 255, 0).0, 120.);
        assert_eq!(rgb_to_hsv(0, 0, 255).0, 240.);
        assert_eq!(rgb_to_hsv(0, 0, 0), (0., 0., 0.));
    }
}
