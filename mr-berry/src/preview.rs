//! 病灶切片预览.
//!
//! 取标注质心所在的水平切片, 行方向翻转, 扫描强度按切片内最小值/最大值映射为 8-bit 灰度,
//! 病灶体素与红色按 `26 / 255` 的不透明度混合, 最终以 JPEG 保存.

use std::path::Path;

use image::{Rgb, RgbImage};

use crate::consts::label::is_lesion;
use crate::data::{GeometryMismatch, GrayWindow, Mask, Volume, VolumeAttr};

/// 病灶叠加层的不透明度.
pub const OVERLAY_ALPHA: u8 = 26;

/// 叠加层颜色.
pub const OVERLAY_COLOR: [u8; 3] = [255, 0, 0];

/// 预览生成错误.
#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    /// 扫描和标注的数组形状不一致.
    #[error("扫描与标注配准不一致")]
    Geometry(#[from] GeometryMismatch),

    /// 标注全为背景, 无法确定切片.
    #[error("标注中没有前景体素")]
    EmptyMask,

    /// 切片内没有有限强度.
    #[error("第 {0} 层切片中没有有限强度值")]
    NoFiniteIntensity(usize),

    /// 编码或写出图片失败.
    #[error("无法写出预览图片")]
    Image(#[from] image::ImageError),
}

#[inline]
fn blend(gray: u8, over: u8) -> u8 {
    let a = OVERLAY_ALPHA as u32;
    ((over as u32 * a + gray as u32 * (255 - a) + 127) / 255) as u8
}

/// 质心所在切片的层号 (四舍五入).
pub fn center_slice(mask: &Mask) -> Option<usize> {
    let [z, _, _] = mask.center_of_mass()?;
    Some((z.round() as usize).min(mask.len_z() - 1))
}

/// 生成预览图片.
pub fn render(image: &Volume, mask: &Mask) -> Result<RgbImage, PreviewError> {
    image.check_co_registered(mask, crate::consts::GEOMETRY_TOLERANCE)?;
    let z = center_slice(mask).ok_or(PreviewError::EmptyMask)?;
    let scan = image.slice_at(z);
    let labels = mask.slice_at(z);
    let window = GrayWindow::from_min_max(scan.iter().copied()).ok_or(PreviewError::NoFiniteIntensity(z))?;

    let (height, width) = scan.dim();
    let mut buf = RgbImage::new(width as u32, height as u32);
    for ((h, w), &v) in scan.indexed_iter() {
        let gray = window.eval(v).unwrap_or(0);
        // 行方向翻转.
        let row = height - 1 - h;
        let pix = if is_lesion(labels[(h, w)]) {
            Rgb(OVERLAY_COLOR.map(|c| blend(gray, c)))
        } else {
            Rgb([gray; 3])
        };
        buf.put_pixel(w as u32, row as u32, pix);
    }
    Ok(buf)
}

/// 生成预览图片并以 JPEG 格式保存到 `path`.
pub fn save<P: AsRef<Path>>(image: &Volume, mask: &Mask, path: P) -> Result<(), PreviewError> {
    let buf = render(image, mask)?;
    buf.save_with_format(path.as_ref(), image::ImageFormat::Jpeg)?;
    log::debug!("预览图片已保存到 {:?}", path.as_ref());
    Ok(())
}
