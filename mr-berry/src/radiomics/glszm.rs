//! 灰度区域大小矩阵 (GLSZM). 区域为 ROI 内同一灰度级的 26 连通分量.

use std::collections::VecDeque;

use ndarray::Array3;

use super::matrix::SizeMatrix;
use super::roi::{step, Roi};

pub(super) const FEATURES: [&str; 16] = [
    "GrayLevelNonUniformity",
    "GrayLevelNonUniformityNormalized",
    "GrayLevelVariance",
    "HighGrayLevelZoneEmphasis",
    "LargeAreaEmphasis",
    "LargeAreaHighGrayLevelEmphasis",
    "LargeAreaLowGrayLevelEmphasis",
    "LowGrayLevelZoneEmphasis",
    "SizeZoneNonUniformity",
    "SizeZoneNonUniformityNormalized",
    "SmallAreaEmphasis",
    "SmallAreaHighGrayLevelEmphasis",
    "SmallAreaLowGrayLevelEmphasis",
    "ZoneEntropy",
    "ZonePercentage",
    "ZoneVariance",
];

/// 全部 26 个邻域偏移.
fn neighbors_26() -> impl Iterator<Item = [isize; 3]> {
    (-1..=1).flat_map(|z| (-1..=1).flat_map(move |y| (-1..=1).map(move |x| [z, y, x])))
        .filter(|d| *d != [0, 0, 0])
}

fn size_zones(roi: &Roi) -> SizeMatrix {
    let index = roi.level_index();
    let levels = roi.levels();
    let shape = roi.shape();
    let offsets: Vec<[isize; 3]> = neighbors_26().collect();
    let mut seen = Array3::from_elem(shape, false);
    let mut queue = VecDeque::new();
    let mut m = SizeMatrix::new(roi.gray_levels(), roi.len());

    for &start in roi.positions() {
        if seen[start] {
            continue;
        }
        let level = levels[start];
        seen[start] = true;
        queue.push_back(start);
        let mut size = 0;
        while let Some(cur) = queue.pop_front() {
            size += 1;
            for d in &offsets {
                if let Some(next) = step(cur, d, shape) {
                    if levels[next] == level && !seen[next] {
                        seen[next] = true;
                        queue.push_back(next);
                    }
                }
            }
        }
        m.add(index[level as usize], size);
    }
    m
}

pub(super) fn compute(roi: &Roi) -> Vec<f64> {
    let f = size_zones(roi).features();
    vec![
        f.gray_level_non_uniformity,
        f.gray_level_non_uniformity_normalized,
        f.gray_level_variance,
        f.high_gray_level_emphasis,
        f.large_emphasis,
        f.large_high_gray_level_emphasis,
        f.large_low_gray_level_emphasis,
        f.low_gray_level_emphasis,
        f.size_non_uniformity,
        f.size_non_uniformity_normalized,
        f.small_emphasis,
        f.small_high_gray_level_emphasis,
        f.small_low_gray_level_emphasis,
        f.entropy,
        f.percentage,
        f.size_variance,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Geometry, Mask, PixelType, Volume};
    use crate::radiomics::{Discretization, Settings};

    #[test]
    fn test_zones_are_26_connected() {
        let g = Geometry::identity([2, 2, 2]);
        let mut image = Array3::zeros((2, 2, 2));
        image[(1, 1, 1)] = 1.0;
        image[(0, 1, 0)] = 2.0;
        let vol = Volume::from_parts(g.clone(), PixelType::Float32, image);
        let mut labels = Array3::zeros((2, 2, 2));
        labels[(0, 0, 0)] = 1;
        labels[(1, 1, 1)] = 1;
        labels[(0, 1, 0)] = 1;
        let mask = Mask::from_parts(g, PixelType::Uint8, labels);
        let settings = Settings {
            discretization: Discretization::BinWidth(1.0),
            ..Settings::default()
        };
        let roi = Roi::new(&vol, &mask, &settings).unwrap();
        let m = size_zones(&roi);
        // (0,0,0)=0 与 (1,1,1)=1 灰度不同, 各自成区; (0,1,0)=2 单独成区.
        assert_eq!(m.total(), 3.0);
        assert_eq!(neighbors_26().count(), 26);

        let same = Volume::from_parts(Geometry::identity([2, 2, 2]), PixelType::Float32, Array3::zeros((2, 2, 2)));
        let roi = Roi::new(&same, &mask, &settings).unwrap();
        // 同一灰度级时 (0,0,0), (1,1,1), (0,1,0) 全部 26 连通.
        assert_eq!(size_zones(&roi).total(), 1.0);
        let f = compute(&roi);
        assert_eq!(f[14], 1.0 / 3.0);
    }
}
