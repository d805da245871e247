//! 三维形状特征.
//!
//! 体积, 表面积与各直径取自 ROI 的表面网格 (见 [`super::mesh`]);
//! 主轴长度由 ROI 体素物理坐标协方差矩阵 (无偏估计) 的特征值给出.

use std::f64::consts::PI;

use super::mesh;
use super::roi::Roi;

pub(super) const FEATURES: [&str; 17] = [
    "Compactness1",
    "Compactness2",
    "Elongation",
    "Flatness",
    "LeastAxisLength",
    "MajorAxisLength",
    "Maximum2DDiameterColumn",
    "Maximum2DDiameterRow",
    "Maximum2DDiameterSlice",
    "Maximum3DDiameter",
    "MeshVolume",
    "MinorAxisLength",
    "SphericalDisproportion",
    "Sphericity",
    "SurfaceArea",
    "SurfaceVolumeRatio",
    "VoxelVolume",
];

/// 已弃用的特征, 只有在参数文件中显式列出时才计算. 它们与 Sphericity 等价.
pub(super) const DEPRECATED: [&str; 3] = ["Compactness1", "Compactness2", "SphericalDisproportion"];

type Mat3 = [[f64; 3]; 3];

/// 样本协方差矩阵 (ddof = 1). 少于两个点时返回 `None`.
fn covariance(points: &[[f64; 3]]) -> Option<Mat3> {
    let n = points.len();
    if n < 2 {
        return None;
    }
    let mut mean = [0.0; 3];
    for p in points {
        (0..3).for_each(|a| mean[a] += p[a]);
    }
    mean.iter_mut().for_each(|m| *m /= n as f64);

    let mut cov = [[0.0; 3]; 3];
    for p in points {
        for r in 0..3 {
            for c in r..3 {
                cov[r][c] += (p[r] - mean[r]) * (p[c] - mean[c]);
            }
        }
    }
    for r in 0..3 {
        for c in r..3 {
            cov[r][c] /= (n - 1) as f64;
            cov[c][r] = cov[r][c];
        }
    }
    Some(cov)
}

/// 实对称 3x3 矩阵的特征值, 降序.
fn symmetric_eigenvalues(a: &Mat3) -> [f64; 3] {
    let p1 = a[0][1].powi(2) + a[0][2].powi(2) + a[1][2].powi(2);
    if p1 == 0.0 {
        let mut d = [a[0][0], a[1][1], a[2][2]];
        d.sort_by(|x, y| y.total_cmp(x));
        return d;
    }
    let q = (a[0][0] + a[1][1] + a[2][2]) / 3.0;
    let p2 = (a[0][0] - q).powi(2) + (a[1][1] - q).powi(2) + (a[2][2] - q).powi(2) + 2.0 * p1;
    let p = (p2 / 6.0).sqrt();
    let mut b = *a;
    for (i, row) in b.iter_mut().enumerate() {
        row[i] -= q;
        row.iter_mut().for_each(|v| *v /= p);
    }
    let det = b[0][0] * (b[1][1] * b[2][2] - b[1][2] * b[2][1])
        - b[0][1] * (b[1][0] * b[2][2] - b[1][2] * b[2][0])
        + b[0][2] * (b[1][0] * b[2][1] - b[1][1] * b[2][0]);
    let phi = (det / 2.0).clamp(-1.0, 1.0).acos() / 3.0;
    let major = q + 2.0 * p * phi.cos();
    let least = q + 2.0 * p * (phi + 2.0 * PI / 3.0).cos();
    [major, 3.0 * q - major - least, least]
}

pub(super) fn compute(roi: &Roi) -> Vec<f64> {
    let [sz, sy, sx] = roi.spacing_zyx();
    let voxel_volume = roi.len() as f64 * sz * sy * sx;

    let points: Vec<[f64; 3]> = roi
        .positions()
        .iter()
        .map(|&(z, y, x)| [z as f64 * sz, y as f64 * sy, x as f64 * sx])
        .collect();
    let [major, minor, least] = match covariance(&points) {
        // 数值误差造成的微小负特征值截断为 0.
        Some(cov) => symmetric_eigenvalues(&cov).map(|e| e.max(0.0)),
        None => [f64::NAN; 3],
    };

    let mesh = mesh::compute(roi);
    let (v, a) = (mesh.volume, mesh.surface_area);
    // 与体积相同的球的表面积.
    let sphere_area = (36.0 * PI * v * v).cbrt();
    let [d3, slice, column, row] = mesh.diameters;

    vec![
        v / (PI * a.powi(3)).sqrt(),
        36.0 * PI * v * v / a.powi(3),
        (minor / major).sqrt(),
        (least / major).sqrt(),
        4.0 * least.sqrt(),
        4.0 * major.sqrt(),
        column,
        row,
        slice,
        d3,
        v,
        4.0 * minor.sqrt(),
        a / sphere_area,
        sphere_area / a,
        a,
        a / v,
        voxel_volume,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eigenvalues() {
        let diag = [[1.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 2.0]];
        assert_eq!(symmetric_eigenvalues(&diag), [3.0, 2.0, 1.0]);

        // 特征值 4, 2, 1 (特征向量 (1,1,0), (1,-1,0), (0,0,1)).
        let a = [[3.0, 1.0, 0.0], [1.0, 3.0, 0.0], [0.0, 0.0, 1.0]];
        let e = symmetric_eigenvalues(&a);
        for (got, want) in e.iter().zip([4.0, 2.0, 1.0]) {
            assert!((got - want).abs() < 1e-9, "{e:?}");
        }
    }

    #[test]
    fn test_single_voxel_features() {
        use crate::data::{PixelType, Volume};
        use crate::radiomics::Settings;
        use crate::test_support;
        use crate::VolumeAttr;

        let mask = test_support::center_voxel_mask(5);
        let image = Volume::from_parts(
            mask.geometry().clone(),
            PixelType::Float32,
            ndarray::Array3::from_elem((5, 5, 5), 1.0),
        );
        let roi = Roi::new(&image, &mask, &Settings::default()).unwrap();
        let f = compute(&roi);
        let get = |name: &str| f[FEATURES.iter().position(|n| *n == name).unwrap()];

        assert_eq!(get("VoxelVolume"), 1.0);
        assert!((get("MeshVolume") - 1.0 / 6.0).abs() < 1e-12);
        assert!((get("SurfaceArea") - 3f64.sqrt()).abs() < 1e-12);
        assert_eq!(get("Maximum3DDiameter"), 1.0);
        let v = 1.0 / 6.0;
        let a = 3f64.sqrt();
        let sphericity = (36.0 * PI * v * v).cbrt() / a;
        assert!((get("Sphericity") - sphericity).abs() < 1e-12);
        assert!((get("SphericalDisproportion") * get("Sphericity") - 1.0).abs() < 1e-12);
        assert!((get("Compactness2") - sphericity.powi(3)).abs() < 1e-12);
        assert!((get("Compactness1").powi(2) * 36.0 * PI * PI - get("Compactness2")).abs() < 1e-12);
        assert!((get("SurfaceVolumeRatio") - a / v).abs() < 1e-9);
        // 单个体素没有主轴.
        assert!(get("MajorAxisLength").is_nan());
    }

    #[test]
    fn test_covariance() {
        let pts = [[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
        let cov = covariance(&pts).unwrap();
        assert_eq!(cov[0][0], 2.0);
        assert_eq!(cov[1][1], 0.0);
        assert!(covariance(&pts[..1]).is_none());
    }
}
