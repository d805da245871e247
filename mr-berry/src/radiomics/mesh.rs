//! ROI 的行进立方体 (marching cubes) 表面网格.
//!
//! 以体素中心为网格点, 等值面取 0.5. 标注是二值的, 所以网格顶点总是落在 ROI 内外两个
//! 相邻体素中心连线的中点上. 顶点以 "两倍体素坐标" 的整数形式保存, 便于判断共面.
//!
//! 立方体某个面上只有对角两个角点在 ROI 内时, 这两个角点视为不连通, 与 6 连通的
//! `VolumeNum` 一致. 每个立方体内的等值线环按扇形三角化.

use std::collections::HashSet;

use once_cell::sync::Lazy;

use super::roi::Roi;

/// 立方体的 6 个面, 每个面的 4 个角点按环绕顺序排列.
///
/// 角点编号 `c` 的第 2 位为 z 偏移, 第 1 位为 y 偏移, 第 0 位为 x 偏移.
const FACES: [[usize; 4]; 6] = [
    [0, 2, 6, 4],
    [1, 3, 7, 5],
    [0, 1, 5, 4],
    [2, 3, 7, 6],
    [0, 1, 3, 2],
    [4, 5, 7, 6],
];

const NO_LINK: usize = usize::MAX;

/// 角点 `c` 的偏移 `(dz, dy, dx)`.
#[inline]
fn corner_offset(c: usize) -> [i64; 3] {
    [(c >> 2 & 1) as i64, (c >> 1 & 1) as i64, (c & 1) as i64]
}

/// 相邻角点 `a`, `b` 之间的棱的编号, 共 12 条.
fn edge_id(a: usize, b: usize) -> usize {
    let lo = a.min(b);
    let bit = (a ^ b).trailing_zeros() as usize;
    let rest = (lo & ((1 << bit) - 1)) | (lo >> (bit + 1) << bit);
    bit * 4 + rest
}

/// 棱 `id` 的两个端点, 较小者在前.
fn edge_corners(id: usize) -> (usize, usize) {
    let (bit, rest) = (id / 4, id % 4);
    let lo = (rest & ((1 << bit) - 1)) | (rest >> bit << (bit + 1));
    (lo, lo | 1 << bit)
}

/// 棱 `id` 中点相对立方体原点的两倍坐标 `(z, y, x)`.
fn edge_vertex(id: usize) -> [i64; 3] {
    let (lo, hi) = edge_corners(id);
    let (a, b) = (corner_offset(lo), corner_offset(hi));
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
fn sub<T: Copy + std::ops::Sub<Output = T>>(a: [T; 3], b: [T; 3]) -> [T; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn cross<T: Copy + std::ops::Sub<Output = T> + std::ops::Mul<Output = T>>(a: [T; 3], b: [T; 3]) -> [T; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// 角点状态为 `config` (第 `c` 位表示角点 `c` 在 ROI 内) 的立方体中的等值线环.
///
/// 每个环是棱编号的序列, 方向使法向量指向 ROI 外侧.
fn cube_loops(config: usize) -> Vec<Vec<usize>> {
    let inside = |c: usize| config >> c & 1 == 1;
    let mut link = [[NO_LINK; 2]; 12];
    let mut connect = |a: usize, b: usize| {
        for (x, y) in [(a, b), (b, a)] {
            let slot = usize::from(link[x][0] != NO_LINK);
            link[x][slot] = y;
        }
    };
    for face in &FACES {
        let edge = |k: usize| edge_id(face[k], face[(k + 1) % 4]);
        let crossing: Vec<usize> = (0..4)
            .filter(|&k| inside(face[k]) != inside(face[(k + 1) % 4]))
            .collect();
        match crossing.len() {
            2 => connect(edge(crossing[0]), edge(crossing[1])),
            // 对角两点在内: 分别围住每个内部角点.
            4 => (0..4)
                .filter(|&k| inside(face[k]))
                .for_each(|k| connect(edge((k + 3) % 4), edge(k))),
            _ => {}
        }
    }

    let mut seen = [false; 12];
    let mut loops = Vec::new();
    for start in 0..12 {
        if seen[start] || link[start][0] == NO_LINK {
            continue;
        }
        let mut path = vec![start];
        seen[start] = true;
        let (mut prev, mut cur) = (start, link[start][0]);
        while cur != start {
            seen[cur] = true;
            path.push(cur);
            let next = if link[cur][0] == prev { link[cur][1] } else { link[cur][0] };
            (prev, cur) = (cur, next);
        }

        // 由内指向外的方向之和, 与环的法向量同向.
        let mut outward = [0i64; 3];
        let mut normal = [0i64; 3];
        for (k, &e) in path.iter().enumerate() {
            let (lo, hi) = edge_corners(e);
            let (inner, outer) = if inside(lo) { (lo, hi) } else { (hi, lo) };
            let d = sub(corner_offset(outer), corner_offset(inner));
            let n = cross(edge_vertex(e), edge_vertex(path[(k + 1) % path.len()]));
            for a in 0..3 {
                outward[a] += d[a];
                normal[a] += n[a];
            }
        }
        if outward.iter().zip(&normal).map(|(a, b)| a * b).sum::<i64>() < 0 {
            path.reverse();
        }
        loops.push(path);
    }
    loops
}

/// 全部 256 种角点状态对应的等值线环.
static CASES: Lazy<Vec<Vec<Vec<usize>>>> = Lazy::new(|| (0..256).map(cube_loops).collect());

/// 网格形状量.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct MeshFeatures {
    /// 网格包围的体积.
    pub volume: f64,
    /// 网格表面积.
    pub surface_area: f64,
    /// 顶点间的最大距离: 三维, 同一横断面 (z 相同), 同一冠状面 (y 相同), 同一矢状面 (x 相同).
    pub diameters: [f64; 4],
}

/// 计算 ROI 的表面网格及其形状量.
pub(super) fn compute(roi: &Roi) -> MeshFeatures {
    let (nz, ny, nx) = roi.shape();
    let half = roi.spacing_zyx().map(|s| s / 2.0);
    let physical = |k: [i64; 3]| [k[0] as f64 * half[0], k[1] as f64 * half[1], k[2] as f64 * half[2]];

    let mut surface_area = 0.0;
    let mut volume = 0.0;
    let mut vertices: HashSet<[i64; 3]> = HashSet::new();
    // 包围盒向外扩展一层, 保证网格闭合.
    for z in -1..nz as i64 {
        for y in -1..ny as i64 {
            for x in -1..nx as i64 {
                let config = (0..8).fold(0usize, |acc, c| {
                    let o = corner_offset(c);
                    acc | usize::from(roi.contains(z + o[0], y + o[1], x + o[2])) << c
                });
                if config == 0 || config == 255 {
                    continue;
                }
                for path in &CASES[config] {
                    let points: Vec<[f64; 3]> = path
                        .iter()
                        .map(|e| {
                            let v = edge_vertex(*e);
                            let k = [2 * z + v[0], 2 * y + v[1], 2 * x + v[2]];
                            vertices.insert(k);
                            physical(k)
                        })
                        .collect();
                    let a = points[0];
                    for w in points[1..].windows(2) {
                        let (b, c) = (w[0], w[1]);
                        let n = cross(sub(b, a), sub(c, a));
                        surface_area += dot(n, n).sqrt() / 2.0;
                        volume += dot(a, cross(b, c)) / 6.0;
                    }
                }
            }
        }
    }

    let vertices: Vec<[i64; 3]> = vertices.into_iter().collect();
    MeshFeatures {
        volume: volume.abs(),
        surface_area,
        diameters: diameters(&vertices, half),
    }
}

/// 顶点两两之间的最大距离. 顶点为两倍体素坐标, `half` 为半个体素间距.
fn diameters(vertices: &[[i64; 3]], half: [f64; 3]) -> [f64; 4] {
    let farthest = |i: usize| -> [f64; 4] {
        let a = vertices[i];
        let mut best = [0.0f64; 4];
        for b in &vertices[i + 1..] {
            let d2: f64 = (0..3).map(|k| ((a[k] - b[k]) as f64 * half[k]).powi(2)).sum();
            best[0] = best[0].max(d2);
            for k in 0..3 {
                if a[k] == b[k] {
                    best[k + 1] = best[k + 1].max(d2);
                }
            }
        }
        best
    };
    let merge = |a: [f64; 4], b: [f64; 4]| -> [f64; 4] { std::array::from_fn(|k| a[k].max(b[k])) };

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            use rayon::prelude::*;
            let squared = (0..vertices.len()).into_par_iter().map(farthest).reduce(|| [0.0; 4], merge);
        } else {
            let squared = (0..vertices.len()).map(farthest).fold([0.0; 4], merge);
        }
    }
    squared.map(f64::sqrt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Geometry, Mask, PixelType};
    use crate::radiomics::Settings;
    use crate::test_support;
    use crate::VolumeAttr;
    use ndarray::Array3;

    fn roi_of(mask: &Mask) -> Roi {
        let shape = mask.data().dim();
        let image = crate::data::Volume::from_parts(
            mask.geometry().clone(),
            PixelType::Float32,
            Array3::from_elem(shape, 1.0),
        );
        Roi::new(&image, mask, &Settings::default()).unwrap()
    }

    #[test]
    fn test_edge_numbering() {
        let mut ids: Vec<usize> = (0..8)
            .flat_map(|a| (0..3).map(move |bit| (a, a ^ 1 << bit)))
            .filter(|(a, b)| a < b)
            .map(|(a, b)| edge_id(a, b))
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..12).collect::<Vec<_>>());
        for id in 0..12 {
            let (lo, hi) = edge_corners(id);
            assert_eq!(edge_id(lo, hi), id);
            assert_eq!((lo ^ hi).count_ones(), 1);
        }
    }

    #[test]
    fn test_every_case_is_closed() {
        // 每条跨越的棱恰好出现在一个环中.
        for config in 1..255usize {
            let inside = |c: usize| config >> c & 1 == 1;
            let mut used: Vec<usize> = CASES[config].iter().flatten().copied().collect();
            used.sort_unstable();
            let crossing: Vec<usize> = (0..12)
                .filter(|&e| {
                    let (lo, hi) = edge_corners(e);
                    inside(lo) != inside(hi)
                })
                .collect();
            assert_eq!(used, crossing, "config {config:#010b}");
            assert!(CASES[config].iter().all(|l| l.len() >= 3));
        }
        assert!(CASES[0].is_empty() && CASES[255].is_empty());
    }

    #[test]
    fn test_single_voxel_is_octahedron() {
        let m = compute(&roi_of(&test_support::center_voxel_mask(5)));
        assert!((m.volume - 1.0 / 6.0).abs() < 1e-12, "{m:?}");
        assert!((m.surface_area - 3f64.sqrt()).abs() < 1e-12, "{m:?}");
        assert_eq!(m.diameters, [1.0; 4]);
    }

    #[test]
    fn test_cube() {
        // 4x4x4 立方体: 棱被削去三棱柱, 角被削去四面体.
        let mut data = Array3::zeros((6, 6, 6));
        data.slice_mut(ndarray::s![1..5, 1..5, 1..5]).fill(1u8);
        let mask = Mask::from_parts(Geometry::identity([6, 6, 6]), PixelType::Uint8, data);
        let m = compute(&roi_of(&mask));
        let n = 4.0f64;
        let volume = n.powi(3) - 1.5 * (n - 1.0) - 5.0 / 6.0;
        let area = 6.0 * (n - 1.0).powi(2) + 6.0 * 2f64.sqrt() * (n - 1.0) + 3f64.sqrt();
        assert!((m.volume - volume).abs() < 1e-9, "{m:?}");
        assert!((m.surface_area - area).abs() < 1e-9, "{m:?}");
        assert!((m.diameters[0] - 34f64.sqrt()).abs() < 1e-12);
        assert_eq!(&m.diameters[1..], &[5.0; 3]);
    }

    #[test]
    fn test_anisotropic_spacing_scales_mesh() {
        let mut data = Array3::zeros((5, 5, 5));
        data[(2, 2, 2)] = 1u8;
        let geometry = Geometry::new([5, 5, 5], [1.0, 1.0, 2.0], [0.0; 3], crate::data::IDENTITY_DIRECTION);
        let m = compute(&roi_of(&Mask::from_parts(geometry, PixelType::Uint8, data)));
        // 八面体沿 z 拉伸两倍.
        assert!((m.volume - 2.0 / 6.0).abs() < 1e-12);
        assert_eq!(m.diameters[0], 2.0);
        // 横断面内只有 x, y 方向的顶点.
        assert_eq!(m.diameters[1], 1.0);
    }
}
