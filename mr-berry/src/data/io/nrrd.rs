//! NRRD 读取. 支持三维数据、`raw` / `gzip` / `ascii` 编码以及分离式 (`.nhdr`) 数据文件.
//!
//! 文件结构: 魔数行 `NRRD000X`, 若干 `field: value` 行, 一个空行, 然后是数据.
//! 数据按 x 变化最快存储, 恰好对应 `(z, y, x)` 的行优先布局.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use itertools::Itertools;
use ndarray::Array3;
use num::ToPrimitive;

use super::{RawVolume, VolumeError};
use crate::data::{Direction, Geometry, PixelType, IDENTITY_DIRECTION};

/// NRRD 头文件或数据错误.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NrrdError {
    /// 缺少 `NRRD000X` 魔数.
    #[error("缺少 NRRD 魔数")]
    BadMagic,

    /// 缺少必需字段.
    #[error("缺少必需字段 `{0}`")]
    MissingField(&'static str),

    /// 字段值无法解析.
    #[error("字段 `{field}` 的值 `{value}` 无法解析")]
    BadField {
        /// 字段名.
        field: String,
        /// 原始值.
        value: String,
    },

    /// 不支持的编码.
    #[error("不支持的编码 `{0}`")]
    UnsupportedEncoding(String),

    /// 不支持的物理空间.
    #[error("不支持的物理空间 `{0}`")]
    UnsupportedSpace(String),

    /// 数据长度与头文件不符.
    #[error("数据长度不足: 需要 {expected} 字节, 实际 {actual} 字节")]
    Truncated {
        /// 需要的字节数.
        expected: usize,
        /// 实际字节数.
        actual: usize,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Encoding {
    Raw,
    Gzip,
    Ascii,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Endian {
    Little,
    Big,
}

/// 解析后的头文件.
#[derive(Debug)]
struct Header {
    pixel_type: PixelType,
    size: [usize; 3],
    encoding: Encoding,
    endian: Endian,
    spacing: [f64; 3],
    origin: [f64; 3],
    direction: Direction,
    /// 体素个数.
    count: usize,
    /// 二进制数据的字节数.
    byte_len: usize,
    data_file: Option<PathBuf>,
    byte_skip: usize,
    line_skip: usize,
}

fn bad(field: &str, value: &str) -> NrrdError {
    NrrdError::BadField {
        field: field.to_owned(),
        value: value.to_owned(),
    }
}

/// 解析 `(a,b,c)` 形式的向量. 分量必须是有限数.
fn parse_vector(field: &str, s: &str) -> Result<[f64; 3], NrrdError> {
    let inner = s
        .trim()
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .ok_or_else(|| bad(field, s))?;
    let v: Vec<f64> = inner
        .split(',')
        .map(|t| t.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| bad(field, s))?;
    match v.as_slice() {
        &[a, b, c] if v.iter().all(|x| x.is_finite()) => Ok([a, b, c]),
        _ => Err(bad(field, s)),
    }
}

/// 将给定空间中的坐标转换到 LPS 的符号.
fn space_to_lps(space: &str) -> Result<[f64; 3], NrrdError> {
    match space.trim() {
        "left-posterior-superior" | "LPS" => Ok([1.0, 1.0, 1.0]),
        "right-anterior-superior" | "RAS" => Ok([-1.0, -1.0, 1.0]),
        "left-anterior-superior" | "LAS" => Ok([1.0, -1.0, 1.0]),
        other => Err(NrrdError::UnsupportedSpace(other.to_owned())),
    }
}

fn parse_header(text: &str, base_dir: &Path) -> Result<Header, NrrdError> {
    let mut lines = text.lines();
    if !lines.next().is_some_and(|l| l.starts_with("NRRD000")) {
        return Err(NrrdError::BadMagic);
    }
    let mut fields: HashMap<String, String> = HashMap::new();
    for line in lines {
        if line.trim().is_empty() {
            break;
        }
        if line.starts_with('#') || line.contains(":=") {
            // 注释和 key/value 对.
            continue;
        }
        if let Some((k, v)) = line.split_once(": ") {
            fields.insert(k.trim().to_ascii_lowercase(), v.trim().to_owned());
        }
    }
    let get = |k: &'static str| fields.get(k).map(String::as_str);
    let require = |k: &'static str| get(k).ok_or(NrrdError::MissingField(k));

    let type_name = require("type")?;
    let pixel_type = PixelType::from_nrrd_name(type_name).ok_or_else(|| bad("type", type_name))?;

    let dimension = require("dimension")?;
    if dimension.trim() != "3" {
        return Err(bad("dimension", dimension));
    }
    let sizes = require("sizes")?;
    let size: Vec<usize> = sizes
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| bad("sizes", sizes))?;
    let size: [usize; 3] = match size.as_slice() {
        &[x, y, z] if x > 0 && y > 0 && z > 0 => [x, y, z],
        _ => return Err(bad("sizes", sizes)),
    };
    let count = size
        .iter()
        .try_fold(1usize, |acc, n| acc.checked_mul(*n))
        .ok_or_else(|| bad("sizes", sizes))?;
    let byte_len = count
        .checked_mul(pixel_type.byte_size())
        .ok_or_else(|| bad("sizes", sizes))?;

    let encoding = match require("encoding")? {
        "raw" => Encoding::Raw,
        "gzip" | "gz" => Encoding::Gzip,
        "ascii" | "text" | "txt" => Encoding::Ascii,
        other => return Err(NrrdError::UnsupportedEncoding(other.to_owned())),
    };
    let endian = match get("endian") {
        None | Some("little") => Endian::Little,
        Some("big") => Endian::Big,
        Some(other) => return Err(bad("endian", other)),
    };

    let sign = match get("space") {
        Some(space) => space_to_lps(space)?,
        None => [1.0; 3],
    };

    let mut spacing = [1.0; 3];
    let mut direction = IDENTITY_DIRECTION;
    if let Some(dirs) = get("space directions") {
        let vectors: Vec<[f64; 3]> = dirs
            .split_whitespace()
            .map(|t| parse_vector("space directions", t))
            .collect::<Result<_, _>>()?;
        if vectors.len() != 3 {
            return Err(bad("space directions", dirs));
        }
        for (c, v) in vectors.iter().enumerate() {
            let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm <= 0.0 || !norm.is_finite() {
                return Err(bad("space directions", dirs));
            }
            spacing[c] = norm;
            for r in 0..3 {
                direction[r][c] = sign[r] * v[r] / norm;
            }
        }
    } else if let Some(sp) = get("spacings") {
        let v: Vec<f64> = sp
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|_| bad("spacings", sp))?;
        match v.as_slice() {
            &[a, b, c] if v.iter().all(|s| s.is_finite() && *s > 0.0) => spacing = [a, b, c],
            _ => return Err(bad("spacings", sp)),
        }
    }

    let mut origin = [0.0; 3];
    if let Some(o) = get("space origin") {
        let v = parse_vector("space origin", o)?;
        for a in 0..3 {
            origin[a] = sign[a] * v[a];
        }
    }

    let data_file = get("data file")
        .or_else(|| get("datafile"))
        .map(|f| base_dir.join(f));
    let parse_skip = |k: &'static str| -> Result<usize, NrrdError> {
        match get(k) {
            None => Ok(0),
            Some(v) => v.parse().map_err(|_| bad(k, v)),
        }
    };

    Ok(Header {
        pixel_type,
        size,
        encoding,
        endian,
        spacing,
        origin,
        direction,
        count,
        byte_len,
        data_file,
        byte_skip: parse_skip("byte skip")?,
        line_skip: parse_skip("line skip")?,
    })
}

/// 找到头文件结束 (第一个空行) 后数据开始的位置.
fn split_header(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|p| p + 2)
        .or_else(|| {
            bytes
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .map(|p| p + 4)
        })
}

macro_rules! decode_as {
    ($bytes: expr, $endian: expr, $t: ty) => {{
        const N: usize = std::mem::size_of::<$t>();
        $bytes
            .chunks_exact(N)
            .map(|c| {
                let mut buf = [0u8; N];
                buf.copy_from_slice(c);
                let v = match $endian {
                    Endian::Little => <$t>::from_le_bytes(buf),
                    Endian::Big => <$t>::from_be_bytes(buf),
                };
                v.to_f32().unwrap_or(f32::NAN)
            })
            .collect::<Vec<f32>>()
    }};
}

fn decode_binary(bytes: &[u8], header: &Header) -> Result<Vec<f32>, NrrdError> {
    let expected = header.byte_len;
    if bytes.len() < expected {
        return Err(NrrdError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    let bytes = &bytes[..expected];
    let e = header.endian;
    Ok(match header.pixel_type {
        PixelType::Uint8 => decode_as!(bytes, e, u8),
        PixelType::Int8 => decode_as!(bytes, e, i8),
        PixelType::Uint16 => decode_as!(bytes, e, u16),
        PixelType::Int16 => decode_as!(bytes, e, i16),
        PixelType::Uint32 => decode_as!(bytes, e, u32),
        PixelType::Int32 => decode_as!(bytes, e, i32),
        PixelType::Uint64 => decode_as!(bytes, e, u64),
        PixelType::Int64 => decode_as!(bytes, e, i64),
        PixelType::Float32 => decode_as!(bytes, e, f32),
        PixelType::Float64 => decode_as!(bytes, e, f64),
    })
}

fn decode_ascii(text: &str, count: usize) -> Result<Vec<f32>, NrrdError> {
    let values: Vec<f32> = text
        .split_whitespace()
        .take(count)
        .map(str::parse::<f32>)
        .collect::<Result<_, _>>()
        .map_err(|_| bad("data", "ascii"))?;
    if values.len() < count {
        return Err(NrrdError::Truncated {
            expected: count,
            actual: values.len(),
        });
    }
    Ok(values)
}

pub(super) fn read(path: &Path) -> Result<RawVolume, VolumeError> {
    let bytes = fs::read(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let header_end = split_header(&bytes);
    let header_text = String::from_utf8_lossy(&bytes[..header_end.unwrap_or(bytes.len())]);
    let header = parse_header(&header_text, base_dir)?;

    let payload: Vec<u8> = match &header.data_file {
        Some(file) => fs::read(file)?,
        None => match header_end {
            Some(p) => bytes[p..].to_vec(),
            None => Vec::new(),
        },
    };
    let payload = skip_lines(&payload, header.line_skip);

    let values = match header.encoding {
        Encoding::Raw => decode_binary(skip_bytes(payload, header.byte_skip), &header)?,
        Encoding::Gzip => {
            let mut inflated = Vec::new();
            GzDecoder::new(payload).read_to_end(&mut inflated)?;
            decode_binary(skip_bytes(&inflated, header.byte_skip), &header)?
        }
        Encoding::Ascii => decode_ascii(&String::from_utf8_lossy(payload), header.count)?,
    };

    let geometry = Geometry::new(header.size, header.spacing, header.origin, header.direction);
    let data = Array3::from_shape_vec(geometry.shape(), values)
        .map_err(|_| VolumeError::NotThreeDimensional(header.size.to_vec()))?;
    Ok(RawVolume {
        geometry,
        pixel_type: header.pixel_type,
        data,
    })
}

fn skip_bytes(bytes: &[u8], n: usize) -> &[u8] {
    &bytes[n.min(bytes.len())..]
}

fn skip_lines(bytes: &[u8], n: usize) -> &[u8] {
    if n == 0 {
        return bytes;
    }
    match bytes.iter().positions(|&b| b == b'\n').nth(n - 1) {
        Some(p) => &bytes[p + 1..],
        None => &[],
    }
}
