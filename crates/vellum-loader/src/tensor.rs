//! Tensor descriptors and element widening.

use byteorder::{ByteOrder, LittleEndian};
use half::{bf16, f16};

use crate::error::LoaderError;

/// On-disk element encoding tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GgufDtype {
    F32,
    F16,
    BF16,
    F64,
    I8,
    I16,
    I32,
    I64,
    /// Block-quantized encoding (Q4_0, Q8_0, K-quants, ...), identified by its raw tag.
    Quantized(u32),
    Unknown(u32),
}

impl GgufDtype {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::F32,
            1 => Self::F16,
            24 => Self::I8,
            25 => Self::I16,
            26 => Self::I32,
            27 => Self::I64,
            28 => Self::F64,
            30 => Self::BF16,
            2..=23 | 29 | 31..=39 => Self::Quantized(value),
            _ => Self::Unknown(value),
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            Self::F32 => 0,
            Self::F16 => 1,
            Self::I8 => 24,
            Self::I16 => 25,
            Self::I32 => 26,
            Self::I64 => 27,
            Self::F64 => 28,
            Self::BF16 => 30,
            Self::Quantized(tag) | Self::Unknown(tag) => tag,
        }
    }

    /// Bytes per element for plain encodings; `None` for block formats.
    pub fn element_size(self) -> Option<usize> {
        match self {
            Self::I8 => Some(1),
            Self::F16 | Self::BF16 | Self::I16 => Some(2),
            Self::F32 | Self::I32 => Some(4),
            Self::F64 | Self::I64 => Some(8),
            Self::Quantized(_) | Self::Unknown(_) => None,
        }
    }
}

/// Name, shape and location of one tensor.
///
/// `shape` is outer-to-inner: a projection matrix reads `[out_features, in_features]`
/// and is stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: GgufDtype,
    /// Byte offset relative to the start of the data section.
    pub offset: u64,
}

impl TensorInfo {
    /// Product of the dimensions. Fails when it does not fit `usize`.
    pub fn element_count(&self) -> Result<usize, LoaderError> {
        checked_element_count(&self.name, &self.shape)
    }

    /// Byte length of the tensor's data, if the encoding is supported.
    pub fn byte_len(&self) -> Result<usize, LoaderError> {
        let size = self.dtype.element_size().ok_or_else(|| LoaderError::UnsupportedDtype {
            name: self.name.clone(),
            dtype: self.dtype,
        })?;
        size.checked_mul(self.element_count()?)
            .ok_or_else(|| LoaderError::InvalidData(format!("tensor '{}' byte length overflows", self.name)))
    }
}

pub(crate) fn checked_element_count(name: &str, shape: &[usize]) -> Result<usize, LoaderError> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| LoaderError::InvalidData(format!("tensor '{name}' shape {shape:?} overflows the element count")))
}

/// Decode little-endian `bytes` of `info`'s encoding into `f32`.
///
/// Half-precision values are expanded exactly; 64-bit and integer values are
/// converted with `as` and may round.
pub fn widen_to_f32(info: &TensorInfo, bytes: &[u8]) -> Result<Vec<f32>, LoaderError> {
    let expected = info.byte_len()?;
    if bytes.len() != expected {
        return Err(LoaderError::InvalidData(format!(
            "tensor '{}' expects {expected} bytes, got {}",
            info.name,
            bytes.len()
        )));
    }

    let count = info.element_count()?;
    let mut out = vec![0f32; count];
    match info.dtype {
        GgufDtype::F32 => LittleEndian::read_f32_into(bytes, &mut out),
        GgufDtype::F16 => {
            for (dst, chunk) in out.iter_mut().zip(bytes.chunks_exact(2)) {
                *dst = f16::from_bits(LittleEndian::read_u16(chunk)).to_f32();
            }
        }
        GgufDtype::BF16 => {
            for (dst, chunk) in out.iter_mut().zip(bytes.chunks_exact(2)) {
                *dst = bf16::from_bits(LittleEndian::read_u16(chunk)).to_f32();
            }
        }
        GgufDtype::F64 => {
            for (dst, chunk) in out.iter_mut().zip(bytes.chunks_exact(8)) {
                *dst = LittleEndian::read_f64(chunk) as f32;
            }
        }
        GgufDtype::I8 => {
            for (dst, &byte) in out.iter_mut().zip(bytes) {
                *dst = f32::from(byte as i8);
            }
        }
        GgufDtype::I16 => {
            for (dst, chunk) in out.iter_mut().zip(bytes.chunks_exact(2)) {
                *dst = f32::from(LittleEndian::read_i16(chunk));
            }
        }
        GgufDtype::I32 => {
            for (dst, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
                *dst = LittleEndian::read_i32(chunk) as f32;
            }
        }
        GgufDtype::I64 => {
            for (dst, chunk) in out.iter_mut().zip(bytes.chunks_exact(8)) {
                *dst = LittleEndian::read_i64(chunk) as f32;
            }
        }
        GgufDtype::Quantized(_) | GgufDtype::Unknown(_) => {
            return Err(LoaderError::UnsupportedDtype {
                name: info.name.clone(),
                dtype: info.dtype,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
#[path = "tensor.test.rs"]
mod tests;
