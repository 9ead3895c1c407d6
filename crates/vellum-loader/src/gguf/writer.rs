use std::{io::Write, path::Path};

use byteorder::{LittleEndian, WriteBytesExt};
use half::f16;

use super::{DEFAULT_ALIGNMENT, MAGIC, value_type};
use crate::{LoaderError, metadata::MetadataValue, tensor::GgufDtype};

struct PendingTensor {
    name: String,
    shape: Vec<usize>,
    dtype: GgufDtype,
    data: Vec<u8>,
}

/// Builds GGUF v3 images. Used to produce synthetic models.
///
/// ```
/// use vellum_loader::{GgufFile, GgufWriter, TensorTable};
///
/// let bytes = GgufWriter::new()
///     .metadata("general.name", "tiny")
///     .tensor_f32("w", &[2, 2], &[1.0, 2.0, 3.0, 4.0])
///     .to_bytes()
///     .unwrap();
/// let file = GgufFile::from_bytes(bytes).unwrap();
/// assert_eq!(file.tensor_f32("w").unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
/// ```
#[derive(Default)]
pub struct GgufWriter {
    metadata: Vec<(String, MetadataValue)>,
    tensors: Vec<PendingTensor>,
}

impl GgufWriter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Add an `f32` tensor; `shape` is outer-to-inner.
    #[must_use]
    pub fn tensor_f32(mut self, name: impl Into<String>, shape: &[usize], data: &[f32]) -> Self {
        self.tensors.push(PendingTensor {
            name: name.into(),
            shape: shape.to_vec(),
            dtype: GgufDtype::F32,
            data: data.iter().flat_map(|v| v.to_le_bytes()).collect(),
        });
        self
    }

    /// Add a tensor stored as IEEE half precision.
    #[must_use]
    pub fn tensor_f16(mut self, name: impl Into<String>, shape: &[usize], data: &[f32]) -> Self {
        self.tensors.push(PendingTensor {
            name: name.into(),
            shape: shape.to_vec(),
            dtype: GgufDtype::F16,
            data: data.iter().flat_map(|v| f16::from_f32(*v).to_le_bytes()).collect(),
        });
        self
    }

    /// Add a tensor with an arbitrary tag and pre-encoded bytes.
    #[must_use]
    pub fn tensor_raw(mut self, name: impl Into<String>, shape: &[usize], dtype: GgufDtype, data: Vec<u8>) -> Self {
        self.tensors.push(PendingTensor {
            name: name.into(),
            shape: shape.to_vec(),
            dtype,
            data,
        });
        self
    }

    fn alignment(&self) -> usize {
        self.metadata
            .iter()
            .find(|(key, _)| key == "general.alignment")
            .and_then(|(_, value)| value.as_u32())
            .map_or(DEFAULT_ALIGNMENT, |a| a as usize)
            .max(1)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, LoaderError> {
        let alignment = self.alignment();
        let mut out = Vec::new();
        out.write_all(MAGIC)?;
        out.write_u32::<LittleEndian>(3)?;
        out.write_u64::<LittleEndian>(self.tensors.len() as u64)?;
        out.write_u64::<LittleEndian>(self.metadata.len() as u64)?;

        for (key, value) in &self.metadata {
            write_string(&mut out, key)?;
            out.write_u32::<LittleEndian>(tag_of(value))?;
            write_value(&mut out, value)?;
        }

        let mut offset = 0usize;
        let mut offsets = Vec::with_capacity(self.tensors.len());
        for tensor in &self.tensors {
            write_string(&mut out, &tensor.name)?;
            out.write_u32::<LittleEndian>(tensor.shape.len() as u32)?;
            for &dim in tensor.shape.iter().rev() {
                out.write_u64::<LittleEndian>(dim as u64)?;
            }
            out.write_u32::<LittleEndian>(tensor.dtype.to_u32())?;
            out.write_u64::<LittleEndian>(offset as u64)?;
            offsets.push(offset);
            offset = (offset + tensor.data.len()).div_ceil(alignment) * alignment;
        }

        let data_start = out.len().div_ceil(alignment) * alignment;
        out.resize(data_start, 0);
        for (tensor, offset) in self.tensors.iter().zip(offsets) {
            out.resize(data_start + offset, 0);
            out.extend_from_slice(&tensor.data);
        }
        Ok(out)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), LoaderError> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

fn write_string(out: &mut Vec<u8>, value: &str) -> std::io::Result<()> {
    out.write_u64::<LittleEndian>(value.len() as u64)?;
    out.write_all(value.as_bytes())
}

fn tag_of(value: &MetadataValue) -> u32 {
    match value {
        MetadataValue::U8(_) => value_type::U8,
        MetadataValue::I8(_) => value_type::I8,
        MetadataValue::U16(_) => value_type::U16,
        MetadataValue::I16(_) => value_type::I16,
        MetadataValue::U32(_) => value_type::U32,
        MetadataValue::I32(_) => value_type::I32,
        MetadataValue::U64(_) => value_type::U64,
        MetadataValue::I64(_) => value_type::I64,
        MetadataValue::F32(_) => value_type::F32,
        MetadataValue::F64(_) => value_type::F64,
        MetadataValue::Bool(_) => value_type::BOOL,
        MetadataValue::String(_) => value_type::STRING,
        MetadataValue::Array(_) => value_type::ARRAY,
    }
}

fn write_value(out: &mut Vec<u8>, value: &MetadataValue) -> Result<(), LoaderError> {
    match value {
        MetadataValue::U8(v) => out.write_u8(*v)?,
        MetadataValue::I8(v) => out.write_i8(*v)?,
        MetadataValue::U16(v) => out.write_u16::<LittleEndian>(*v)?,
        MetadataValue::I16(v) => out.write_i16::<LittleEndian>(*v)?,
        MetadataValue::U32(v) => out.write_u32::<LittleEndian>(*v)?,
        MetadataValue::I32(v) => out.write_i32::<LittleEndian>(*v)?,
        MetadataValue::U64(v) => out.write_u64::<LittleEndian>(*v)?,
        MetadataValue::I64(v) => out.write_i64::<LittleEndian>(*v)?,
        MetadataValue::F32(v) => out.write_f32::<LittleEndian>(*v)?,
        MetadataValue::F64(v) => out.write_f64::<LittleEndian>(*v)?,
        MetadataValue::Bool(v) => out.write_u8(u8::from(*v))?,
        MetadataValue::String(v) => write_string(out, v)?,
        MetadataValue::Array(values) => {
            let element_tag = match values.first() {
                Some(MetadataValue::Array(_)) => {
                    return Err(LoaderError::InvalidData("nested metadata arrays are not supported".into()));
                }
                Some(first) => tag_of(first),
                None => value_type::U32,
            };
            out.write_u32::<LittleEndian>(element_tag)?;
            out.write_u64::<LittleEndian>(values.len() as u64)?;
            for element in values {
                if tag_of(element) != element_tag {
                    return Err(LoaderError::InvalidData("metadata array elements must share one type".into()));
                }
                write_value(out, element)?;
            }
        }
    }
    Ok(())
}
