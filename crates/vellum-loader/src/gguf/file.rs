use std::{fs::File, path::Path};

use byteorder::{LittleEndian, ReadBytesExt};
use memmap2::Mmap;
use rustc_hash::FxHashMap;
use vellum_instrumentation::{MetricEvent, record_metric};

use super::{DEFAULT_ALIGNMENT, MAGIC, value_type};
use crate::{
    LoaderError, TensorTable, metadata::{Metadata, MetadataValue}, tensor::{GgufDtype, TensorInfo, widen_to_f32}
};

const MAX_STRING_LEN: usize = 16 * 1024 * 1024;
const MAX_ARRAY_LEN: usize = 16 * 1024 * 1024;
const MAX_DIMS: usize = 8;

/// Backing bytes of a parsed file.
#[derive(Debug)]
enum Storage {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Storage {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Mapped(map) => map,
            Storage::Owned(bytes) => bytes,
        }
    }
}

/// A parsed GGUF file. Tensor data stays in the map until requested.
#[derive(Debug)]
pub struct GgufFile {
    version: u32,
    metadata: Metadata,
    tensors: Vec<TensorInfo>,
    index: FxHashMap<String, usize>,
    data_start: usize,
    storage: Storage,
}

impl GgufFile {
    /// Memory-map and parse the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoaderError> {
        let file = File::open(path.as_ref())?;
        // SAFETY: the map is read-only; the file must not be truncated while loaded.
        let map = unsafe { Mmap::map(&file) }?;
        record_metric!(MetricEvent::GgufFileMmap {
            size_bytes: map.len() as u64
        });
        Self::parse(Storage::Mapped(map))
    }

    /// Parse an in-memory GGUF image.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, LoaderError> {
        Self::parse(Storage::Owned(bytes))
    }

    fn parse(storage: Storage) -> Result<Self, LoaderError> {
        let bytes = storage.bytes();
        let mut reader = bytes;

        let mut magic = [0u8; 4];
        std::io::Read::read_exact(&mut reader, &mut magic)?;
        if &magic != MAGIC {
            return Err(LoaderError::InvalidMagic(magic));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if !(2..=3).contains(&version) {
            return Err(LoaderError::UnsupportedVersion(version));
        }

        let tensor_count = read_len(&mut reader, usize::MAX)?;
        let metadata_count = read_len(&mut reader, usize::MAX)?;

        let mut metadata = Metadata::new();
        for _ in 0..metadata_count {
            let key = read_string(&mut reader)?;
            let tag = reader.read_u32::<LittleEndian>()?;
            let value = read_value(&mut reader, tag)?;
            metadata.insert(key, value);
        }

        let mut tensors = Vec::with_capacity(tensor_count.min(4096));
        for _ in 0..tensor_count {
            tensors.push(read_tensor_info(&mut reader)?);
        }

        let alignment = metadata
            .get_u32("general.alignment")
            .map_or(DEFAULT_ALIGNMENT, |a| a as usize)
            .max(1);
        let header_len = bytes.len() - reader.len();
        let data_start = header_len.div_ceil(alignment) * alignment;

        let index = tensors.iter().enumerate().map(|(i, t)| (t.name.clone(), i)).collect();

        tracing::debug!(version, tensors = tensor_count, metadata = metadata_count, data_start, "parsed GGUF header");

        Ok(Self {
            version,
            metadata,
            tensors,
            index,
            data_start,
            storage,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn tensors(&self) -> &[TensorInfo] {
        &self.tensors
    }

    /// Raw little-endian bytes of a tensor.
    pub fn tensor_bytes(&self, info: &TensorInfo) -> Result<&[u8], LoaderError> {
        let bytes = self.storage.bytes();
        let overflow = || LoaderError::InvalidData(format!("tensor '{}' offset {} is out of range", info.name, info.offset));
        let start = usize::try_from(info.offset)
            .ok()
            .and_then(|offset| self.data_start.checked_add(offset))
            .ok_or_else(overflow)?;
        let end = start.checked_add(info.byte_len()?).ok_or_else(overflow)?;
        if end > bytes.len() {
            return Err(LoaderError::OutOfBounds {
                name: info.name.clone(),
                start,
                end,
                len: bytes.len(),
            });
        }
        Ok(&bytes[start..end])
    }
}

impl TensorTable for GgufFile {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn tensor_info(&self, name: &str) -> Option<&TensorInfo> {
        self.index.get(name).map(|&i| &self.tensors[i])
    }

    fn tensor_names(&self) -> Vec<&str> {
        self.tensors.iter().map(|t| t.name.as_str()).collect()
    }

    fn tensor_f32(&self, name: &str) -> Result<Vec<f32>, LoaderError> {
        let info = self.require_tensor(name)?;
        widen_to_f32(info, self.tensor_bytes(info)?)
    }
}

fn read_len(reader: &mut &[u8], limit: usize) -> Result<usize, LoaderError> {
    let len = reader.read_u64::<LittleEndian>()?;
    usize::try_from(len)
        .ok()
        .filter(|&len| len <= limit)
        .ok_or_else(|| LoaderError::InvalidData(format!("length {len} exceeds limit")))
}

fn read_string(reader: &mut &[u8]) -> Result<String, LoaderError> {
    let len = read_len(reader, MAX_STRING_LEN)?;
    if reader.len() < len {
        return Err(LoaderError::InvalidData("string runs past end of file".into()));
    }
    let (head, tail) = reader.split_at(len);
    *reader = tail;
    String::from_utf8(head.to_vec()).map_err(|_| LoaderError::InvalidData("string is not UTF-8".into()))
}

fn read_value(reader: &mut &[u8], tag: u32) -> Result<MetadataValue, LoaderError> {
    Ok(match tag {
        value_type::U8 => MetadataValue::U8(reader.read_u8()?),
        value_type::I8 => MetadataValue::I8(reader.read_i8()?),
        value_type::U16 => MetadataValue::U16(reader.read_u16::<LittleEndian>()?),
        value_type::I16 => MetadataValue::I16(reader.read_i16::<LittleEndian>()?),
        value_type::U32 => MetadataValue::U32(reader.read_u32::<LittleEndian>()?),
        value_type::I32 => MetadataValue::I32(reader.read_i32::<LittleEndian>()?),
        value_type::F32 => MetadataValue::F32(reader.read_f32::<LittleEndian>()?),
        value_type::BOOL => MetadataValue::Bool(reader.read_u8()? != 0),
        value_type::STRING => MetadataValue::String(read_string(reader)?),
        value_type::U64 => MetadataValue::U64(reader.read_u64::<LittleEndian>()?),
        value_type::I64 => MetadataValue::I64(reader.read_i64::<LittleEndian>()?),
        value_type::F64 => MetadataValue::F64(reader.read_f64::<LittleEndian>()?),
        value_type::ARRAY => {
            let element_tag = reader.read_u32::<LittleEndian>()?;
            if element_tag == value_type::ARRAY {
                return Err(LoaderError::InvalidData("nested metadata arrays are not supported".into()));
            }
            let len = read_len(reader, MAX_ARRAY_LEN)?;
            let mut values = Vec::with_capacity(len.min(reader.len()));
            for _ in 0..len {
                values.push(read_value(reader, element_tag)?);
            }
            MetadataValue::Array(values)
        }
        other => return Err(LoaderError::UnknownValueType(other)),
    })
}

fn read_tensor_info(reader: &mut &[u8]) -> Result<TensorInfo, LoaderError> {
    let name = read_string(reader)?;
    let n_dims = reader.read_u32::<LittleEndian>()? as usize;
    if n_dims > MAX_DIMS {
        return Err(LoaderError::InvalidData(format!("tensor '{name}' has {n_dims} dimensions")));
    }
    let mut shape = Vec::with_capacity(n_dims);
    for _ in 0..n_dims {
        shape.push(read_len(reader, usize::MAX)?);
    }
    // Stored innermost first.
    shape.reverse();
    let dtype = GgufDtype::from_u32(reader.read_u32::<LittleEndian>()?);
    let offset = reader.read_u64::<LittleEndian>()?;
    Ok(TensorInfo { name, shape, dtype, offset })
}
