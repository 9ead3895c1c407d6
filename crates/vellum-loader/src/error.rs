use crate::tensor::GgufDtype;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a GGUF file (magic {0:?})")]
    InvalidMagic([u8; 4]),
    #[error("unsupported GGUF version {0}")]
    UnsupportedVersion(u32),
    #[error("malformed GGUF data: {0}")]
    InvalidData(String),
    #[error("unknown metadata value type {0}")]
    UnknownValueType(u32),
    #[error("tensor '{0}' not found")]
    TensorNotFound(String),
    #[error("tensor '{name}' uses unsupported encoding {dtype:?}")]
    UnsupportedDtype { name: String, dtype: GgufDtype },
    #[error("tensor '{name}' spans bytes {start}..{end} beyond file length {len}")]
    OutOfBounds { name: String, start: usize, end: usize, len: usize },
    #[error("tensor '{name}' has {actual} elements, shape {shape:?} requires {expected}")]
    ElementCount {
        name: String,
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
}
