//! GGUF container format.
//!
//! Layout: magic `GGUF`, version, tensor count, metadata count, metadata
//! entries, tensor descriptors, then a data section aligned to
//! `general.alignment` (default 32). Dimensions are stored innermost first.

mod file;
mod writer;

pub use file::GgufFile;
pub use writer::GgufWriter;

pub(crate) const MAGIC: &[u8; 4] = b"GGUF";
pub(crate) const DEFAULT_ALIGNMENT: usize = 32;

/// Metadata value type tags.
pub(crate) mod value_type {
    pub const U8: u32 = 0;
    pub const I8: u32 = 1;
    pub const U16: u32 = 2;
    pub const I16: u32 = 3;
    pub const U32: u32 = 4;
    pub const I32: u32 = 5;
    pub const F32: u32 = 6;
    pub const BOOL: u32 = 7;
    pub const STRING: u32 = 8;
    pub const ARRAY: u32 = 9;
    pub const U64: u32 = 10;
    pub const I64: u32 = 11;
    pub const F64: u32 = 12;
}
