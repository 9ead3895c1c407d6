//! Tensor table access for vellum.
//!
//! A [`TensorTable`] maps tensor names to shapes and element data, alongside a
//! [`Metadata`] map of model hyperparameters. [`GgufFile`] reads GGUF files
//! through a memory map; [`MemoryTensorTable`] is an in-memory table used for
//! synthetic models.

pub mod error;
pub mod gguf;
pub mod memory;
pub mod metadata;
pub mod tensor;

pub use error::LoaderError;
pub use gguf::{GgufFile, GgufWriter};
pub use memory::MemoryTensorTable;
pub use metadata::{Metadata, MetadataValue};
pub use tensor::{GgufDtype, TensorInfo, widen_to_f32};

/// Read access to a named collection of tensors plus model metadata.
pub trait TensorTable {
    fn metadata(&self) -> &Metadata;

    fn tensor_info(&self, name: &str) -> Option<&TensorInfo>;

    /// Names of every tensor, in file order.
    fn tensor_names(&self) -> Vec<&str>;

    /// Element data widened to `f32`. Quantized encodings are rejected.
    fn tensor_f32(&self, name: &str) -> Result<Vec<f32>, LoaderError>;

    fn has_tensor(&self, name: &str) -> bool {
        self.tensor_info(name).is_some()
    }

    /// Like [`TensorTable::tensor_info`] but a missing tensor is an error.
    fn require_tensor(&self, name: &str) -> Result<&TensorInfo, LoaderError> {
        self.tensor_info(name).ok_or_else(|| LoaderError::TensorNotFound(name.to_string()))
    }
}
