//! In-memory tensor table.

use rustc_hash::FxHashMap;

use crate::{
    LoaderError, TensorTable, metadata::Metadata, tensor::{GgufDtype, TensorInfo, checked_element_count}
};

/// Tensor table held entirely in memory as `f32`.
#[derive(Debug, Default)]
pub struct MemoryTensorTable {
    metadata: Metadata,
    order: Vec<String>,
    tensors: FxHashMap<String, (TensorInfo, Vec<f32>)>,
}

impl MemoryTensorTable {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Insert or replace a tensor. `shape` is outer-to-inner and must match `data.len()`.
    pub fn insert(&mut self, name: impl Into<String>, shape: &[usize], data: Vec<f32>) -> Result<(), LoaderError> {
        let name = name.into();
        let expected = checked_element_count(&name, shape)?;
        if expected != data.len() {
            return Err(LoaderError::ElementCount {
                name,
                shape: shape.to_vec(),
                expected,
                actual: data.len(),
            });
        }
        let info = TensorInfo {
            name: name.clone(),
            shape: shape.to_vec(),
            dtype: GgufDtype::F32,
            offset: 0,
        };
        if self.tensors.insert(name.clone(), (info, data)).is_none() {
            self.order.push(name);
        }
        Ok(())
    }
}

impl TensorTable for MemoryTensorTable {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn tensor_info(&self, name: &str) -> Option<&TensorInfo> {
        self.tensors.get(name).map(|(info, _)| info)
    }

    fn tensor_names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    fn tensor_f32(&self, name: &str) -> Result<Vec<f32>, LoaderError> {
        self.tensors
            .get(name)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| LoaderError::TensorNotFound(name.to_string()))
    }
}
