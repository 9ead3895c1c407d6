//! Tensor slots and the binding graph.
//!
//! Every activation and weight lives in a slot. Buffer-backed slots point at a
//! storage entry in the arena; [`SlotGraph::bind_to`] repoints a slot (and
//! everything viewing it) at another slot's storage, freeing its own buffer.
//! Each storage entry has exactly one owner and any number of viewers.

use std::{fmt, sync::Arc};

use smallvec::SmallVec;
use vellum_instrumentation::{MetricEvent, TransferDirection, record_metric};

use crate::{
    FoundryError, backend::{Backend, BufferHandle, Residency}, types::{
        Dtype, SlotElement, dtype::{decode, encode}
    }
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub(crate) u32);

impl SlotId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StorageId(pub(crate) u32);

/// How a slot appears in generated kernel source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotClass {
    /// Small read-only buffer, declared `constant T&`.
    Uniform,
    /// Array buffer, declared `device T*`.
    Storage,
    /// Compile-time constant emitted into the source; never bound.
    Scalar,
}

/// Constant carried by a [`SlotClass::Scalar`] slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScalarValue {
    F32(f32),
    U32(u32),
    I32(i32),
}

impl ScalarValue {
    pub fn dtype(self) -> Dtype {
        match self {
            ScalarValue::F32(_) => Dtype::F32,
            ScalarValue::U32(_) => Dtype::U32,
            ScalarValue::I32(_) => Dtype::I32,
        }
    }

    /// Source literal for the value.
    pub fn literal(self) -> String {
        match self {
            // `{:?}` keeps a decimal point and round-trips the exact value.
            ScalarValue::F32(v) if v.is_finite() => format!("{v:?}f"),
            ScalarValue::F32(v) if v.is_nan() => "NAN".to_string(),
            ScalarValue::F32(v) if v > 0.0 => "INFINITY".to_string(),
            ScalarValue::F32(_) => "-INFINITY".to_string(),
            ScalarValue::U32(v) => format!("{v}u"),
            ScalarValue::I32(v) => v.to_string(),
        }
    }

    fn lane(self) -> [u8; 4] {
        match self {
            ScalarValue::F32(v) => v.to_le_bytes(),
            ScalarValue::U32(v) => v.to_le_bytes(),
            ScalarValue::I32(v) => v.to_le_bytes(),
        }
    }
}

#[derive(Debug)]
struct SlotNode {
    name: String,
    dtype: Dtype,
    class: SlotClass,
    /// Count fixed at construction.
    declared: usize,
    /// Count currently in effect; follows the target after a rebind.
    count: usize,
    storage: Option<StorageId>,
    scalar: Option<ScalarValue>,
}

#[derive(Debug)]
struct StorageEntry {
    buffer: BufferHandle,
    residency: Residency,
    count: usize,
    owner: SlotId,
    viewers: SmallVec<[SlotId; 4]>,
}

/// Arena of slots and the storage they resolve to.
pub struct SlotGraph {
    backend: Arc<dyn Backend>,
    nodes: Vec<SlotNode>,
    storage: Vec<Option<StorageEntry>>,
}

impl SlotGraph {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            nodes: Vec::new(),
            storage: Vec::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Create a buffer-backed slot of `count` zeroed elements.
    pub fn create(&mut self, name: impl Into<String>, dtype: Dtype, count: usize, class: SlotClass, residency: Residency) -> Result<SlotId, FoundryError> {
        let name = name.into();
        if class == SlotClass::Scalar {
            return Err(FoundryError::InvalidOperation(format!("scalar slot '{name}' needs a value")));
        }
        let id = SlotId(self.nodes.len() as u32);
        // Keep at least one lane so empty slots still have something to bind.
        let bytes = count.max(1) * dtype.size_bytes();
        let buffer = self.backend.allocate(bytes, residency)?;
        if residency == Residency::DeviceLocal {
            self.zero_device_buffer(buffer, bytes)?;
        }
        let storage = StorageId(self.storage.len() as u32);
        self.storage.push(Some(StorageEntry {
            buffer,
            residency,
            count,
            owner: id,
            viewers: SmallVec::new(),
        }));
        self.nodes.push(SlotNode {
            name,
            dtype,
            class,
            declared: count,
            count,
            storage: Some(storage),
            scalar: None,
        });
        Ok(id)
    }

    /// Device-local storage slot.
    pub fn storage<T: SlotElement>(&mut self, name: impl Into<String>, count: usize) -> Result<SlotId, FoundryError> {
        self.create(name, T::DTYPE, count, SlotClass::Storage, Residency::DeviceLocal)
    }

    /// Host-visible uniform slot for small per-call parameters.
    pub fn uniform<T: SlotElement>(&mut self, name: impl Into<String>, count: usize) -> Result<SlotId, FoundryError> {
        self.create(name, T::DTYPE, count, SlotClass::Uniform, Residency::HostVisible)
    }

    pub fn scalar(&mut self, name: impl Into<String>, value: ScalarValue) -> SlotId {
        let id = SlotId(self.nodes.len() as u32);
        self.nodes.push(SlotNode {
            name: name.into(),
            dtype: value.dtype(),
            class: SlotClass::Scalar,
            declared: 1,
            count: 1,
            storage: None,
            scalar: Some(value),
        });
        id
    }

    fn node(&self, id: SlotId) -> Result<&SlotNode, FoundryError> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| FoundryError::InvalidOperation(format!("unknown {id}")))
    }

    fn entry(&self, storage: StorageId) -> Result<&StorageEntry, FoundryError> {
        self.storage
            .get(storage.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| FoundryError::InvalidOperation(format!("storage {} was released", storage.0)))
    }

    fn entry_mut(&mut self, storage: StorageId) -> Result<&mut StorageEntry, FoundryError> {
        self.storage
            .get_mut(storage.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| FoundryError::InvalidOperation(format!("storage {} was released", storage.0)))
    }

    pub fn name(&self, id: SlotId) -> &str {
        self.nodes.get(id.index()).map_or("<unknown>", |n| n.name.as_str())
    }

    pub fn dtype(&self, id: SlotId) -> Result<Dtype, FoundryError> {
        self.node(id).map(|n| n.dtype)
    }

    pub fn class(&self, id: SlotId) -> Result<SlotClass, FoundryError> {
        self.node(id).map(|n| n.class)
    }

    /// Element count currently in effect.
    pub fn count(&self, id: SlotId) -> Result<usize, FoundryError> {
        self.node(id).map(|n| n.count)
    }

    pub fn declared_count(&self, id: SlotId) -> Result<usize, FoundryError> {
        self.node(id).map(|n| n.declared)
    }

    pub fn scalar_value(&self, id: SlotId) -> Result<Option<ScalarValue>, FoundryError> {
        self.node(id).map(|n| n.scalar)
    }

    pub fn storage_of(&self, id: SlotId) -> Result<Option<StorageId>, FoundryError> {
        self.node(id).map(|n| n.storage)
    }

    pub fn residency(&self, id: SlotId) -> Result<Residency, FoundryError> {
        let storage = self.require_storage(id)?;
        self.entry(storage).map(|e| e.residency)
    }

    pub fn is_owner(&self, id: SlotId) -> bool {
        self.node(id)
            .ok()
            .and_then(|n| n.storage)
            .and_then(|s| self.entry(s).ok())
            .is_some_and(|e| e.owner == id)
    }

    /// Slots viewing the storage `id` currently resolves to.
    pub fn viewers(&self, id: SlotId) -> Vec<SlotId> {
        self.node(id)
            .ok()
            .and_then(|n| n.storage)
            .and_then(|s| self.entry(s).ok())
            .map(|e| e.viewers.to_vec())
            .unwrap_or_default()
    }

    fn require_storage(&self, id: SlotId) -> Result<StorageId, FoundryError> {
        self.node(id)?
            .storage
            .ok_or_else(|| FoundryError::UnboundSlot(self.name(id).to_string()))
    }

    /// Buffer a slot resolves to for binding.
    pub fn resolve(&self, id: SlotId) -> Result<BufferHandle, FoundryError> {
        let storage = self.require_storage(id)?;
        self.entry(storage).map(|e| e.buffer)
    }

    fn check_dtype(&self, id: SlotId, actual: Dtype) -> Result<(), FoundryError> {
        let expected = self.node(id)?.dtype;
        if expected != actual {
            return Err(FoundryError::DtypeMismatch { expected, actual });
        }
        Ok(())
    }

    /// Upload `values` into the start of the slot.
    pub fn set_value<T: SlotElement>(&mut self, id: SlotId, values: &[T]) -> Result<(), FoundryError> {
        self.set_value_at(id, 0, values)
    }

    /// Upload `values` starting at element `offset`.
    pub fn set_value_at<T: SlotElement>(&mut self, id: SlotId, offset: usize, values: &[T]) -> Result<(), FoundryError> {
        self.check_dtype(id, T::DTYPE)?;
        if self.node(id)?.class == SlotClass::Scalar {
            return Err(FoundryError::InvalidOperation(format!(
                "scalar slot '{}' is baked into kernel source",
                self.name(id)
            )));
        }
        let storage = self.require_storage(id)?;
        let (buffer, residency) = {
            let entry = self.entry(storage)?;
            (entry.buffer, entry.residency)
        };
        let bytes = encode(values);
        let byte_offset = offset * T::DTYPE.size_bytes();

        match residency {
            Residency::HostVisible => self.backend.write(buffer, byte_offset, &bytes)?,
            Residency::DeviceLocal => {
                let staging = self.backend.allocate(bytes.len(), Residency::HostVisible)?;
                let result = self
                    .backend
                    .write(staging, 0, &bytes)
                    .and_then(|()| self.backend.copy(staging, 0, buffer, byte_offset, bytes.len()));
                self.backend.release(staging);
                result?;
            }
        }

        record_metric!(MetricEvent::SlotTransfer {
            slot: self.name(id).to_string(),
            direction: TransferDirection::Upload,
            bytes: bytes.len() as u64,
            staged: residency == Residency::DeviceLocal,
        });
        Ok(())
    }

    /// Read back every element of the slot.
    pub fn get_value<T: SlotElement>(&self, id: SlotId) -> Result<Vec<T>, FoundryError> {
        let count = self.count(id)?;
        self.get_range(id, 0, count)
    }

    /// Read back `len` elements starting at element `offset`.
    pub fn get_range<T: SlotElement>(&self, id: SlotId, offset: usize, len: usize) -> Result<Vec<T>, FoundryError> {
        self.check_dtype(id, T::DTYPE)?;
        if let Some(value) = self.node(id)?.scalar {
            return Ok(vec![T::from_lane(value.lane())]);
        }
        let storage = self.require_storage(id)?;
        let (buffer, residency) = {
            let entry = self.entry(storage)?;
            (entry.buffer, entry.residency)
        };
        let byte_offset = offset * T::DTYPE.size_bytes();
        let mut bytes = vec![0u8; len * T::DTYPE.size_bytes()];

        match residency {
            Residency::HostVisible => self.backend.read(buffer, byte_offset, &mut bytes)?,
            Residency::DeviceLocal => {
                let staging = self.backend.allocate(bytes.len(), Residency::HostVisible)?;
                let result = self
                    .backend
                    .copy(buffer, byte_offset, staging, 0, bytes.len())
                    .and_then(|()| self.backend.read(staging, 0, &mut bytes));
                self.backend.release(staging);
                result?;
            }
        }

        record_metric!(MetricEvent::SlotTransfer {
            slot: self.name(id).to_string(),
            direction: TransferDirection::Download,
            bytes: bytes.len() as u64,
            staged: residency == Residency::DeviceLocal,
        });
        Ok(decode(&bytes))
    }

    /// Alias `caller` onto `target`'s storage.
    ///
    /// The caller's own buffer is destroyed if it owned one, and every slot
    /// viewing the caller follows it onto the target. The caller adopts the
    /// target's element count.
    pub fn bind_to(&mut self, caller: SlotId, target: SlotId) -> Result<(), FoundryError> {
        let target_dtype = self.node(target)?.dtype;
        self.check_dtype(caller, target_dtype)?;
        if self.node(caller)?.class == SlotClass::Scalar || self.node(target)?.class == SlotClass::Scalar {
            return Err(FoundryError::InvalidOperation(format!(
                "cannot bind '{}' to '{}': scalar slots have no storage",
                self.name(caller),
                self.name(target)
            )));
        }
        let target_storage = self.require_storage(target)?;
        let caller_storage = self.node(caller)?.storage;
        if caller_storage == Some(target_storage) {
            return Ok(());
        }
        let target_count = self.entry(target_storage)?.count;

        let mut moved: SmallVec<[SlotId; 4]> = SmallVec::new();
        moved.push(caller);
        if let Some(old) = caller_storage {
            let entry = self.entry(old)?;
            if entry.owner == caller {
                // The caller's viewers lose their storage along with the caller.
                moved.extend(entry.viewers.iter().copied());
                if let Some(freed) = self.storage[old.0 as usize].take() {
                    self.backend.release(freed.buffer);
                }
            } else {
                self.entry_mut(old)?.viewers.retain(|v| *v != caller);
            }
        }

        for id in &moved {
            let node = &mut self.nodes[id.index()];
            node.storage = Some(target_storage);
            node.count = target_count;
        }
        let entry = self.entry_mut(target_storage)?;
        for id in moved {
            if id != entry.owner && !entry.viewers.contains(&id) {
                entry.viewers.push(id);
            }
        }
        Ok(())
    }

    /// Device copy between two independent slots.
    ///
    /// Copies `min(count(src), count(dst))` elements from the start of `src`.
    pub fn transfer(&mut self, src: SlotId, dst: SlotId) -> Result<(), FoundryError> {
        let dtype = self.node(src)?.dtype;
        self.check_dtype(dst, dtype)?;
        let src_storage = self.require_storage(src)?;
        let dst_storage = self.require_storage(dst)?;
        if src_storage == dst_storage {
            return Ok(());
        }
        let src_count = self.count(src)?;
        let dst_count = self.count(dst)?;
        let elements = if src_count > dst_count { dst_count } else { src_count };
        let bytes = elements * dtype.size_bytes();
        let (src_buf, dst_buf) = (self.entry(src_storage)?.buffer, self.entry(dst_storage)?.buffer);
        self.backend.copy(src_buf, 0, dst_buf, 0, bytes)?;

        record_metric!(MetricEvent::SlotTransfer {
            slot: format!("{}->{}", self.name(src), self.name(dst)),
            direction: TransferDirection::DeviceCopy,
            bytes: bytes as u64,
            staged: false,
        });
        Ok(())
    }

    fn zero_device_buffer(&self, buffer: BufferHandle, bytes: usize) -> Result<(), FoundryError> {
        let staging = self.backend.allocate(bytes, Residency::HostVisible)?;
        let result = self
            .backend
            .write(staging, 0, &vec![0u8; bytes])
            .and_then(|()| self.backend.copy(staging, 0, buffer, 0, bytes));
        self.backend.release(staging);
        result
    }
}

impl Drop for SlotGraph {
    fn drop(&mut self) {
        for entry in self.storage.iter_mut().filter_map(Option::take) {
            self.backend.release(entry.buffer);
        }
    }
}

#[cfg(test)]
#[path = "slot.test.rs"]
mod tests;
