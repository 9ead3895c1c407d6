//! Element types visible to kernels.
//!
//! Every kernel works on 32-bit lanes. 64-bit host values are accepted by
//! [`SlotElement`] and narrowed on upload.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dtype {
    F32,
    U32,
    I32,
}

impl Dtype {
    pub const fn size_bytes(self) -> usize {
        4
    }

    /// Metal Shading Language scalar type.
    pub const fn msl_type(self) -> &'static str {
        match self {
            Dtype::F32 => "float",
            Dtype::U32 => "uint",
            Dtype::I32 => "int",
        }
    }
}

/// Host value that can be written into or read from a slot.
pub trait SlotElement: Copy + Send + Sync + 'static {
    /// Device representation.
    const DTYPE: Dtype;

    fn to_lane(self) -> [u8; 4];

    fn from_lane(bytes: [u8; 4]) -> Self;
}

impl SlotElement for f32 {
    const DTYPE: Dtype = Dtype::F32;

    fn to_lane(self) -> [u8; 4] {
        self.to_le_bytes()
    }

    fn from_lane(bytes: [u8; 4]) -> Self {
        f32::from_le_bytes(bytes)
    }
}

impl SlotElement for u32 {
    const DTYPE: Dtype = Dtype::U32;

    fn to_lane(self) -> [u8; 4] {
        self.to_le_bytes()
    }

    fn from_lane(bytes: [u8; 4]) -> Self {
        u32::from_le_bytes(bytes)
    }
}

impl SlotElement for i32 {
    const DTYPE: Dtype = Dtype::I32;

    fn to_lane(self) -> [u8; 4] {
        self.to_le_bytes()
    }

    fn from_lane(bytes: [u8; 4]) -> Self {
        i32::from_le_bytes(bytes)
    }
}

impl SlotElement for f64 {
    const DTYPE: Dtype = Dtype::F32;

    fn to_lane(self) -> [u8; 4] {
        (self as f32).to_le_bytes()
    }

    fn from_lane(bytes: [u8; 4]) -> Self {
        f64::from(f32::from_le_bytes(bytes))
    }
}

impl SlotElement for i64 {
    const DTYPE: Dtype = Dtype::I32;

    fn to_lane(self) -> [u8; 4] {
        (self as i32).to_le_bytes()
    }

    fn from_lane(bytes: [u8; 4]) -> Self {
        i64::from(i32::from_le_bytes(bytes))
    }
}

pub(crate) fn encode<T: SlotElement>(values: &[T]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_lane()).collect()
}

pub(crate) fn decode<T: SlotElement>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let mut lane = [0u8; 4];
            lane.copy_from_slice(chunk);
            T::from_lane(lane)
        })
        .collect()
}
