pub mod dispatch;
pub mod dtype;

pub use dispatch::{DispatchConfig, GridSize, ThreadgroupSize};
pub use dtype::{Dtype, SlotElement};
