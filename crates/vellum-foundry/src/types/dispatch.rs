//! Dispatch geometry.
//!
//! A dispatch is a grid of threadgroups; each threadgroup is a fixed block of
//! threads. Operators declare their threadgroup shape once and derive the grid
//! from the current extent with ceiling division.

/// Number of threadgroups along each axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GridSize {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl GridSize {
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self { width, height, depth }
    }

    pub const fn d1(width: usize) -> Self {
        Self::new(width, 1, 1)
    }

    pub const fn d2(width: usize, height: usize) -> Self {
        Self::new(width, height, 1)
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }
}

/// Threads per threadgroup along each axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ThreadgroupSize {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl ThreadgroupSize {
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self { width, height, depth }
    }

    pub const fn d1(width: usize) -> Self {
        Self::new(width, 1, 1)
    }

    pub const fn d2(width: usize, height: usize) -> Self {
        Self::new(width, height, 1)
    }

    pub const fn threads(&self) -> usize {
        self.width * self.height * self.depth
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DispatchConfig {
    pub grid: GridSize,
    pub group: ThreadgroupSize,
}

impl DispatchConfig {
    pub const fn new(grid: GridSize, group: ThreadgroupSize) -> Self {
        Self { grid, group }
    }

    /// Smallest grid of `group`-shaped threadgroups covering `extent` threads.
    pub const fn covering(extent: (usize, usize, usize), group: ThreadgroupSize) -> Self {
        Self {
            grid: GridSize::new(
                extent.0.div_ceil(group.width),
                extent.1.div_ceil(group.height),
                extent.2.div_ceil(group.depth),
            ),
            group,
        }
    }

    /// Global thread extent launched along each axis.
    pub const fn threads(&self) -> (usize, usize, usize) {
        (
            self.grid.width * self.group.width,
            self.grid.height * self.group.height,
            self.grid.depth * self.group.depth,
        )
    }

    pub fn grid_tuple(&self) -> (u32, u32, u32) {
        (self.grid.width as u32, self.grid.height as u32, self.grid.depth as u32)
    }

    pub fn group_tuple(&self) -> (u32, u32, u32) {
        (self.group.width as u32, self.group.height as u32, self.group.depth as u32)
    }
}

#[cfg(target_os = "macos")]
mod mtl {
    use objc2_metal::MTLSize;

    use super::{GridSize, ThreadgroupSize};

    impl From<GridSize> for MTLSize {
        fn from(g: GridSize) -> Self {
            MTLSize {
                width: g.width,
                height: g.height,
                depth: g.depth,
            }
        }
    }

    impl From<ThreadgroupSize> for MTLSize {
        fn from(t: ThreadgroupSize) -> Self {
            MTLSize {
                width: t.width,
                height: t.height,
                depth: t.depth,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covering_rounds_up_per_axis() {
        let config = DispatchConfig::covering((10, 65, 1), ThreadgroupSize::new(4, 64, 1));
        assert_eq!(config.grid, GridSize::new(3, 2, 1));
        assert_eq!(config.threads(), (12, 128, 1));
    }

    #[test]
    fn exact_multiples_do_not_overshoot() {
        let config = DispatchConfig::covering((256, 1, 1), ThreadgroupSize::d1(256));
        assert_eq!(config.grid, GridSize::d1(1));
    }

    #[test]
    fn zero_extent_is_an_empty_grid() {
        let config = DispatchConfig::covering((0, 4, 1), ThreadgroupSize::d1(32));
        assert!(config.grid.is_empty());
    }
}
