use std::fmt;

use super::{Layout, Tensor, parse_values, relocate};
use crate::error::{Error, Result};
use crate::memory::{Buffer, Memory, Placement, Watched};

/// A rows × cols × depth block of `f32`, stored plane after plane.
///
/// Rank-3 tensors are always densely packed: depth slices and depth ranges
/// are contiguous sub-blocks of their parent.
pub struct Tensor3D<'a> {
    layout: Layout,
    memory: Memory<'a>,
}

impl Tensor3D<'static> {
    /// Zero-filled host tensor.
    pub fn new(rows: usize, cols: usize, depth: usize) -> Self {
        Self::filled(rows, cols, depth, 0.0)
    }

    /// Host tensor with every element set to `value`.
    pub fn filled(rows: usize, cols: usize, depth: usize, value: f32) -> Self {
        Self::from_buffer(rows, cols, depth, Buffer::Host(vec![value; rows * cols * depth]))
    }

    /// Tensor with every element set to `value` in the requested placement.
    pub fn filled_on(
        rows: usize,
        cols: usize,
        depth: usize,
        value: f32,
        placement: Placement,
    ) -> Result<Self> {
        let buffer = Buffer::filled(rows * cols * depth, value, placement)?;
        Ok(Self::from_buffer(rows, cols, depth, buffer))
    }

    /// Host tensor with `f(row, col, depth)` at every position.
    pub fn from_fn(
        rows: usize,
        cols: usize,
        depth: usize,
        f: impl Fn(usize, usize, usize) -> f32,
    ) -> Self {
        let layout = Layout::contiguous(rows, cols, depth);
        let data = (0..layout.size())
            .map(|i| {
                let (r, c, d) = layout.coords(i);
                f(r, c, d)
            })
            .collect();
        Self::from_buffer(rows, cols, depth, Buffer::Host(data))
    }

    /// Host tensor over depth-major, row-major `data`.
    ///
    /// # Panics
    /// If `data.len() != rows * cols * depth`.
    pub fn from_vec(rows: usize, cols: usize, depth: usize, data: Vec<f32>) -> Self {
        assert_eq!(
            data.len(),
            rows * cols * depth,
            "data length does not match {rows}×{cols}×{depth}"
        );
        Self::from_buffer(rows, cols, depth, Buffer::Host(data))
    }

    /// Copies packed `data` into the requested placement.
    pub fn from_slice(
        rows: usize,
        cols: usize,
        depth: usize,
        data: &[f32],
        placement: Placement,
    ) -> Result<Self> {
        assert_eq!(
            data.len(),
            rows * cols * depth,
            "data length does not match {rows}×{cols}×{depth}"
        );
        Ok(Self::from_buffer(rows, cols, depth, Buffer::from_slice(data, placement)?))
    }

    /// Parses whitespace-separated values as produced by [`Tensor::to_text`].
    pub fn from_text(rows: usize, cols: usize, depth: usize, text: &str) -> Result<Self> {
        let values = parse_values(text, rows * cols * depth)?;
        Ok(Self::from_vec(rows, cols, depth, values))
    }

    pub(crate) fn from_buffer(rows: usize, cols: usize, depth: usize, buffer: Buffer) -> Self {
        Self {
            layout: Layout::contiguous(rows, cols, depth),
            memory: Memory::Owned(buffer),
        }
    }
}

impl<'a> Tensor3D<'a> {
    /// Writable watcher over caller-owned packed memory.
    pub fn watch(rows: usize, cols: usize, depth: usize, data: &'a mut [f32]) -> Self {
        assert_eq!(data.len(), rows * cols * depth, "data length does not match shape");
        Self::from_memory(
            Layout::contiguous(rows, cols, depth),
            Memory::Watching(Watched::Host(data)),
        )
    }

    /// Read-only watcher over caller-owned packed memory.
    pub fn view(rows: usize, cols: usize, depth: usize, data: &'a [f32]) -> Self {
        assert_eq!(data.len(), rows * cols * depth, "data length does not match shape");
        Self::from_memory(
            Layout::contiguous(rows, cols, depth),
            Memory::Watching(Watched::HostReadOnly(data)),
        )
    }

    pub(crate) fn from_memory(layout: Layout, memory: Memory<'a>) -> Self {
        debug_assert!(layout.is_contiguous());
        debug_assert!(layout.span() <= memory.len());
        Self { layout, memory }
    }

    pub(super) fn memory_mut(&mut self) -> &mut Memory<'a> {
        &mut self.memory
    }

    pub fn rows(&self) -> usize {
        self.layout.rows
    }

    pub fn cols(&self) -> usize {
        self.layout.cols
    }

    pub fn depth(&self) -> usize {
        self.layout.depth
    }

    /// Element at `(row, col, depth)`.
    ///
    /// # Errors
    /// [`Error::DataOnDevice`] when the tensor is on device.
    pub fn get_at(&self, row: usize, col: usize, depth: usize) -> Result<f32> {
        assert!(
            row < self.rows() && col < self.cols() && depth < self.depth(),
            "({row}, {col}, {depth}) out of range"
        );
        Ok(self.memory.host()?[self.layout.index(row, col, depth)])
    }

    /// Sets the element at `(row, col, depth)`.
    pub fn set_at(&mut self, row: usize, col: usize, depth: usize, value: f32) -> Result<()> {
        assert!(
            row < self.rows() && col < self.cols() && depth < self.depth(),
            "({row}, {col}, {depth}) out of range"
        );
        let idx = self.layout.index(row, col, depth);
        self.memory.host_mut()?[idx] = value;
        Ok(())
    }

    /// Deep copy in the same placement.
    pub fn try_clone(&self) -> Result<Tensor3D<'static>> {
        Ok(Tensor3D::from_buffer(
            self.rows(),
            self.cols(),
            self.depth(),
            self.copy_buffer()?,
        ))
    }

    /// Moves the storage to the installed accelerator. No-op if already there.
    pub fn to_device(&mut self) -> Result<()> {
        relocate(&mut self.memory, Placement::Device)
    }

    /// Moves the storage to host memory. No-op if already there.
    pub fn to_host(&mut self) -> Result<()> {
        relocate(&mut self.memory, Placement::Host)
    }
}

impl Tensor for Tensor3D<'_> {
    fn layout(&self) -> Layout {
        self.layout
    }

    fn memory(&self) -> &Memory<'_> {
        &self.memory
    }

    fn host_data_mut(&mut self) -> Result<&mut [f32]> {
        self.memory.host_mut()
    }

    fn rank(&self) -> usize {
        3
    }
}

impl fmt::Debug for Tensor3D<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Tensor3D");
        s.field("rows", &self.rows())
            .field("cols", &self.cols())
            .field("depth", &self.depth())
            .field("placement", &self.placement());
        match self.to_vec() {
            Ok(values) => s.field("data", &values),
            Err(Error::DataOnDevice) => s.field("data", &"<device>"),
            Err(_) => s.field("data", &"<unavailable>"),
        };
        s.finish()
    }
}

impl PartialEq for Tensor3D<'_> {
    /// Shapes and host values are equal. Device tensors never compare equal.
    fn eq(&self, other: &Self) -> bool {
        if self.extent() != other.extent() {
            return false;
        }
        match (self.to_vec(), other.to_vec()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}
