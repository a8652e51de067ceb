use std::fmt;

use super::{Layout, Tensor, parse_values, relocate};
use crate::error::{Error, Result};
use crate::memory::{Buffer, Memory, Placement, Watched};

/// A rows × cols matrix of `f32`.
///
/// `Tensor2D<'static>` owns its storage; shorter lifetimes belong to
/// watchers borrowed from another tensor.
pub struct Tensor2D<'a> {
    layout: Layout,
    memory: Memory<'a>,
}

impl Tensor2D<'static> {
    /// Zero-filled host matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, 0.0)
    }

    /// Host matrix with every element set to `value`.
    pub fn filled(rows: usize, cols: usize, value: f32) -> Self {
        Self::from_buffer(rows, cols, Buffer::Host(vec![value; rows * cols]))
    }

    /// Matrix with every element set to `value` in the requested placement.
    pub fn filled_on(rows: usize, cols: usize, value: f32, placement: Placement) -> Result<Self> {
        Ok(Self::from_buffer(
            rows,
            cols,
            Buffer::filled(rows * cols, value, placement)?,
        ))
    }

    /// Host matrix with `f(row, col)` at every position.
    pub fn from_fn(rows: usize, cols: usize, f: impl Fn(usize, usize) -> f32) -> Self {
        let data = (0..rows * cols).map(|i| f(i / cols, i % cols)).collect();
        Self::from_buffer(rows, cols, Buffer::Host(data))
    }

    /// Host matrix over row-major `data`.
    ///
    /// # Panics
    /// If `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), rows * cols, "data length does not match {rows}×{cols}");
        Self::from_buffer(rows, cols, Buffer::Host(data))
    }

    /// Copies row-major `data` into the requested placement.
    pub fn from_slice(rows: usize, cols: usize, data: &[f32], placement: Placement) -> Result<Self> {
        assert_eq!(data.len(), rows * cols, "data length does not match {rows}×{cols}");
        Ok(Self::from_buffer(rows, cols, Buffer::from_slice(data, placement)?))
    }

    /// Parses whitespace-separated values as produced by [`Tensor::to_text`].
    pub fn from_text(rows: usize, cols: usize, text: &str) -> Result<Self> {
        Ok(Self::from_vec(rows, cols, parse_values(text, rows * cols)?))
    }

    /// Wraps a densely packed owned buffer.
    pub(crate) fn from_buffer(rows: usize, cols: usize, buffer: Buffer) -> Self {
        Self {
            layout: Layout::contiguous(rows, cols, 1),
            memory: Memory::Owned(buffer),
        }
    }
}

impl<'a> Tensor2D<'a> {
    /// Writable watcher over caller-owned row-major memory.
    pub fn watch(rows: usize, cols: usize, data: &'a mut [f32]) -> Self {
        assert_eq!(data.len(), rows * cols, "data length does not match {rows}×{cols}");
        Self::from_memory(Layout::contiguous(rows, cols, 1), Memory::Watching(Watched::Host(data)))
    }

    /// Read-only watcher over caller-owned row-major memory.
    pub fn view(rows: usize, cols: usize, data: &'a [f32]) -> Self {
        assert_eq!(data.len(), rows * cols, "data length does not match {rows}×{cols}");
        Self::from_memory(
            Layout::contiguous(rows, cols, 1),
            Memory::Watching(Watched::HostReadOnly(data)),
        )
    }

    pub(crate) fn from_memory(layout: Layout, memory: Memory<'a>) -> Self {
        debug_assert_eq!(layout.depth, 1);
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

    /// Element at `(row, col)`.
    ///
    /// # Errors
    /// [`Error::DataOnDevice`] when the matrix is on device.
    ///
    /// # Panics
    /// If the coordinates are out of range.
    pub fn get_at(&self, row: usize, col: usize) -> Result<f32> {
        assert!(row < self.rows() && col < self.cols(), "({row}, {col}) out of range");
        Ok(self.memory.host()?[self.layout.index(row, col, 0)])
    }

    /// Sets the element at `(row, col)`.
    ///
    /// # Errors
    /// [`Error::DataOnDevice`] on device, [`Error::ReadOnlyWatcher`] for views.
    pub fn set_at(&mut self, row: usize, col: usize, value: f32) -> Result<()> {
        assert!(row < self.rows() && col < self.cols(), "({row}, {col}) out of range");
        let idx = self.layout.index(row, col, 0);
        self.memory.host_mut()?[idx] = value;
        Ok(())
    }

    /// Deep, densely packed copy in the same placement.
    pub fn try_clone(&self) -> Result<Tensor2D<'static>> {
        Ok(Tensor2D::from_buffer(self.rows(), self.cols(), self.copy_buffer()?))
    }

    /// Moves the storage to the installed accelerator. No-op if already there.
    ///
    /// # Errors
    /// [`Error::WatcherPlacement`] for watchers.
    pub fn to_device(&mut self) -> Result<()> {
        relocate(&mut self.memory, Placement::Device)
    }

    /// Moves the storage to host memory. No-op if already there.
    ///
    /// # Errors
    /// [`Error::WatcherPlacement`] for watchers.
    pub fn to_host(&mut self) -> Result<()> {
        relocate(&mut self.memory, Placement::Host)
    }

    /// Host-side row-major rows, mainly for assertions.
    pub fn to_rows(&self) -> Result<Vec<Vec<f32>>> {
        let values = self.to_vec()?;
        Ok(values.chunks(self.cols().max(1)).map(<[f32]>::to_vec).collect())
    }
}

impl Tensor for Tensor2D<'_> {
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
        2
    }
}

impl fmt::Debug for Tensor2D<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Tensor2D");
        s.field("rows", &self.rows())
            .field("cols", &self.cols())
            .field("placement", &self.placement())
            .field("watcher", &self.is_watcher());
        match self.to_vec() {
            Ok(values) => s.field("data", &values),
            Err(Error::DataOnDevice) => s.field("data", &"<device>"),
            Err(_) => s.field("data", &"<unavailable>"),
        };
        s.finish()
    }
}

impl PartialEq for Tensor2D<'_> {
    /// Shapes and host values are equal. Device tensors never compare equal.
    fn eq(&self, other: &Self) -> bool {
        if self.rows() != other.rows() || self.cols() != other.cols() {
            return false;
        }
        match (self.to_vec(), other.to_vec()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}
