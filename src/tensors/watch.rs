//! Zero-copy watcher factories.
//!
//! Every factory borrows its parent: `watch_*` mutably (the watcher may write
//! through), `view_*` immutably (writes fail with `ReadOnlyWatcher`). Out of
//! range parameters are programming errors and panic.
//!
//! ```rust
//! use ember_ai::tensors::{Tensor, Tensor3D};
//!
//! let mut volume = Tensor3D::new(2, 2, 3);
//! volume.watch_depth(1).set_at(0, 1, 5.0).unwrap();
//! assert_eq!(volume.get_at(0, 1, 1).unwrap(), 5.0);
//! ```

use super::{Layout, Tensor, Tensor2D, Tensor3D};

/// A rectangular, optionally strided sub-window of a matrix.
///
/// Rows `row, row + (1 + skip_rows), …` and the matching columns are
/// selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub row: usize,
    pub col: usize,
    pub rows: usize,
    pub cols: usize,
    pub skip_rows: usize,
    pub skip_cols: usize,
}

impl Window {
    /// Dense `rows × cols` window with its top-left corner at `(row, col)`.
    pub const fn new(row: usize, col: usize, rows: usize, cols: usize) -> Self {
        Self {
            row,
            col,
            rows,
            cols,
            skip_rows: 0,
            skip_cols: 0,
        }
    }

    /// Leaves `skip_rows` rows and `skip_cols` columns out between selected ones.
    pub const fn skipping(mut self, skip_rows: usize, skip_cols: usize) -> Self {
        self.skip_rows = skip_rows;
        self.skip_cols = skip_cols;
        self
    }

    /// Layout and memory offset of the window inside `parent`.
    fn resolve(&self, parent: Layout) -> (Layout, usize) {
        assert!(self.rows > 0 && self.cols > 0, "empty window");
        let last_row = self.row + (self.rows - 1) * (1 + self.skip_rows);
        let last_col = self.col + (self.cols - 1) * (1 + self.skip_cols);
        assert!(
            last_row < parent.rows && last_col < parent.cols,
            "window {self:?} does not fit in {}×{}",
            parent.rows,
            parent.cols
        );

        let layout = Layout {
            rows: self.rows,
            cols: self.cols,
            depth: 1,
            row_stride: parent.row_stride * (1 + self.skip_rows),
            col_stride: parent.col_stride * (1 + self.skip_cols),
            plane_stride: self.rows * self.cols,
        };
        (layout, parent.index(self.row, self.col, 0))
    }
}

impl Tensor2D<'_> {
    /// Writable watcher over a sub-window.
    ///
    /// # Panics
    /// If the window, including its skips, does not fit.
    pub fn watch_window(&mut self, window: Window) -> Tensor2D<'_> {
        let (layout, offset) = window.resolve(self.layout());
        let span = layout.span();
        let memory = self.memory_mut().watch(offset, span);
        Tensor2D::from_memory(layout, memory)
    }

    /// Read-only watcher over a sub-window.
    pub fn view_window(&self, window: Window) -> Tensor2D<'_> {
        let (layout, offset) = window.resolve(self.layout());
        Tensor2D::from_memory(layout, self.memory().view(offset, layout.span()))
    }

    /// The matrix as a depth-1 rank-3 tensor, sharing storage.
    ///
    /// # Panics
    /// If this matrix is a strided window.
    pub fn watch_as_3d(&mut self) -> Tensor3D<'_> {
        let layout = self.packed_3d_layout();
        let memory = self.memory_mut().watch(0, layout.size());
        Tensor3D::from_memory(layout, memory)
    }

    /// Read-only depth-1 rank-3 view.
    pub fn view_as_3d(&self) -> Tensor3D<'_> {
        let layout = self.packed_3d_layout();
        Tensor3D::from_memory(layout, self.memory().view(0, layout.size()))
    }

    fn packed_3d_layout(&self) -> Layout {
        let layout = self.layout();
        assert!(layout.is_contiguous(), "strided windows cannot be reinterpreted as 3D");
        Layout::contiguous(layout.rows, layout.cols, 1)
    }
}

impl Tensor3D<'_> {
    /// Writable watcher over plane `depth`.
    ///
    /// # Panics
    /// If `depth` is out of range.
    pub fn watch_depth(&mut self, depth: usize) -> Tensor2D<'_> {
        assert!(depth < self.depth(), "depth {depth} out of range for {}", self.depth());
        let plane = self.rows() * self.cols();
        let layout = Layout::contiguous(self.rows(), self.cols(), 1);
        let memory = self.memory_mut().watch(depth * plane, plane);
        Tensor2D::from_memory(layout, memory)
    }

    /// Read-only watcher over plane `depth`.
    pub fn view_depth(&self, depth: usize) -> Tensor2D<'_> {
        assert!(depth < self.depth(), "depth {depth} out of range for {}", self.depth());
        let plane = self.rows() * self.cols();
        let layout = Layout::contiguous(self.rows(), self.cols(), 1);
        Tensor2D::from_memory(layout, self.memory().view(depth * plane, plane))
    }

    /// Writable watcher over planes `from..from + count`.
    ///
    /// # Panics
    /// If the range exceeds the depth.
    pub fn watch_depths(&mut self, from: usize, count: usize) -> Tensor3D<'_> {
        assert!(
            from + count <= self.depth(),
            "depth range {from}..{} out of range for {}",
            from + count,
            self.depth()
        );
        let plane = self.rows() * self.cols();
        let layout = Layout::contiguous(self.rows(), self.cols(), count);
        let memory = self.memory_mut().watch(from * plane, count * plane);
        Tensor3D::from_memory(layout, memory)
    }

    /// Read-only watcher over planes `from..from + count`.
    pub fn view_depths(&self, from: usize, count: usize) -> Tensor3D<'_> {
        assert!(
            from + count <= self.depth(),
            "depth range {from}..{} out of range for {}",
            from + count,
            self.depth()
        );
        let plane = self.rows() * self.cols();
        let layout = Layout::contiguous(self.rows(), self.cols(), count);
        Tensor3D::from_memory(layout, self.memory().view(from * plane, count * plane))
    }
}
