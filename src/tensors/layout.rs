//! Logical-to-physical addressing.

use crate::device::Extent;

/// Shape and strides of a tensor inside its memory.
///
/// Owned tensors are always contiguous. Watchers created over a window may
/// carry larger row/column strides to skip elements of their parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub rows: usize,
    pub cols: usize,
    pub depth: usize,
    pub row_stride: usize,
    pub col_stride: usize,
    pub plane_stride: usize,
}

impl Layout {
    /// Row-major, depth-major packing with no gaps.
    pub const fn contiguous(rows: usize, cols: usize, depth: usize) -> Self {
        Self {
            rows,
            cols,
            depth,
            row_stride: cols,
            col_stride: 1,
            plane_stride: rows * cols,
        }
    }

    pub const fn size(&self) -> usize {
        self.rows * self.cols * self.depth
    }

    pub const fn extent(&self) -> Extent {
        Extent::new(self.rows, self.cols, self.depth)
    }

    /// Buffer offset of `(row, col, depth)`.
    #[inline]
    pub const fn index(&self, row: usize, col: usize, depth: usize) -> usize {
        row * self.row_stride + col * self.col_stride + depth * self.plane_stride
    }

    /// Logical coordinates of the `i`-th element in traversal order.
    ///
    /// Traversal walks columns, then rows, then planes.
    #[inline]
    pub const fn coords(&self, i: usize) -> (usize, usize, usize) {
        let plane = self.rows * self.cols;
        let d = i / plane;
        let rem = i % plane;
        (rem / self.cols, rem % self.cols, d)
    }

    /// Buffer offset of the `i`-th element in traversal order.
    ///
    /// This is the only correct way to iterate a possibly strided tensor.
    #[inline]
    pub const fn traverse_to(&self, i: usize) -> usize {
        let (r, c, d) = self.coords(i);
        self.index(r, c, d)
    }

    /// Whether traversal order matches buffer order.
    pub const fn is_contiguous(&self) -> bool {
        (self.cols <= 1 || self.col_stride == 1)
            && (self.rows <= 1 || self.row_stride == self.cols)
            && (self.depth <= 1 || self.plane_stride == self.rows * self.cols)
    }

    /// Floats between the first and the last addressed element, inclusive.
    pub const fn span(&self) -> usize {
        if self.size() == 0 {
            0
        } else {
            self.index(self.rows - 1, self.cols - 1, self.depth - 1) + 1
        }
    }
}

/// Read-only host floats addressed through a [`Layout`].
#[derive(Debug, Clone, Copy)]
pub struct Grid<'s> {
    data: &'s [f32],
    layout: Layout,
}

impl<'s> Grid<'s> {
    /// # Panics
    /// If `layout` addresses past the end of `data`.
    pub fn new(data: &'s [f32], layout: Layout) -> Self {
        assert!(
            layout.span() <= data.len(),
            "layout spans {} floats but buffer holds {}",
            layout.span(),
            data.len()
        );
        Self { data, layout }
    }

    /// Densely packed floats of the given extent.
    pub fn packed(data: &'s [f32], extent: Extent) -> Self {
        Self::new(data, Layout::contiguous(extent.rows, extent.cols, extent.depth))
    }

    #[inline]
    pub fn at(&self, row: usize, col: usize, depth: usize) -> f32 {
        self.data[self.layout.index(row, col, depth)]
    }

    /// `i`-th element in traversal order.
    #[inline]
    pub fn traversed(&self, i: usize) -> f32 {
        self.data[self.layout.traverse_to(i)]
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn extent(&self) -> Extent {
        self.layout.extent()
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_of_strided_window() {
        // 2×2 window with one skipped row and column inside a 4×4 buffer
        let layout = Layout {
            rows: 2,
            cols: 2,
            depth: 1,
            row_stride: 8,
            col_stride: 2,
            plane_stride: 4,
        };
        let offsets: Vec<usize> = (0..4).map(|i| layout.traverse_to(i)).collect();
        assert_eq!(offsets, vec![0, 2, 8, 10]);
        assert!(!layout.is_contiguous());
        assert_eq!(layout.span(), 11);
    }

    #[test]
    fn contiguous_traversal_is_identity() {
        let layout = Layout::contiguous(3, 4, 2);
        assert!(layout.is_contiguous());
        assert!((0..layout.size()).all(|i| layout.traverse_to(i) == i));
        assert_eq!(layout.coords(13), (0, 1, 1));
    }

    #[test]
    fn single_row_window_is_contiguous() {
        let layout = Layout {
            rows: 1,
            cols: 3,
            depth: 1,
            row_stride: 10,
            col_stride: 1,
            plane_stride: 3,
        };
        assert!(layout.is_contiguous());
    }
}
