//! Rank-2 and rank-3 tensors.
//!
//! A tensor is a shape plus a [`Memory`]: owned storage or a watcher over
//! another tensor's storage, on host or on device. [`Tensor2D`] and
//! [`Tensor3D`] share behaviour through the [`Tensor`] trait, which provides
//! placement queries, traversal, in-place transforms and arithmetic.
//!
//! # Placement rules
//!
//! - Element access (`get_at`, `set_at`, `to_vec`, `to_text`) is host-only.
//! - Host closures (`map`, `element_wise`) never run on device memory.
//! - Arithmetic dispatches to the accelerator when both operands are on
//!   device and fails with [`Error::PlacementMismatch`] when they disagree.
//!
//! # Example
//!
//! ```rust
//! use ember_ai::tensor2d;
//! use ember_ai::tensors::Tensor;
//!
//! let mut t = tensor2d!([[1.0, 2.0], [3.0, 4.0]]);
//! t.map(|v| v * 10.0).unwrap();
//! assert_eq!(t.to_vec().unwrap(), vec![10.0, 20.0, 30.0, 40.0]);
//! ```

use std::sync::Arc;

use crate::device::{Accelerator, ArithmeticOp, DeviceSlice, Extent};
use crate::error::{Error, Result};
use crate::memory::{Buffer, DeviceBuffer, Memory, Placement};
use crate::ops::dispatch::same_accelerator;

mod layout;
mod tensor2d;
mod tensor3d;
mod watch;

pub use layout::{Grid, Layout};
pub use tensor2d::Tensor2D;
pub use tensor3d::Tensor3D;
pub use watch::Window;

/// Behaviour shared by every tensor rank.
pub trait Tensor {
    /// Shape and strides.
    fn layout(&self) -> Layout;

    /// Backing storage.
    fn memory(&self) -> &Memory<'_>;

    /// Writable host storage.
    fn host_data_mut(&mut self) -> Result<&mut [f32]>;

    /// 2 for matrices, 3 for volumes.
    fn rank(&self) -> usize;

    /// Number of logical elements.
    fn size(&self) -> usize {
        self.layout().size()
    }

    fn extent(&self) -> Extent {
        self.layout().extent()
    }

    /// Buffer offset of the `i`-th element in traversal order.
    fn traverse_to(&self, i: usize) -> usize {
        self.layout().traverse_to(i)
    }

    fn placement(&self) -> Placement {
        self.memory().placement()
    }

    fn is_on_device(&self) -> bool {
        self.placement() == Placement::Device
    }

    /// Whether the storage is borrowed from another tensor.
    fn is_watcher(&self) -> bool {
        self.memory().is_watcher()
    }

    /// Raw host storage; index it through [`Tensor::traverse_to`].
    fn host_data(&self) -> Result<&[f32]> {
        self.memory().host()
    }

    /// Host storage together with its layout.
    fn grid(&self) -> Result<Grid<'_>> {
        Ok(Grid::new(self.host_data()?, self.layout()))
    }

    /// Accelerator owning this tensor's device memory.
    fn accelerator(&self) -> Option<Arc<dyn Accelerator>> {
        self.memory().device().map(|v| Arc::clone(v.accelerator()))
    }

    /// The device range to hand to an accelerator as an input.
    ///
    /// # Errors
    /// [`Error::PlacementMismatch`] for host tensors,
    /// [`Error::NonContiguousDevice`] for strided views.
    fn device_slice(&self) -> Result<DeviceSlice> {
        let view = self.memory().device().ok_or(Error::PlacementMismatch)?;
        if !self.layout().is_contiguous() {
            return Err(Error::NonContiguousDevice);
        }
        Ok(DeviceSlice {
            len: self.size(),
            ..view.slice()
        })
    }

    /// Like [`Tensor::device_slice`], for a range the accelerator writes to.
    fn device_target(&self) -> Result<DeviceSlice> {
        if self.memory().is_read_only() {
            return Err(Error::ReadOnlyWatcher);
        }
        self.device_slice()
    }

    /// Applies `f` to every element in place. Host only.
    fn map<F>(&mut self, f: F) -> Result<()>
    where
        Self: Sized,
        F: Fn(f32) -> f32,
    {
        if self.is_on_device() {
            return Err(Error::HostClosureOnDevice);
        }
        let layout = self.layout();
        let data = self.host_data_mut()?;
        for i in 0..layout.size() {
            let idx = layout.traverse_to(i);
            data[idx] = f(data[idx]);
        }
        Ok(())
    }

    /// `self[i] = f(self[i], other[i])` over both traversal orders. Host only.
    ///
    /// # Panics
    /// If the element counts differ.
    fn element_wise<F>(&mut self, other: &dyn Tensor, f: F) -> Result<()>
    where
        Self: Sized,
        F: Fn(f32, f32) -> f32,
    {
        assert_eq!(self.size(), other.size(), "element count mismatch");
        if self.is_on_device() || other.is_on_device() {
            return Err(Error::HostClosureOnDevice);
        }
        let rhs = other.grid()?;
        let layout = self.layout();
        let data = self.host_data_mut()?;
        for i in 0..layout.size() {
            let idx = layout.traverse_to(i);
            data[idx] = f(data[idx], rhs.traversed(i));
        }
        Ok(())
    }

    /// Tensor-tensor arithmetic on matching placements.
    ///
    /// # Panics
    /// If the element counts differ.
    fn arithmetic(&mut self, op: ArithmeticOp, other: &dyn Tensor) -> Result<()> {
        assert_eq!(self.size(), other.size(), "element count mismatch");
        match (self.placement(), other.placement()) {
            (Placement::Host, Placement::Host) => {
                let rhs = other.grid()?;
                let layout = self.layout();
                let data = self.host_data_mut()?;
                for i in 0..layout.size() {
                    let idx = layout.traverse_to(i);
                    data[idx] = op.apply(data[idx], rhs.traversed(i));
                }
                Ok(())
            }
            (Placement::Device, Placement::Device) => {
                let dst = self.device_target()?;
                let rhs = other.device_slice()?;
                let acc = self.accelerator().ok_or(Error::AcceleratorMissing)?;
                if !other.accelerator().is_some_and(|o| same_accelerator(&acc, &o)) {
                    return Err(Error::PlacementMismatch);
                }
                log::trace!("device element-wise {op:?} over {} floats", dst.len);
                acc.element_wise(op, dst, rhs)
            }
            _ => Err(Error::PlacementMismatch),
        }
    }

    /// Tensor-scalar arithmetic.
    fn arithmetic_scalar(&mut self, op: ArithmeticOp, value: f32) -> Result<()> {
        match self.placement() {
            Placement::Host => {
                let layout = self.layout();
                let data = self.host_data_mut()?;
                for i in 0..layout.size() {
                    let idx = layout.traverse_to(i);
                    data[idx] = op.apply(data[idx], value);
                }
                Ok(())
            }
            Placement::Device => {
                let dst = self.device_target()?;
                let acc = self.accelerator().ok_or(Error::AcceleratorMissing)?;
                acc.scalar(op, dst, value)
            }
        }
    }

    fn add(&mut self, other: &dyn Tensor) -> Result<()> {
        self.arithmetic(ArithmeticOp::Add, other)
    }

    fn sub(&mut self, other: &dyn Tensor) -> Result<()> {
        self.arithmetic(ArithmeticOp::Sub, other)
    }

    fn mult(&mut self, other: &dyn Tensor) -> Result<()> {
        self.arithmetic(ArithmeticOp::Mult, other)
    }

    fn div(&mut self, other: &dyn Tensor) -> Result<()> {
        self.arithmetic(ArithmeticOp::Div, other)
    }

    fn add_scalar(&mut self, value: f32) -> Result<()> {
        self.arithmetic_scalar(ArithmeticOp::Add, value)
    }

    fn sub_scalar(&mut self, value: f32) -> Result<()> {
        self.arithmetic_scalar(ArithmeticOp::Sub, value)
    }

    fn mult_scalar(&mut self, value: f32) -> Result<()> {
        self.arithmetic_scalar(ArithmeticOp::Mult, value)
    }

    fn div_scalar(&mut self, value: f32) -> Result<()> {
        self.arithmetic_scalar(ArithmeticOp::Div, value)
    }

    /// Sets every element to `value`; device tensors use the accelerator's `mem_set`.
    fn fill(&mut self, value: f32) -> Result<()> {
        match self.placement() {
            Placement::Host => {
                let layout = self.layout();
                let data = self.host_data_mut()?;
                for i in 0..layout.size() {
                    data[layout.traverse_to(i)] = value;
                }
                Ok(())
            }
            Placement::Device => {
                let dst = self.device_target()?;
                let acc = self.accelerator().ok_or(Error::AcceleratorMissing)?;
                acc.mem_set(dst, value)
            }
        }
    }

    /// Elements in traversal order. Host only.
    fn to_vec(&self) -> Result<Vec<f32>> {
        let grid = self.grid()?;
        Ok((0..grid.size()).map(|i| grid.traversed(i)).collect())
    }

    /// Whitespace-separated elements in traversal order. Host only.
    fn to_text(&self) -> Result<String> {
        let values = self.to_vec()?;
        let mut out = String::with_capacity(values.len() * 8);
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&v.to_string());
        }
        Ok(out)
    }

    /// Densely packed deep copy in the same placement.
    fn copy_buffer(&self) -> Result<Buffer> {
        match self.memory().device() {
            None => Ok(Buffer::Host(self.to_vec()?)),
            Some(view) => {
                let src = self.device_slice()?;
                let acc = view.accelerator();
                let buf = DeviceBuffer::allocate(acc, src.len)?;
                acc.copy_device_to_device(buf.slice(), src)?;
                Ok(Buffer::Device(buf))
            }
        }
    }
}

/// Parses exactly `expected` whitespace-separated floats.
pub(crate) fn parse_values(text: &str, expected: usize) -> Result<Vec<f32>> {
    let values = text
        .split_whitespace()
        .map(|tok| {
            tok.parse::<f32>()
                .map_err(|_| Error::Parse(format!("`{tok}` is not a number")))
        })
        .collect::<Result<Vec<_>>>()?;
    if values.len() != expected {
        return Err(Error::Parse(format!(
            "expected {expected} values, found {}",
            values.len()
        )));
    }
    Ok(values)
}

/// Moves owned memory between placements.
///
/// Watchers fail with [`Error::WatcherPlacement`] even when already in the
/// target placement.
pub(crate) fn relocate(memory: &mut Memory<'_>, target: Placement) -> Result<()> {
    let Memory::Owned(buffer) = memory else {
        return Err(Error::WatcherPlacement);
    };
    let moved = match (&*buffer, target) {
        (Buffer::Host(data), Placement::Device) => {
            let acc = crate::backend::accelerator()?;
            log::trace!("moving {} floats to `{}`", data.len(), acc.name());
            Buffer::Device(DeviceBuffer::upload(&acc, data)?)
        }
        (Buffer::Device(buf), Placement::Host) => {
            log::trace!("moving {} floats to host", buf.len());
            let mut data = vec![0.0; buf.len()];
            buf.accelerator().copy_device_to_host(&mut data, buf.slice())?;
            Buffer::Host(data)
        }
        _ => return Ok(()),
    };
    *buffer = moved;
    Ok(())
}

/// Builds a host [`Tensor2D`] from a nested array literal.
///
/// ```rust
/// use ember_ai::tensor2d;
///
/// let t = tensor2d!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
/// assert_eq!((t.rows(), t.cols()), (2, 3));
/// ```
#[macro_export]
macro_rules! tensor2d {
    ([ $( [ $( $v:expr ),* $(,)? ] ),+ $(,)? ]) => {{
        let rows: ::std::vec::Vec<::std::vec::Vec<f32>> = vec![ $( vec![ $( $v as f32 ),* ] ),+ ];
        let cols = rows[0].len();
        assert!(
            rows.iter().all(|r| r.len() == cols),
            "ragged tensor literal (rows have mismatched lengths)"
        );
        $crate::tensors::Tensor2D::from_vec(rows.len(), cols, rows.concat())
    }};
}

/// Builds a host [`Tensor3D`] from planes of nested array literals.
///
/// The outermost level is depth.
///
/// ```rust
/// use ember_ai::tensor3d;
///
/// let t = tensor3d!([[[1.0, 2.0]], [[3.0, 4.0]]]);
/// assert_eq!((t.rows(), t.cols(), t.depth()), (1, 2, 2));
/// ```
#[macro_export]
macro_rules! tensor3d {
    ([ $( [ $( [ $( $v:expr ),* $(,)? ] ),+ $(,)? ] ),+ $(,)? ]) => {{
        let planes: ::std::vec::Vec<::std::vec::Vec<::std::vec::Vec<f32>>> =
            vec![ $( vec![ $( vec![ $( $v as f32 ),* ] ),+ ] ),+ ];
        let rows = planes[0].len();
        let cols = planes[0][0].len();
        assert!(
            planes.iter().all(|p| p.len() == rows && p.iter().all(|r| r.len() == cols)),
            "ragged tensor literal (planes have mismatched shapes)"
        );
        let depth = planes.len();
        let data: ::std::vec::Vec<f32> = planes.into_iter().flatten().flatten().collect();
        $crate::tensors::Tensor3D::from_vec(rows, cols, depth, data)
    }};
}
