//! Buffers, ownership and placement.
//!
//! A tensor's storage is a [`Memory`]: either an owned [`Buffer`] or a
//! [`Watched`] borrow of somebody else's buffer. Owned host memory is a
//! `Vec<f32>`; owned device memory is a [`DeviceBuffer`] that releases its
//! allocation on drop. Watchers never allocate or free anything, and the
//! borrow they hold ties their lifetime to the tensor they watch.

use std::fmt;
use std::sync::Arc;

use crate::device::{Accelerator, BufferHandle, DeviceSlice};
use crate::error::{Error, Result};

/// Where a tensor's floats live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    #[default]
    Host,
    Device,
}

/// An allocation owned by an accelerator.
pub struct DeviceBuffer {
    handle: BufferHandle,
    len: usize,
    accelerator: Arc<dyn Accelerator>,
}

impl DeviceBuffer {
    /// Allocates `len` floats on `acc` without initialising them.
    pub fn allocate(acc: &Arc<dyn Accelerator>, len: usize) -> Result<Self> {
        let handle = acc.alloc(len)?;
        Ok(Self {
            handle,
            len,
            accelerator: Arc::clone(acc),
        })
    }

    /// Allocates `len` floats set to `value`.
    pub fn filled(acc: &Arc<dyn Accelerator>, len: usize, value: f32) -> Result<Self> {
        let buf = Self::allocate(acc, len)?;
        acc.mem_set(buf.slice(), value)?;
        Ok(buf)
    }

    /// Allocates and uploads a copy of `data`.
    pub fn upload(acc: &Arc<dyn Accelerator>, data: &[f32]) -> Result<Self> {
        let buf = Self::allocate(acc, data.len())?;
        acc.copy_host_to_device(buf.slice(), data)?;
        Ok(buf)
    }

    /// The whole allocation as a slice.
    pub fn slice(&self) -> DeviceSlice {
        DeviceSlice {
            handle: self.handle,
            offset: 0,
            len: self.len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn accelerator(&self) -> &Arc<dyn Accelerator> {
        &self.accelerator
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.accelerator.dealloc(self.handle);
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("handle", &self.handle)
            .field("len", &self.len)
            .field("accelerator", &self.accelerator.name())
            .finish()
    }
}

/// Owned storage.
#[derive(Debug)]
pub enum Buffer {
    Host(Vec<f32>),
    Device(DeviceBuffer),
}

impl Buffer {
    pub fn placement(&self) -> Placement {
        match self {
            Self::Host(_) => Placement::Host,
            Self::Device(_) => Placement::Device,
        }
    }

    /// `len` floats set to `value` in the requested placement.
    ///
    /// Device buffers come from the installed accelerator and are filled with
    /// its `mem_set` primitive.
    pub fn filled(len: usize, value: f32, placement: Placement) -> Result<Self> {
        match placement {
            Placement::Host => Ok(Self::Host(vec![value; len])),
            Placement::Device => {
                let acc = crate::backend::accelerator()?;
                Ok(Self::Device(DeviceBuffer::filled(&acc, len, value)?))
            }
        }
    }

    /// Copies `data` into the requested placement.
    pub fn from_slice(data: &[f32], placement: Placement) -> Result<Self> {
        match placement {
            Placement::Host => Ok(Self::Host(data.to_vec())),
            Placement::Device => {
                let acc = crate::backend::accelerator()?;
                Ok(Self::Device(DeviceBuffer::upload(&acc, data)?))
            }
        }
    }
}

/// A device range borrowed from a [`DeviceBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct DeviceView<'a> {
    pub buffer: &'a DeviceBuffer,
    pub offset: usize,
    pub len: usize,
}

impl DeviceView<'_> {
    pub fn slice(&self) -> DeviceSlice {
        DeviceSlice {
            handle: self.buffer.handle,
            offset: self.offset,
            len: self.len,
        }
    }

    pub fn accelerator(&self) -> &Arc<dyn Accelerator> {
        &self.buffer.accelerator
    }
}

/// Borrowed storage of a watcher.
#[derive(Debug)]
pub enum Watched<'a> {
    Host(&'a mut [f32]),
    HostReadOnly(&'a [f32]),
    Device(DeviceView<'a>),
    DeviceReadOnly(DeviceView<'a>),
}

/// Tensor storage: owned or watched.
#[derive(Debug)]
pub enum Memory<'a> {
    Owned(Buffer),
    Watching(Watched<'a>),
}

impl Memory<'_> {
    pub fn placement(&self) -> Placement {
        match self {
            Self::Owned(buf) => buf.placement(),
            Self::Watching(Watched::Host(_) | Watched::HostReadOnly(_)) => Placement::Host,
            Self::Watching(Watched::Device(_) | Watched::DeviceReadOnly(_)) => Placement::Device,
        }
    }

    pub fn is_watcher(&self) -> bool {
        matches!(self, Self::Watching(_))
    }

    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::Watching(Watched::HostReadOnly(_) | Watched::DeviceReadOnly(_))
        )
    }

    /// Floats addressable through this memory.
    pub fn len(&self) -> usize {
        match self {
            Self::Owned(Buffer::Host(v)) => v.len(),
            Self::Owned(Buffer::Device(b)) => b.len,
            Self::Watching(Watched::Host(s)) => s.len(),
            Self::Watching(Watched::HostReadOnly(s)) => s.len(),
            Self::Watching(Watched::Device(v) | Watched::DeviceReadOnly(v)) => v.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Host floats, or [`Error::DataOnDevice`].
    pub fn host(&self) -> Result<&[f32]> {
        match self {
            Self::Owned(Buffer::Host(v)) => Ok(v.as_slice()),
            Self::Watching(Watched::Host(s)) => Ok(&s[..]),
            Self::Watching(Watched::HostReadOnly(s)) => Ok(&s[..]),
            _ => Err(Error::DataOnDevice),
        }
    }

    /// Writable host floats.
    ///
    /// # Errors
    /// [`Error::DataOnDevice`] for device memory, [`Error::ReadOnlyWatcher`]
    /// for a read-only view.
    pub fn host_mut(&mut self) -> Result<&mut [f32]> {
        match self {
            Self::Owned(Buffer::Host(v)) => Ok(v.as_mut_slice()),
            Self::Watching(Watched::Host(s)) => Ok(&mut s[..]),
            Self::Watching(Watched::HostReadOnly(_)) => Err(Error::ReadOnlyWatcher),
            _ => Err(Error::DataOnDevice),
        }
    }

    /// The device range backing this memory, if it is on device.
    pub fn device(&self) -> Option<DeviceView<'_>> {
        match self {
            Self::Owned(Buffer::Device(b)) => Some(DeviceView {
                buffer: b,
                offset: 0,
                len: b.len,
            }),
            Self::Watching(Watched::Device(v) | Watched::DeviceReadOnly(v)) => Some(*v),
            _ => None,
        }
    }

    /// Writable watcher over `len` floats starting at `offset`.
    ///
    /// Watching a read-only view yields another read-only view.
    ///
    /// # Panics
    /// If the range exceeds this memory.
    pub fn watch(&mut self, offset: usize, len: usize) -> Memory<'_> {
        assert!(
            offset + len <= self.len(),
            "watched range {offset}..{} exceeds buffer of {}",
            offset + len,
            self.len()
        );
        let watched = match self {
            Self::Owned(Buffer::Host(v)) => Watched::Host(&mut v[offset..offset + len]),
            Self::Owned(Buffer::Device(b)) => Watched::Device(DeviceView {
                buffer: b,
                offset,
                len,
            }),
            Self::Watching(Watched::Host(s)) => Watched::Host(&mut s[offset..offset + len]),
            Self::Watching(Watched::HostReadOnly(s)) => {
                Watched::HostReadOnly(&s[offset..offset + len])
            }
            Self::Watching(Watched::Device(v)) => Watched::Device(DeviceView {
                buffer: v.buffer,
                offset: v.offset + offset,
                len,
            }),
            Self::Watching(Watched::DeviceReadOnly(v)) => Watched::DeviceReadOnly(DeviceView {
                buffer: v.buffer,
                offset: v.offset + offset,
                len,
            }),
        };
        Memory::Watching(watched)
    }

    /// Read-only watcher over `len` floats starting at `offset`.
    ///
    /// # Panics
    /// If the range exceeds this memory.
    pub fn view(&self, offset: usize, len: usize) -> Memory<'_> {
        assert!(
            offset + len <= self.len(),
            "viewed range {offset}..{} exceeds buffer of {}",
            offset + len,
            self.len()
        );
        let range = offset..offset + len;
        let watched = match self {
            Self::Owned(Buffer::Host(v)) => Watched::HostReadOnly(&v[range]),
            Self::Watching(Watched::Host(s)) => Watched::HostReadOnly(&s[range]),
            Self::Watching(Watched::HostReadOnly(s)) => Watched::HostReadOnly(&s[range]),
            Self::Owned(Buffer::Device(b)) => Watched::DeviceReadOnly(DeviceView {
                buffer: b,
                offset,
                len,
            }),
            Self::Watching(Watched::Device(v) | Watched::DeviceReadOnly(v)) => {
                Watched::DeviceReadOnly(DeviceView {
                    buffer: v.buffer,
                    offset: v.offset + offset,
                    len,
                })
            }
        };
        Memory::Watching(watched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watcher_writes_reach_owner() {
        let mut owner = Memory::Owned(Buffer::Host(vec![0.0; 6]));
        {
            let mut w = owner.watch(2, 3);
            assert!(w.is_watcher());
            w.host_mut().unwrap()[1] = 7.0;
        }
        assert_eq!(owner.host().unwrap()[3], 7.0);
    }

    #[test]
    fn read_only_views_reject_writes() {
        let owner = Memory::Owned(Buffer::Host(vec![1.0; 4]));
        let mut v = owner.view(0, 2);
        assert!(v.is_read_only());
        assert!(matches!(v.host_mut(), Err(Error::ReadOnlyWatcher)));
        let mut nested = v.watch(1, 1);
        assert!(nested.is_read_only());
        assert!(matches!(nested.host_mut(), Err(Error::ReadOnlyWatcher)));
    }

    #[test]
    #[should_panic(expected = "exceeds buffer")]
    fn watch_out_of_range_panics() {
        let mut owner = Memory::Owned(Buffer::Host(vec![0.0; 4]));
        let _ = owner.watch(3, 2);
    }
}
