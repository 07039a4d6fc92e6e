//! Output targets for assembled volumes.
//!
//! A [`VolumeSink`] receives the pixels of each tile as a small 3-D block
//! at an offset. Blocks written during one fetch never overlap, so sinks
//! need no internal locking.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapMut;
use ndarray::{s, ArrayBase, ArrayView3, ArrayViewMut3, DataMut, Ix3};

use crate::error::SinkError;

use super::orientation::AxisOrder;

/// Anything that can hold a 3-D `u8` volume.
pub trait VolumeSink {
    /// Shape of the volume.
    fn shape(&self) -> [usize; 3];

    /// Copy `block` into the volume starting at `offset`.
    fn write_block(&mut self, offset: [usize; 3], block: ArrayView3<'_, u8>)
        -> Result<(), SinkError>;
}

/// Check that a block at `offset` fits inside `shape`.
fn check_bounds(offset: [usize; 3], block: [usize; 3], shape: [usize; 3]) -> Result<(), SinkError> {
    let fits = (0..3).all(|axis| offset[axis] + block[axis] <= shape[axis]);
    if fits {
        Ok(())
    } else {
        Err(SinkError::OutOfBounds {
            offset,
            block,
            shape,
        })
    }
}

fn write_into<S: DataMut<Elem = u8>>(
    target: &mut ArrayBase<S, Ix3>,
    offset: [usize; 3],
    block: ArrayView3<'_, u8>,
) -> Result<(), SinkError> {
    let (bz, by, bx) = block.dim();
    let (dz, dy, dx) = target.dim();
    check_bounds(offset, [bz, by, bx], [dz, dy, dx])?;

    let [z, y, x] = offset;
    target
        .slice_mut(s![z..z + bz, y..y + by, x..x + bx])
        .assign(&block);
    Ok(())
}

impl<S: DataMut<Elem = u8>> VolumeSink for ArrayBase<S, Ix3> {
    fn shape(&self) -> [usize; 3] {
        let (z, y, x) = self.dim();
        [z, y, x]
    }

    fn write_block(
        &mut self,
        offset: [usize; 3],
        block: ArrayView3<'_, u8>,
    ) -> Result<(), SinkError> {
        write_into(self, offset, block)
    }
}

// =============================================================================
// Oriented Sink
// =============================================================================

/// Presents a sink laid out in `order` as a native `zyx` sink.
///
/// Each block is permuted as it is written, so callers can stream straight
/// into storage that is already in their preferred axis order.
pub struct OrientedSink<'a, K: VolumeSink + ?Sized> {
    inner: &'a mut K,
    /// native → output axis permutation
    perm: [usize; 3],
}

impl<'a, K: VolumeSink + ?Sized> OrientedSink<'a, K> {
    pub fn new(inner: &'a mut K, order: AxisOrder) -> Self {
        Self {
            inner,
            perm: order.permutation_from(&AxisOrder::ZYX),
        }
    }
}

impl<K: VolumeSink + ?Sized> VolumeSink for OrientedSink<'_, K> {
    fn shape(&self) -> [usize; 3] {
        let outer = self.inner.shape();
        let mut native = [0; 3];
        for (axis, &src) in self.perm.iter().enumerate() {
            native[src] = outer[axis];
        }
        native
    }

    fn write_block(
        &mut self,
        offset: [usize; 3],
        block: ArrayView3<'_, u8>,
    ) -> Result<(), SinkError> {
        let p = self.perm;
        let outer_offset = [offset[p[0]], offset[p[1]], offset[p[2]]];
        self.inner.write_block(outer_offset, block.permuted_axes(p))
    }
}

// =============================================================================
// Memory-mapped Volume
// =============================================================================

/// A volume backed by a memory-mapped file of raw `u8` voxels in C order.
///
/// Lets volumes larger than memory be streamed straight to disk.
pub struct MmapVolume {
    _file: File,
    mmap: MmapMut,
    shape: [usize; 3],
}

impl MmapVolume {
    /// Create (or truncate) `path` to hold a volume of `shape`, with every
    /// voxel set to `fill`.
    pub fn create(path: impl AsRef<Path>, shape: [usize; 3], fill: u8) -> Result<Self, SinkError> {
        let len: usize = shape.iter().product();
        if len == 0 {
            return Err(SinkError::EmptyVolume(shape));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .map_err(io_error)?;
        file.set_len(len as u64).map_err(io_error)?;

        let mut volume = Self::map(file, shape)?;
        if fill != 0 {
            volume.mmap.fill(fill);
        }
        Ok(volume)
    }

    /// Map an existing raw volume file of `shape`.
    pub fn open(path: impl AsRef<Path>, shape: [usize; 3]) -> Result<Self, SinkError> {
        let len: usize = shape.iter().product();
        if len == 0 {
            return Err(SinkError::EmptyVolume(shape));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map_err(io_error)?;
        let actual = file.metadata().map_err(io_error)?.len();
        if actual != len as u64 {
            return Err(SinkError::Io(format!(
                "file holds {} bytes, shape {:?} needs {}",
                actual, shape, len
            )));
        }

        Self::map(file, shape)
    }

    fn map(file: File, shape: [usize; 3]) -> Result<Self, SinkError> {
        // SAFETY: the file is owned by this struct for the lifetime of the
        // mapping; concurrent external modification is the caller's concern.
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(io_error)?;
        Ok(Self {
            _file: file,
            mmap,
            shape,
        })
    }

    pub fn view(&self) -> Result<ArrayView3<'_, u8>, SinkError> {
        ArrayView3::from_shape(self.shape, &self.mmap[..])
            .map_err(|_| layout_error(self.shape, self.mmap.len()))
    }

    pub fn view_mut(&mut self) -> Result<ArrayViewMut3<'_, u8>, SinkError> {
        let (shape, len) = (self.shape, self.mmap.len());
        ArrayViewMut3::from_shape(shape, &mut self.mmap[..]).map_err(|_| layout_error(shape, len))
    }

    /// Flush written voxels to disk.
    pub fn flush(&self) -> Result<(), SinkError> {
        self.mmap.flush().map_err(io_error)
    }
}

impl VolumeSink for MmapVolume {
    fn shape(&self) -> [usize; 3] {
        self.shape
    }

    fn write_block(
        &mut self,
        offset: [usize; 3],
        block: ArrayView3<'_, u8>,
    ) -> Result<(), SinkError> {
        let mut view = self.view_mut()?;
        write_into(&mut view, offset, block)
    }
}

fn io_error(e: std::io::Error) -> SinkError {
    SinkError::Io(e.to_string())
}

fn layout_error(shape: [usize; 3], len: usize) -> SinkError {
    SinkError::Io(format!("mapping of {} bytes does not fit shape {:?}", len, shape))
}

// =============================================================================
// Tests
// =============================================================================
