//! Circular buffers backing streams.
//!
//! The buffer is backed by a file-mapped region, mapped twice
//! contiguously in virtual memory, so readers and writers always see a
//! flat slice even when the logical window wraps past the end of the
//! underlying storage.
use std::marker::PhantomData;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use libc::{c_int, c_uchar, c_void, off_t, size_t};
use libc::{MAP_FAILED, MAP_SHARED, PROT_READ, PROT_WRITE};

use crate::stream::Tag;
use crate::{Error, Result};

unsafe extern "C" {
    fn mmap(
        addr: *const c_void,
        len: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> *mut c_void;
    fn munmap(addr: *const c_void, length: size_t) -> c_int;
}

/// Circular buffer dealing in bytes, double-mapped so a logical window
/// never needs to wrap mid-slice.
struct Circ {
    buf: *mut c_uchar,
    // Size of a single mapping, in bytes.
    len: usize,
}

impl Circ {
    /// Create a new double-mapped buffer of `len` bytes per mapping.
    ///
    /// `len` must be a multiple of the system page size.
    fn new(len: usize) -> Result<Self> {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let len = len.div_ceil(page) * page;
        let len2 = len * 2;
        let f = tempfile::tempfile()?;
        f.set_len(len2 as u64)?;
        let fd = f.as_raw_fd();

        let buf = unsafe {
            let buf = mmap(
                std::ptr::null::<c_void>(),
                len2 as size_t,
                PROT_READ | PROT_WRITE,
                MAP_SHARED,
                fd,
                0,
            );
            if buf == MAP_FAILED {
                return Err(Error::msg("mmap failed".to_string()));
            }
            buf as *mut c_uchar
        };
        let second = (buf as libc::uintptr_t + len as libc::uintptr_t) as *const c_void;
        unsafe {
            let rc = munmap(second, len);
            if rc != 0 {
                return Err(Error::msg("munmap failed".to_string()));
            }
        }
        unsafe {
            let buf2 = mmap(
                second as *const c_void,
                len as size_t,
                PROT_READ | PROT_WRITE,
                MAP_SHARED,
                fd,
                0,
            );
            if buf2 == MAP_FAILED {
                return Err(Error::msg("mmap (second half) failed".to_string()));
            }
            if buf2 as *const c_void != second {
                return Err(Error::msg(
                    "mmap did not place second half adjacently".to_string(),
                ));
            }
        };
        Ok(Self { len, buf })
    }

    fn full_buffer<T>(&self) -> &'static mut [T] {
        let total = self.len * 2;
        assert!(total % std::mem::size_of::<T>() == 0);
        unsafe {
            std::slice::from_raw_parts_mut(self.buf as *mut T, total / std::mem::size_of::<T>())
        }
    }

    // Number of elements of T that fit in a single mapping.
    fn capacity<T>(&self) -> usize {
        self.len / std::mem::size_of::<T>()
    }
}

impl Drop for Circ {
    fn drop(&mut self) {
        unsafe {
            munmap(self.buf as *const c_void, self.len * 2);
        }
    }
}

unsafe impl Send for Circ {}
unsafe impl Sync for Circ {}

static NEXT_BUFFER_ID: AtomicUsize = AtomicUsize::new(1);

/// Type-aware circular buffer, shared via `Arc` between a stream's read
/// and write sides.
pub struct Buffer<T> {
    id: usize,
    circ: Circ,
    rpos: AtomicUsize,
    wpos: AtomicUsize,
    used: AtomicUsize,
    // Absolute (monotonic, never wrapped) stream position of rpos/wpos.
    abs_rpos: AtomicU64,
    abs_wpos: AtomicU64,
    tags: Mutex<Vec<Tag>>,
    _t: PhantomData<T>,
}

impl<T: Copy> Buffer<T> {
    /// Create a new buffer able to hold at least `size` elements.
    pub fn new(size: usize) -> Result<Self> {
        let bytes = size * std::mem::size_of::<T>();
        Ok(Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            circ: Circ::new(bytes.max(std::mem::size_of::<T>()))?,
            rpos: AtomicUsize::new(0),
            wpos: AtomicUsize::new(0),
            used: AtomicUsize::new(0),
            abs_rpos: AtomicU64::new(0),
            abs_wpos: AtomicU64::new(0),
            tags: Mutex::new(Vec::new()),
            _t: PhantomData,
        })
    }

    /// ID, unique for the lifetime of the process, shared by both ends
    /// of the stream.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Total capacity of the underlying circular buffer, in elements.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.circ.capacity::<T>()
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.used.load(Ordering::Acquire) == 0
    }

    fn free(&self) -> usize {
        self.total_size() - self.used.load(Ordering::Acquire)
    }

    /// Return the number of samples currently readable, never more than `need`.
    #[must_use]
    pub(crate) fn wait_for_read(&self, need: usize) -> usize {
        self.used.load(Ordering::Acquire).min(need)
    }

    /// Return the free space, never more than `need`.
    #[must_use]
    pub(crate) fn wait_for_write(&self, need: usize) -> usize {
        self.free().min(need)
    }

    /// Get a read window and any tags falling within it.
    pub fn read_buf(self: Arc<Self>) -> Result<(BufferReader<T>, Vec<Tag>)> {
        let rpos = self.rpos.load(Ordering::Acquire);
        let n = self.used.load(Ordering::Acquire);
        let buf = self.circ.full_buffer::<T>();
        let slice: &'static [T] = unsafe { std::mem::transmute(&buf[rpos..rpos + n]) };
        let abs_rpos = self.abs_rpos.load(Ordering::Acquire);
        let tags = self
            .tags
            .lock()
            .unwrap()
            .iter()
            .filter(|t| {
                let p = t.pos() as u64;
                p >= abs_rpos && p < abs_rpos + n as u64
            })
            .map(|t| Tag::new((t.pos() as u64 - abs_rpos) as usize, t.key(), t.val().clone()))
            .collect();
        Ok((
            BufferReader {
                circ: self,
                slice,
            },
            tags,
        ))
    }

    /// Get a write window.
    pub fn write_buf(self: Arc<Self>) -> Result<BufferWriter<T>> {
        let wpos = self.wpos.load(Ordering::Acquire);
        let free = self.free();
        let buf = self.circ.full_buffer::<T>();
        let slice: &'static mut [T] = unsafe { std::mem::transmute(&mut buf[wpos..wpos + free]) };
        Ok(BufferWriter {
            circ: self,
            slice,
        })
    }
}

/// A readable window into a [`Buffer`].
pub struct BufferReader<T> {
    circ: Arc<Buffer<T>>,
    slice: &'static [T],
}

impl<T> BufferReader<T> {
    /// Number of readable samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slice.len()
    }

    /// True if there's nothing to read right now.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slice.is_empty()
    }

    /// Borrow the readable samples.
    #[must_use]
    pub fn slice(&self) -> &[T] {
        self.slice
    }

    /// Iterate over the readable samples.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.slice.iter()
    }

    /// Mark `n` samples as consumed, freeing their space for writers.
    pub fn consume(&self, n: usize) {
        assert!(n <= self.slice.len(), "consumed more than was readable");
        let total = self.circ.total_size();
        self.circ.rpos.store(
            (self.circ.rpos.load(Ordering::Acquire) + n) % total,
            Ordering::Release,
        );
        self.circ.used.fetch_sub(n, Ordering::AcqRel);
        let abs = self.circ.abs_rpos.fetch_add(n as u64, Ordering::AcqRel) + n as u64;
        self.circ
            .tags
            .lock()
            .unwrap()
            .retain(|t| t.pos() as u64 >= abs);
    }
}

impl<'a, T> IntoIterator for &'a BufferReader<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;
    fn into_iter(self) -> Self::IntoIter {
        self.slice.iter()
    }
}

/// A writable window into a [`Buffer`].
pub struct BufferWriter<T> {
    circ: Arc<Buffer<T>>,
    slice: &'static mut [T],
}

impl<T: Copy> BufferWriter<T> {
    /// Number of samples that can currently be written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slice.len()
    }

    /// True if there's no room to write right now.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slice.is_empty()
    }

    /// Borrow the writable window mutably.
    pub fn slice(&mut self) -> &mut [T] {
        self.slice
    }

    /// Fill the start of the writable window from a slice.
    ///
    /// Does not itself advance the write pointer; call [`Self::produce`].
    pub fn fill_from_slice(&mut self, data: &[T]) {
        self.slice[..data.len()].copy_from_slice(data);
    }

    /// Fill the writable window from an iterator, returning how many
    /// elements were written.
    pub fn fill_from_iter(&mut self, it: impl Iterator<Item = T>) -> usize {
        let mut n = 0;
        for (dst, src) in self.slice.iter_mut().zip(it) {
            *dst = src;
            n += 1;
        }
        n
    }

    /// Commit `n` written samples, attaching tags positioned relative
    /// to the start of this write window.
    pub fn produce(&self, n: usize, tags: &[Tag]) {
        assert!(n <= self.slice.len(), "produced more than there was room for");
        let total = self.circ.total_size();
        let abs_wpos = self.circ.abs_wpos.load(Ordering::Acquire);
        if !tags.is_empty() {
            let mut store = self.circ.tags.lock().unwrap();
            for t in tags {
                store.push(Tag::new(
                    (abs_wpos + t.pos() as u64) as usize,
                    t.key(),
                    t.val().clone(),
                ));
            }
        }
        self.circ.wpos.store(
            (self.circ.wpos.load(Ordering::Acquire) + n) % total,
            Ordering::Release,
        );
        self.circ.used.fetch_add(n, Ordering::AcqRel);
        self.circ.abs_wpos.fetch_add(n as u64, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn basic_roundtrip() -> Result<()> {
        let b: Arc<Buffer<u8>> = Arc::new(Buffer::new(20)?);
        assert!(b.clone().read_buf()?.0.is_empty());
        {
            let mut w = b.clone().write_buf()?;
            assert!(w.len() >= 20);
            w.fill_from_slice(&[1, 2, 3]);
            w.produce(3, &[]);
        }
        let (r, _tags) = b.clone().read_buf()?;
        assert_eq!(r.slice(), &[1, 2, 3]);
        r.consume(3);
        assert!(b.clone().read_buf()?.0.is_empty());
        Ok(())
    }

    #[test]
    fn wraps_past_page() -> Result<()> {
        let b: Arc<Buffer<u8>> = Arc::new(Buffer::new(16)?);
        let total = b.total_size();
        // Fill and drain repeatedly to force the write/read pointers
        // around the ring more than once.
        for round in 0..5 {
            {
                let mut w = b.clone().write_buf()?;
                let n = w.len().min(total / 2);
                let data: Vec<u8> = (0..n).map(|i| ((round * 7 + i) & 0xff) as u8).collect();
                w.fill_from_slice(&data);
                w.produce(n, &[]);
            }
            let (r, _tags) = b.clone().read_buf()?;
            let n = r.len();
            let data: Vec<u8> = (0..n).map(|i| ((round * 7 + i) & 0xff) as u8).collect();
            assert_eq!(r.slice(), &data[..]);
            r.consume(n);
        }
        Ok(())
    }

    #[test]
    fn tags_ride_along() -> Result<()> {
        use crate::stream::TagValue;
        let b: Arc<Buffer<u8>> = Arc::new(Buffer::new(20)?);
        {
            let mut w = b.clone().write_buf()?;
            w.fill_from_slice(&[1, 2, 3, 4]);
            w.produce(4, &[Tag::new(2, "mark", TagValue::Bool(true))]);
        }
        let (r, tags) = b.clone().read_buf()?;
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].pos(), 2);
        r.consume(4);
        Ok(())
    }
}
