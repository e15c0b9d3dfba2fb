//! Wait-free ring buffer for audio samples
//!
//! This implements a single-producer single-consumer (SPSC) ring buffer
//! that moves samples between the real-time render context and a
//! non-real-time worker without locks and without allocating after setup.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────────────────────────────┐
//! │ write: u32   │ read: u32    │ storage: (capacity + 1) × element    │
//! └──────────────┴──────────────┴──────────────────────────────────────┘
//!   0              4              8
//! ```
//!
//! One storage slot is always left empty so that `full` and `empty` can be
//! told apart; the usable capacity is the slot count minus one.
//!
//! The producer copies samples into the free region and only then publishes
//! the new write cursor with `Release`. The consumer loads that cursor with
//! `Acquire` before touching the samples behind it. The read cursor is
//! published the same way in the other direction.

use std::any::Any;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::size_of;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{BufferError, Role};

/// Bytes taken by the two cursors ahead of the storage
pub const HEADER_BYTES: usize = 8;

/// Element type tag carried by a type-erased ring region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    U8,
    I16,
    I32,
    F32,
    F64,
}

impl SampleFormat {
    /// Size of one element in bytes
    pub fn bytes_per_element(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I32 | SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::U8 => "u8",
            SampleFormat::I16 => "i16",
            SampleFormat::I32 => "i32",
            SampleFormat::F32 => "f32",
            SampleFormat::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Element types a ring buffer can carry
pub trait Sample: Copy + Default + Send + Sync + 'static {
    const FORMAT: SampleFormat;
}

macro_rules! impl_sample {
    ($($ty:ty => $format:ident),* $(,)?) => {
        $(impl Sample for $ty {
            const FORMAT: SampleFormat = SampleFormat::$format;
        })*
    };
}

impl_sample!(u8 => U8, i16 => I16, i32 => I32, f32 => F32, f64 => F64);

#[repr(C)]
struct Cursors {
    write: AtomicU32,
    read: AtomicU32,
}

/// Fixed-capacity SPSC ring buffer
///
/// Built once, then split into exactly one [`Producer`] and one
/// [`Consumer`]. The handles are not `Clone`; a role can only be claimed
/// again after the previous holder has been dropped.
pub struct RingBuffer<T> {
    cursors: Cursors,
    storage: Box<[UnsafeCell<T>]>,
    producer_claimed: AtomicBool,
    consumer_claimed: AtomicBool,
}

// SAFETY: the producer only writes slots in the free region and the consumer
// only reads slots in the filled region. The regions are delimited by the
// cursors, which are published with release/acquire ordering, and each role
// is held by at most one handle at a time.
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T: Sample> RingBuffer<T> {
    /// Create a ring buffer able to hold `capacity` elements
    pub fn with_capacity(capacity: usize) -> Result<Arc<Self>, BufferError> {
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity);
        }
        let slots = capacity
            .checked_add(1)
            .ok_or(BufferError::TooLarge { slots: usize::MAX })?;
        if slots > u32::MAX as usize {
            return Err(BufferError::TooLarge { slots });
        }

        let storage = (0..slots).map(|_| UnsafeCell::new(T::default())).collect();

        Ok(Arc::new(Self {
            cursors: Cursors {
                write: AtomicU32::new(0),
                read: AtomicU32::new(0),
            },
            storage,
            producer_claimed: AtomicBool::new(false),
            consumer_claimed: AtomicBool::new(false),
        }))
    }

    /// Create a ring buffer from the byte size of a shared region
    ///
    /// The size must cover the cursor header plus at least two whole
    /// elements (one usable, one reserved).
    pub fn from_byte_len(byte_len: usize) -> Result<Arc<Self>, BufferError> {
        let element = size_of::<T>();
        if byte_len < HEADER_BYTES + 2 * element {
            return Err(BufferError::TooSmall {
                byte_len,
                format: T::FORMAT,
            });
        }
        let payload = byte_len - HEADER_BYTES;
        if payload % element != 0 {
            return Err(BufferError::Misaligned {
                byte_len,
                format: T::FORMAT,
            });
        }
        Self::with_capacity(payload / element - 1)
    }

    /// Bytes a region needs to hold `capacity` usable elements
    ///
    /// Fails for capacities [`with_capacity`](Self::with_capacity) would
    /// reject as too large, and for sizes that overflow `usize`.
    pub fn byte_len_for_capacity(capacity: usize) -> Result<usize, BufferError> {
        let slots = capacity
            .checked_add(1)
            .ok_or(BufferError::TooLarge { slots: usize::MAX })?;
        if slots > u32::MAX as usize {
            return Err(BufferError::TooLarge { slots });
        }
        slots
            .checked_mul(size_of::<T>())
            .and_then(|payload| payload.checked_add(HEADER_BYTES))
            .ok_or(BufferError::TooLarge { slots })
    }

    /// Number of elements the buffer can hold
    pub fn capacity(&self) -> usize {
        self.storage.len() - 1
    }

    /// Byte size of the region under the documented layout
    pub fn byte_len(&self) -> usize {
        HEADER_BYTES + self.storage.len() * size_of::<T>()
    }

    /// Elements ready to be popped. May be stale on the producer side.
    pub fn available_read(&self) -> usize {
        let (rd, wr) = self.load_cursors();
        self.readable(rd, wr)
    }

    /// Free slots. May be stale on the consumer side.
    pub fn available_write(&self) -> usize {
        let (rd, wr) = self.load_cursors();
        self.writable(rd, wr)
    }

    pub fn is_empty(&self) -> bool {
        let (rd, wr) = self.load_cursors();
        rd == wr
    }

    pub fn is_full(&self) -> bool {
        let (rd, wr) = self.load_cursors();
        (wr + 1) % self.storage.len() == rd
    }

    /// Claim the producer role
    pub fn producer(self: &Arc<Self>) -> Result<Producer<T>, BufferError> {
        self.claim(Role::Producer)?;
        Ok(Producer {
            ring: Arc::clone(self),
        })
    }

    /// Claim the consumer role
    pub fn consumer(self: &Arc<Self>) -> Result<Consumer<T>, BufferError> {
        self.claim(Role::Consumer)?;
        Ok(Consumer {
            ring: Arc::clone(self),
        })
    }

    /// Claim both roles at once
    pub fn split(self: &Arc<Self>) -> Result<(Producer<T>, Consumer<T>), BufferError> {
        let producer = self.producer()?;
        let consumer = self.consumer()?;
        Ok((producer, consumer))
    }

    fn claim(&self, role: Role) -> Result<(), BufferError> {
        let flag = self.role_flag(role);
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| BufferError::RoleTaken(role))
    }

    fn role_flag(&self, role: Role) -> &AtomicBool {
        match role {
            Role::Producer => &self.producer_claimed,
            Role::Consumer => &self.consumer_claimed,
        }
    }

    fn load_cursors(&self) -> (usize, usize) {
        let rd = self.cursors.read.load(Ordering::Acquire) as usize;
        let wr = self.cursors.write.load(Ordering::Acquire) as usize;
        (rd, wr)
    }

    fn readable(&self, rd: usize, wr: usize) -> usize {
        let slots = self.storage.len();
        (wr + slots - rd) % slots
    }

    fn writable(&self, rd: usize, wr: usize) -> usize {
        self.capacity() - self.readable(rd, wr)
    }

    /// # Safety
    ///
    /// `[start, start + len)` must lie inside the storage and inside the
    /// region owned by the caller's role for the duration of the borrow.
    #[allow(clippy::mut_from_ref)]
    unsafe fn run_mut(&self, start: usize, len: usize) -> &mut [T] {
        debug_assert!(start + len <= self.storage.len());
        let base = UnsafeCell::raw_get(self.storage.as_ptr().add(start));
        std::slice::from_raw_parts_mut(base, len)
    }

    /// # Safety
    ///
    /// Same contract as [`RingBuffer::run_mut`].
    unsafe fn run(&self, start: usize, len: usize) -> &[T] {
        debug_assert!(start + len <= self.storage.len());
        let base = UnsafeCell::raw_get(self.storage.as_ptr().add(start));
        std::slice::from_raw_parts(base as *const T, len)
    }
}

/// Producer side of a [`RingBuffer`]
pub struct Producer<T: Sample> {
    ring: Arc<RingBuffer<T>>,
}

impl<T: Sample> Producer<T> {
    /// Copy as many of `elements` as fit into the buffer
    ///
    /// Returns the number written, which is short (possibly 0) when the
    /// buffer is full. Never blocks. Use slicing for a length/offset subset.
    pub fn push(&mut self, elements: &[T]) -> usize {
        let ring = &*self.ring;
        let (rd, wr) = ring.load_cursors();
        let to_write = ring.writable(rd, wr).min(elements.len());
        if to_write == 0 {
            return 0;
        }

        let slots = ring.storage.len();
        let first = (slots - wr).min(to_write);
        let second = to_write - first;

        // SAFETY: [wr, wr + to_write) modulo slots is the free region, which
        // only this producer writes until the cursor below is published.
        unsafe {
            ring.run_mut(wr, first).copy_from_slice(&elements[..first]);
            ring.run_mut(0, second)
                .copy_from_slice(&elements[first..to_write]);
        }

        ring.cursors
            .write
            .store(((wr + to_write) % slots) as u32, Ordering::Release);
        to_write
    }

    /// Fill up to `amount` free slots in place
    ///
    /// `fill` receives the free storage as (at most) two runs, the second
    /// one continuing where the first ends after wrap-around. It returns how
    /// many elements it wrote from the start of the first run, or `None`
    /// when it filled both runs completely.
    ///
    /// `fill` is arbitrary code that may allocate or block, so this variant
    /// is meant for worker threads, not for the render callback.
    pub fn write_with<F>(&mut self, amount: usize, fill: F) -> usize
    where
        F: FnOnce(&mut [T], &mut [T]) -> Option<usize>,
    {
        let ring = &*self.ring;
        let (rd, wr) = ring.load_cursors();
        let to_write = ring.writable(rd, wr).min(amount);
        if to_write == 0 {
            return 0;
        }

        let slots = ring.storage.len();
        let first = (slots - wr).min(to_write);
        let second = to_write - first;

        // SAFETY: as in `push`, both runs are inside the free region.
        let written = unsafe {
            fill(ring.run_mut(wr, first), ring.run_mut(0, second))
        }
        .map_or(to_write, |n| n.min(to_write));

        ring.cursors
            .write
            .store(((wr + written) % slots) as u32, Ordering::Release);
        written
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn available_write(&self) -> usize {
        self.ring.available_write()
    }

    pub fn available_read(&self) -> usize {
        self.ring.available_read()
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl<T: Sample> Drop for Producer<T> {
    fn drop(&mut self) {
        self.ring.producer_claimed.store(false, Ordering::Release);
    }
}

/// Consumer side of a [`RingBuffer`]
pub struct Consumer<T: Sample> {
    ring: Arc<RingBuffer<T>>,
}

impl<T: Sample> Consumer<T> {
    /// Move up to `elements.len()` queued elements into `elements`
    ///
    /// Returns the number read, placed at the start of `elements`; 0 when
    /// the buffer is empty. Never blocks.
    pub fn pop(&mut self, elements: &mut [T]) -> usize {
        let ring = &*self.ring;
        let (rd, wr) = ring.load_cursors();
        let to_read = ring.readable(rd, wr).min(elements.len());
        if to_read == 0 {
            return 0;
        }

        let slots = ring.storage.len();
        let first = (slots - rd).min(to_read);
        let second = to_read - first;

        // SAFETY: [rd, rd + to_read) modulo slots is the filled region,
        // published by the producer before the write cursor we acquired.
        unsafe {
            elements[..first].copy_from_slice(ring.run(rd, first));
            elements[first..to_read].copy_from_slice(ring.run(0, second));
        }

        ring.cursors
            .read
            .store(((rd + to_read) % slots) as u32, Ordering::Release);
        to_read
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn available_read(&self) -> usize {
        self.ring.available_read()
    }

    pub fn available_write(&self) -> usize {
        self.ring.available_write()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }
}

impl<T: Sample> Drop for Consumer<T> {
    fn drop(&mut self) {
        self.ring.consumer_claimed.store(false, Ordering::Release);
    }
}

/// Element-agnostic view of a ring buffer region
trait RingRegion: Send + Sync {
    fn capacity(&self) -> usize;
    fn byte_len(&self) -> usize;
    fn available_read(&self) -> usize;
    fn role_claimed(&self, role: Role) -> bool;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Sample> RingRegion for RingBuffer<T> {
    fn capacity(&self) -> usize {
        RingBuffer::capacity(self)
    }

    fn byte_len(&self) -> usize {
        RingBuffer::byte_len(self)
    }

    fn available_read(&self) -> usize {
        RingBuffer::available_read(self)
    }

    fn role_claimed(&self, role: Role) -> bool {
        self.role_flag(role).load(Ordering::Acquire)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Type-erased handle to a ring buffer region
///
/// This is what gets handed to an audio unit before it is armed. Typed
/// producer/consumer handles are obtained from it once, and fail when the
/// requested element type differs from the one the region was built for.
#[derive(Clone)]
pub struct SharedRing {
    region: Arc<dyn RingRegion>,
    format: SampleFormat,
}

impl SharedRing {
    /// Allocate a region holding `capacity` elements of `T`
    pub fn with_capacity<T: Sample>(capacity: usize) -> Result<Self, BufferError> {
        Ok(Self::from_ring(RingBuffer::<T>::with_capacity(capacity)?))
    }

    /// Allocate a region of exactly `byte_len` bytes for elements of `T`
    pub fn from_byte_len<T: Sample>(byte_len: usize) -> Result<Self, BufferError> {
        Ok(Self::from_ring(RingBuffer::<T>::from_byte_len(byte_len)?))
    }

    pub fn from_ring<T: Sample>(ring: Arc<RingBuffer<T>>) -> Self {
        Self {
            region: ring,
            format: T::FORMAT,
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    pub fn byte_len(&self) -> usize {
        self.region.byte_len()
    }

    pub fn available_read(&self) -> usize {
        self.region.available_read()
    }

    /// Whether `role` is currently held by a live handle
    pub fn is_claimed(&self, role: Role) -> bool {
        self.region.role_claimed(role)
    }

    /// Typed access to the underlying buffer
    pub fn typed<T: Sample>(&self) -> Result<Arc<RingBuffer<T>>, BufferError> {
        let mismatch = BufferError::ElementMismatch {
            expected: T::FORMAT,
            found: self.format,
        };
        if T::FORMAT != self.format {
            return Err(mismatch);
        }
        Arc::clone(&self.region)
            .into_any()
            .downcast::<RingBuffer<T>>()
            .map_err(|_| mismatch)
    }

    pub fn producer<T: Sample>(&self) -> Result<Producer<T>, BufferError> {
        self.typed::<T>()?.producer()
    }

    pub fn consumer<T: Sample>(&self) -> Result<Consumer<T>, BufferError> {
        self.typed::<T>()?.consumer()
    }
}

impl fmt::Debug for SharedRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRing")
            .field("format", &self.format)
            .field("capacity", &self.capacity())
            .field("byte_len", &self.byte_len())
            .finish()
    }
}
