//! Fixed-capacity pooled storage for sample arrays.
//!
//! Grounded in `examples/original_source/NowSoundLib/BufferAllocator.h`: a free
//! list of previously-returned buffers, recycled on `allocate`, with a monotonic
//! id counter (id 0 reserved for the empty buffer) used purely for diagnostics —
//! equality between buffers is backing-array identity, not id.

use std::cell::UnsafeCell;
use std::fmt::Debug;
use std::sync::Arc;

/// A pooled array of `T`, identified by a diagnostic id and compared by the
/// identity of its backing storage.
pub struct Buf<T> {
    id: u64,
    data: Arc<UnsafeCell<Box<[T]>>>,
}
impl<T> Buf<T> {
    fn new(id: u64, data: Box<[T]>) -> Self {
        Buf {
            id,
            data: Arc::new(UnsafeCell::new(data)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn len(&self) -> usize {
        // SAFETY: length never changes after construction, so a shared read is sound
        // even while another Slice holds a reference into this same buffer's data.
        unsafe { (*self.data.get()).len() }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw access to the backing slice. Callers (exclusively `Slice`) are
    /// responsible for not aliasing overlapping mutable accesses; in practice a
    /// stream only ever keeps at most one live mutable slice per buffer.
    ///
    /// # Safety
    /// The caller must ensure no other live reference into this buffer's data is
    /// being read or written concurrently with this one.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn data_mut(&self) -> &mut [T] {
        &mut *self.data.get()
    }
    pub(crate) fn data(&self) -> &[T] {
        // SAFETY: see `data_mut`; read-only access is always sound on its own.
        unsafe { &*self.data.get() }
    }
}
impl<T> Clone for Buf<T> {
    fn clone(&self) -> Self {
        Buf {
            id: self.id,
            data: Arc::clone(&self.data),
        }
    }
}
impl<T> PartialEq for Buf<T> {
    /// Identity, not id: two `Buf`s referring to the same backing array are equal
    /// even across clones, matching spec.md §3 ("Equality is by backing-array
    /// identity, not by id").
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}
impl<T> Eq for Buf<T> {}
impl<T> Debug for Buf<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buf")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}
unsafe impl<T: Send> Send for Buf<T> {}
unsafe impl<T: Sync> Sync for Buf<T> {}

/// Allocates fixed-size `Buf<T>`s, recycling previously-freed ones by array
/// identity. Never fails (grows on demand); the only resource exhaustion is host
/// OOM, per spec.md §4.1.
#[derive(Debug)]
pub struct BufferAllocator<T> {
    buffer_size: usize,
    next_id: u64,
    total_allocated_count: usize,
    free_list: Vec<Buf<T>>,
}
impl<T: Default + Clone> BufferAllocator<T> {
    pub fn new(buffer_size_in_t: usize, initial_buffer_count: usize) -> Self {
        let mut allocator = BufferAllocator {
            buffer_size: buffer_size_in_t,
            next_id: 1, // id 0 reserved for the empty buffer
            total_allocated_count: 0,
            free_list: Vec::with_capacity(initial_buffer_count),
        };
        for _ in 0..initial_buffer_count {
            let buf = allocator.fresh_buf();
            allocator.free_list.push(buf);
        }
        allocator
    }

    fn fresh_buf(&mut self) -> Buf<T> {
        let id = self.next_id;
        self.next_id += 1;
        self.total_allocated_count += 1;
        Buf::new(id, vec![T::default(); self.buffer_size].into_boxed_slice())
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Pops a buffer from the free list, or allocates a fresh one. O(1) either
    /// way, so this is safe to call from the audio thread's hot path.
    pub fn allocate(&mut self) -> Buf<T> {
        match self.free_list.pop() {
            Some(buf) => buf,
            None => self.fresh_buf(),
        }
    }

    /// Returns a buffer to the free list, unless a buffer with the same backing
    /// array is already present there (idempotent free by array identity).
    pub fn free(&mut self, buf: Buf<T>) {
        if self.free_list.iter().any(|existing| *existing == buf) {
            return;
        }
        self.free_list.push(buf);
    }

    pub fn total_reserved_slots(&self) -> usize {
        self.total_allocated_count * self.buffer_size
    }
    pub fn total_free_slots(&self) -> usize {
        self.free_list.len() * self.buffer_size
    }
}
