//! Windowed, value-semantic views into a pooled [`Buf`](crate::buffer::Buf).
//!
//! Grounded in `examples/original_source/NowSoundLib/Slice.h`. A `Slice` borrows
//! its backing buffer (a cheap `Arc` clone); it never takes ownership, mirroring
//! the original's raw-pointer-into-owned-array design without the unsafety.

use std::fmt::Debug;
use std::marker::PhantomData;

use crate::buffer::Buf;
use crate::time::{Duration, Time};

/// A view `(buf, offset, duration, sliver_size)` into a pooled buffer, where
/// `sliver_size` is the count of `T` per logical time unit (e.g. 2 for stereo).
pub struct Slice<U, T> {
    buf: Buf<T>,
    offset: i64,
    duration: i64,
    sliver_size: usize,
    _unit: PhantomData<U>,
}
impl<U, T: Copy> Slice<U, T> {
    /// Construct a view into `buf`. Panics (contract failure, spec.md §4.3) if the
    /// requested window does not fit.
    pub fn new(buf: Buf<T>, offset: i64, duration: i64, sliver_size: usize) -> Self {
        assert!(offset >= 0, "Slice offset must be non-negative");
        assert!(duration >= 0, "Slice duration must be non-negative");
        let needed = (offset as usize + duration as usize) * sliver_size;
        assert!(
            needed <= buf.len(),
            "Slice out of bounds: offset {offset} + duration {duration} (sliver {sliver_size}) needs {needed} but buffer has {}",
            buf.len()
        );
        Slice {
            buf,
            offset,
            duration,
            sliver_size,
            _unit: PhantomData,
        }
    }

    /// A slice spanning an entire buffer.
    pub fn whole_buffer(buf: Buf<T>, sliver_size: usize) -> Self {
        let duration = (buf.len() / sliver_size) as i64;
        Slice::new(buf, 0, duration, sliver_size)
    }

    pub fn buf(&self) -> &Buf<T> {
        &self.buf
    }
    pub fn offset(&self) -> i64 {
        self.offset
    }
    pub fn duration(&self) -> Duration<U> {
        Duration::new(self.duration)
    }
    pub fn sliver_size(&self) -> usize {
        self.sliver_size
    }
    pub fn is_empty(&self) -> bool {
        self.duration == 0
    }

    fn byte_offset(&self, offset: i64) -> usize {
        ((self.offset + offset) as usize) * self.sliver_size
    }

    /// Get a single value at `offset` slivers in, `subindex` within the sliver.
    pub fn get(&self, offset: i64, subindex: usize) -> T {
        assert!(offset >= 0 && offset < self.duration, "Slice::get offset out of range");
        assert!(subindex < self.sliver_size, "Slice::get subindex out of range");
        self.buf.data()[self.byte_offset(offset) + subindex]
    }

    /// A sub-window of this slice, `duration` slivers long, starting `initial_offset` in.
    pub fn subslice(&self, initial_offset: i64, duration: i64) -> Self {
        assert!(initial_offset >= 0, "subslice offset must be non-negative");
        assert!(duration >= 0, "subslice duration must be non-negative");
        assert!(
            initial_offset + duration <= self.duration,
            "subslice out of range: {initial_offset} + {duration} > {}",
            self.duration
        );
        Slice {
            buf: self.buf.clone(),
            offset: self.offset + initial_offset,
            duration,
            sliver_size: self.sliver_size,
            _unit: PhantomData,
        }
    }

    /// Everything from `initial_offset` to the end of this slice.
    pub fn subslice_starting_at(&self, initial_offset: i64) -> Self {
        self.subslice(initial_offset, self.duration - initial_offset)
    }

    /// The prefix of this slice of the given duration.
    pub fn subslice_of_duration(&self, duration: i64) -> Self {
        self.subslice(0, duration)
    }

    /// Copy this slice's data into `destination`, which must be at least as long.
    pub fn copy_to(&self, destination: &Self) {
        assert!(destination.duration >= self.duration, "destination slice too short");
        assert_eq!(destination.sliver_size, self.sliver_size, "sliver size mismatch");

        let count = (self.duration as usize) * self.sliver_size;
        let src_start = self.byte_offset(0);
        let dest_start = destination.byte_offset(0);

        if self.buf == destination.buf {
            unsafe {
                let data = destination.buf.data_mut();
                data.copy_within(src_start..src_start + count, dest_start);
            }
        } else {
            let src = &self.buf.data()[src_start..src_start + count];
            unsafe {
                destination.buf.data_mut()[dest_start..dest_start + count].copy_from_slice(src);
            }
        }
    }

    /// Copy this slice's data into a raw destination buffer.
    pub fn copy_to_raw(&self, dest: &mut [T]) {
        let count = (self.duration as usize) * self.sliver_size;
        assert!(dest.len() >= count, "destination buffer too short");
        let src_start = self.byte_offset(0);
        dest[..count].copy_from_slice(&self.buf.data()[src_start..src_start + count]);
    }

    /// Overwrite this slice's data from a raw source buffer.
    pub fn copy_from_raw(&self, source: &[T]) {
        let count = (self.duration as usize) * self.sliver_size;
        assert!(source.len() >= count, "source buffer too short");
        let dest_start = self.byte_offset(0);
        unsafe {
            self.buf.data_mut()[dest_start..dest_start + count].copy_from_slice(&source[..count]);
        }
    }

    /// Are `self` and `next` adjacent slices of the same backing buffer, such
    /// that they could be unioned?
    pub fn precedes(&self, next: &Self) -> bool {
        self.buf == next.buf && self.offset + self.duration == next.offset
    }

    /// Merge two adjacent slices into one. Contract: `self.precedes(next)`.
    pub fn union_with(&self, next: &Self) -> Self {
        assert!(self.precedes(next), "union_with requires self.precedes(next)");
        Slice {
            buf: self.buf.clone(),
            offset: self.offset,
            duration: self.duration + next.duration,
            sliver_size: self.sliver_size,
            _unit: PhantomData,
        }
    }
}
impl<U, T> Clone for Slice<U, T> {
    fn clone(&self) -> Self {
        Slice {
            buf: self.buf.clone(),
            offset: self.offset,
            duration: self.duration,
            sliver_size: self.sliver_size,
            _unit: PhantomData,
        }
    }
}
impl<U, T> Debug for Slice<U, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slice")
            .field("buf_id", &self.buf.id())
            .field("offset", &self.offset)
            .field("duration", &self.duration)
            .field("sliver_size", &self.sliver_size)
            .finish()
    }
}

/// A [`Slice`] paired with its absolute initial time, as stored in a stream's
/// dense sequence.
#[derive(Clone, Debug)]
pub struct TimedSlice<U, T> {
    pub initial_time: Time<U>,
    pub slice: Slice<U, T>,
}
impl<U: Copy, T: Copy> TimedSlice<U, T> {
    pub fn new(initial_time: Time<U>, slice: Slice<U, T>) -> Self {
        TimedSlice { initial_time, slice }
    }

    pub fn interval(&self) -> crate::time::Interval<U> {
        crate::time::Interval::new(self.initial_time, self.slice.duration())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferAllocator;
    use crate::time::AudioSample;

    fn make_buf(values: &[f32]) -> Buf<f32> {
        let mut allocator: BufferAllocator<f32> = BufferAllocator::new(values.len(), 1);
        let buf = allocator.allocate();
        let slice: Slice<AudioSample, f32> = Slice::whole_buffer(buf.clone(), 1);
        slice.copy_from_raw(values);
        buf
    }

    #[test]
    fn get_roundtrip() {
        let buf = make_buf(&[1.0, 2.0, 3.0, 4.0]);
        let slice: Slice<AudioSample, f32> = Slice::new(buf, 0, 4, 1);
        assert_eq!(slice.get(0, 0), 1.0);
        assert_eq!(slice.get(3, 0), 4.0);
    }

    #[test]
    fn union_law() {
        let buf = make_buf(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let a: Slice<AudioSample, f32> = Slice::new(buf.clone(), 0, 3, 1);
        let b: Slice<AudioSample, f32> = Slice::new(buf, 3, 3, 1);
        assert!(a.precedes(&b));

        let u = a.union_with(&b);
        assert_eq!(u.duration(), Duration::new(6));
        for i in 0..3 {
            assert_eq!(u.get(i, 0), a.get(i, 0));
        }
        for i in 0..3 {
            assert_eq!(u.get(3 + i, 0), b.get(i, 0));
        }
    }

    #[test]
    #[should_panic]
    fn out_of_range_is_contract_failure() {
        let buf = make_buf(&[1.0, 2.0]);
        let slice: Slice<AudioSample, f32> = Slice::new(buf, 0, 2, 1);
        slice.get(5, 0);
    }

    #[test]
    fn copy_to_raw_roundtrip() {
        let buf = make_buf(&[9.0, 8.0, 7.0]);
        let slice: Slice<AudioSample, f32> = Slice::new(buf, 0, 3, 1);
        let mut dest = [0.0f32; 3];
        slice.copy_to_raw(&mut dest);
        assert_eq!(dest, [9.0, 8.0, 7.0]);
    }
}
