//! Dense, append-only, eventually-looping sample storage.
//!
//! Grounded in `examples/original_source/NowSoundLib/SliceStream.h`
//! (`SliceStream` / `DenseSliceStream` / `BufferedSliceStream`). A stream starts
//! out open (data can only be appended), and transitions once, via [`shut`], into
//! a read-only looping stream whose recorded extent repeats forever.
//!
//! Two bugs present in the original `BufferedSliceStream::Append` /
//! `InternalAppend` are fixed here rather than reproduced (spec.md §9):
//! the discrete duration is bumped exactly once per appended slice, in
//! [`BufferedSliceStream::append`], and nowhere else.

use crate::buffer::{Buf, BufferAllocator};
use crate::interval_mapper::{IntervalMapper, MappedStream};
use crate::slice::{Slice, TimedSlice};
use crate::time::{AudioSample, ContinuousDuration, Duration, Interval, Time};

/// A dense, append-only sequence of [`Slice`]s, readable by absolute time and,
/// once shut, loopable forever.
pub struct BufferedSliceStream<U, T> {
    initial_time: Time<U>,
    sliver_size: usize,
    slices: Vec<TimedSlice<U, T>>,
    discrete_duration: Duration<U>,
    continuous_duration: ContinuousDuration<AudioSample>,
    is_shut: bool,
    mapper: IntervalMapper,
}
impl<U: Copy, T: Copy + Default> BufferedSliceStream<U, T> {
    pub fn new(initial_time: Time<U>, sliver_size: usize) -> Self {
        BufferedSliceStream {
            initial_time,
            sliver_size,
            slices: Vec::new(),
            discrete_duration: Duration::zero(),
            continuous_duration: ContinuousDuration::new(0.0),
            is_shut: false,
            mapper: IntervalMapper::Identity,
        }
    }

    pub fn initial_time(&self) -> Time<U> {
        self.initial_time
    }
    pub fn sliver_size(&self) -> usize {
        self.sliver_size
    }
    pub fn discrete_duration(&self) -> Duration<U> {
        self.discrete_duration
    }
    pub fn continuous_duration(&self) -> ContinuousDuration<AudioSample> {
        self.continuous_duration
    }
    pub fn is_shut(&self) -> bool {
        self.is_shut
    }
    pub fn is_empty(&self) -> bool {
        self.discrete_duration.is_empty()
    }

    /// Appends one already-pooled slice to the dense sequence, coalescing with
    /// the previous slice when it's adjacent in the same backing buffer. This is
    /// the *only* place `discrete_duration` is incremented, by exactly
    /// `slice.duration()` -- the original's `InternalAppend` instead computed
    /// `_discreteDuration += _discreteDuration + dest.Duration`, silently
    /// doubling the running total on every append after the first.
    pub fn append(&mut self, slice: Slice<U, T>) {
        assert!(!self.is_shut, "cannot append to a shut stream");
        if slice.is_empty() {
            return;
        }

        if let Some(last) = self.slices.last_mut() {
            if last.slice.precedes(&slice) {
                let merged = last.slice.union_with(&slice);
                self.discrete_duration = self.discrete_duration + slice.duration();
                last.slice = merged;
                return;
            }
        }

        let next_time = self.initial_time + self.discrete_duration;
        self.discrete_duration = self.discrete_duration + slice.duration();
        self.slices.push(TimedSlice::new(next_time, slice));
    }

    /// Splits `data` into pool-sized chunks, allocating fresh buffers as needed,
    /// and appends each chunk. Unlike the original's `Append(duration, T*)`,
    /// which re-added the (by then fully decremented) loop-local `duration`
    /// variable to `_discreteDuration` after the copy loop ended -- double
    /// counting when the data spanned more than one buffer, and under/over
    /// counting whenever that variable had been left non-zero by integer
    /// rounding -- this relies entirely on [`append`]'s own bookkeeping.
    pub fn append_raw(&mut self, allocator: &mut BufferAllocator<T>, data: &[T]) {
        assert_eq!(
            data.len() % self.sliver_size,
            0,
            "data length must be a whole number of slivers"
        );
        let mut remaining = data;
        while !remaining.is_empty() {
            let buf: Buf<T> = allocator.allocate();
            let capacity_slivers = buf.len() / self.sliver_size;
            let remaining_slivers = remaining.len() / self.sliver_size;
            let take_slivers = capacity_slivers.min(remaining_slivers);

            let slice: Slice<U, T> = Slice::new(buf, 0, take_slivers as i64, self.sliver_size);
            slice.copy_from_raw(&remaining[..take_slivers * self.sliver_size]);
            self.append(slice);

            remaining = &remaining[take_slivers * self.sliver_size..];
        }
    }

    /// Transitions this stream from open (append-only) to shut (read-only,
    /// looping). `continuous_duration` must round up to exactly
    /// `discrete_duration`; `use_exact_loop` selects between the two looping
    /// mappers.
    pub fn shut(&mut self, continuous_duration: ContinuousDuration<AudioSample>, use_exact_loop: bool) {
        assert!(!self.is_shut, "stream is already shut");
        assert_eq!(
            continuous_duration.value().ceil() as i64,
            self.discrete_duration.value(),
            "continuous_duration must round up to discrete_duration"
        );
        self.continuous_duration = continuous_duration;
        self.is_shut = true;
        self.mapper = if use_exact_loop {
            IntervalMapper::ExactLooping
        } else {
            IntervalMapper::SimpleLooping
        };
    }

    /// Drops slices off the front of the stream, freeing their buffers, until
    /// the recorded extent is at most `max_duration` long. Used for rolling
    /// pre-recording capture on an open stream (spec.md §8 scenario 3).
    pub fn trim(&mut self, max_duration: Duration<U>, allocator: &mut BufferAllocator<T>) {
        assert!(!self.is_shut, "cannot trim a shut stream");
        while self.discrete_duration > max_duration {
            let dropped = self.slices.remove(0);
            self.discrete_duration = self.discrete_duration - dropped.slice.duration();
            self.initial_time = self.initial_time + dropped.slice.duration();
            allocator.free(dropped.slice.buf().clone());
        }
    }

    /// Frees every backing buffer held by this stream back to `allocator`.
    pub fn dispose(&mut self, allocator: &mut BufferAllocator<T>) {
        for ts in self.slices.drain(..) {
            allocator.free(ts.slice.buf().clone());
        }
        self.discrete_duration = Duration::zero();
    }

    /// Binary search for the dense (as-recorded) slice containing `t`.
    fn find_dense_slice(&self, t: Time<U>) -> &TimedSlice<U, T> {
        let idx = self
            .slices
            .partition_point(|ts| ts.initial_time <= t)
            .checked_sub(1)
            .expect("time not covered by any recorded slice");
        let ts = &self.slices[idx];
        assert!(t < ts.interval().end_time(), "time not covered by any recorded slice");
        ts
    }

    /// Maps `input` into recorded (dense) time via this stream's mapper.
    pub fn map_next_sub_interval(&self, input: Interval<U>) -> Interval<U> {
        self.mapper.map_next_sub_interval(self, input)
    }

    /// Returns a view of the largest contiguous prefix of `input` available from
    /// this stream's recorded data (remapped through the looping mapper once
    /// shut), as a [`TimedSlice`] whose `initial_time` is `input`'s own
    /// `initial_time` -- the caller advances by the returned slice's duration and
    /// calls again until `input` is exhausted.
    pub fn get_next_slice_at(&self, input: Interval<U>) -> TimedSlice<U, T> {
        assert!(!input.is_empty(), "cannot read an empty interval");
        let mapped = self.map_next_sub_interval(input);
        assert!(!mapped.is_empty(), "interval not covered by this stream");

        let dense = self.find_dense_slice(mapped.initial_time());
        let rel_offset = (mapped.initial_time() - dense.initial_time).value();
        // `mapped` can run past the end of this particular dense slice (the
        // loop mappers return a duration up to the end of the loop, not the
        // end of whichever pooled buffer happens to be recorded there), so
        // clamp to the intersection with the slice actually found -- the
        // caller advances by the returned duration and calls again for the
        // remainder (spec.md §4.5).
        let available = dense.slice.duration().value() - rel_offset;
        let duration = mapped.duration().value().min(available);
        let sub = dense.slice.subslice(rel_offset, duration);
        TimedSlice::new(input.initial_time(), sub)
    }

    /// Copies `input` (looping as needed, once shut) into `dest`, which must be
    /// exactly `input.duration() * sliver_size` long.
    pub fn copy_to(&self, input: Interval<U>, dest: &mut [T]) {
        assert_eq!(dest.len(), input.duration().value() as usize * self.sliver_size);
        let mut remaining = input;
        let mut dest_offset = 0usize;
        while !remaining.is_empty() {
            let ts = self.get_next_slice_at(remaining);
            let n = ts.slice.duration().value() as usize * self.sliver_size;
            ts.slice.copy_to_raw(&mut dest[dest_offset..dest_offset + n]);
            dest_offset += n;
            remaining = remaining.subinterval_starting_at(ts.slice.duration());
        }
    }
}
impl<U, T> std::fmt::Debug for BufferedSliceStream<U, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedSliceStream")
            .field("sliver_size", &self.sliver_size)
            .field("slice_count", &self.slices.len())
            .field("discrete_duration", &self.discrete_duration.value())
            .field("is_shut", &self.is_shut)
            .finish()
    }
}
impl<U: Copy, T: Copy> MappedStream<U> for BufferedSliceStream<U, T> {
    fn initial_time(&self) -> Time<U> {
        self.initial_time
    }
    fn discrete_duration(&self) -> Duration<U> {
        self.discrete_duration
    }
    fn continuous_duration(&self) -> ContinuousDuration<AudioSample> {
        self.continuous_duration
    }
    fn is_shut(&self) -> bool {
        self.is_shut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::AudioSample;

    fn new_allocator() -> BufferAllocator<f32> {
        BufferAllocator::new(4, 2)
    }

    #[test]
    fn append_and_read_open_stream() {
        let mut allocator = new_allocator();
        let mut stream: BufferedSliceStream<AudioSample, f32> = BufferedSliceStream::new(Time::new(0), 1);

        stream.append_raw(&mut allocator, &[1.0, 2.0, 3.0]);
        stream.append_raw(&mut allocator, &[4.0, 5.0]);

        assert_eq!(stream.discrete_duration(), Duration::new(5));

        let mut dest = [0.0f32; 5];
        stream.copy_to(Interval::new(Time::new(0), Duration::new(5)), &mut dest);
        assert_eq!(dest, [1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn append_raw_does_not_double_count_duration() {
        // Regression test for the original's Append(duration, T*) bug: spans
        // crossing more than one pooled buffer must still land on the exact
        // total length, not some multiple of it.
        let mut allocator = BufferAllocator::new(3, 1);
        let mut stream: BufferedSliceStream<AudioSample, f32> = BufferedSliceStream::new(Time::new(0), 1);

        let data: Vec<f32> = (0..11).map(|i| i as f32).collect();
        stream.append_raw(&mut allocator, &data);

        assert_eq!(stream.discrete_duration(), Duration::new(11));
    }

    #[test]
    fn coalescing_merges_adjacent_same_buffer_slices() {
        let mut allocator: BufferAllocator<f32> = BufferAllocator::new(8, 1);
        let mut stream: BufferedSliceStream<AudioSample, f32> = BufferedSliceStream::new(Time::new(0), 1);

        let buf = allocator.allocate();
        let first: Slice<AudioSample, f32> = Slice::new(buf.clone(), 0, 3, 1);
        let second: Slice<AudioSample, f32> = Slice::new(buf, 3, 2, 1);

        stream.append(first);
        stream.append(second);

        assert_eq!(stream.slices.len(), 1, "adjacent slices of the same buffer should coalesce");
        assert_eq!(stream.discrete_duration(), Duration::new(5));
    }

    #[test]
    fn shut_requires_ceil_of_continuous_duration_to_match() {
        let mut allocator = new_allocator();
        let mut stream: BufferedSliceStream<AudioSample, f32> = BufferedSliceStream::new(Time::new(0), 1);
        stream.append_raw(&mut allocator, &[1.0, 2.0, 3.0]);

        stream.shut(ContinuousDuration::new(2.4), false);
        assert!(stream.is_shut());
        assert_eq!(stream.continuous_duration(), ContinuousDuration::new(2.4));
    }

    #[test]
    fn simple_looping_read_wraps_around() {
        let mut allocator = new_allocator();
        let mut stream: BufferedSliceStream<AudioSample, f32> = BufferedSliceStream::new(Time::new(0), 1);
        stream.append_raw(&mut allocator, &[1.0, 2.0, 3.0]);
        stream.shut(ContinuousDuration::new(3.0), false);

        let mut dest = [0.0f32; 6];
        stream.copy_to(Interval::new(Time::new(3), Duration::new(6)), &mut dest);
        assert_eq!(dest, [1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn read_crosses_multiple_dense_slice_boundaries() {
        // Small buffer capacity forces several separately-allocated (and thus
        // non-coalesced) dense slices; a single `copy_to` spanning all of them
        // must not hand back a sub-slice request longer than any one of those
        // slices actually holds.
        let mut allocator: BufferAllocator<f32> = BufferAllocator::new(2, 0);
        let mut stream: BufferedSliceStream<AudioSample, f32> = BufferedSliceStream::new(Time::new(0), 1);
        let data: Vec<f32> = (0..9).map(|i| i as f32).collect();
        stream.append_raw(&mut allocator, &data);
        assert!(stream.slices.len() > 1, "test setup should produce multiple dense slices");

        stream.shut(ContinuousDuration::new(9.0), false);

        let mut dest = [0.0f32; 9];
        stream.copy_to(Interval::new(Time::new(0), Duration::new(9)), &mut dest);
        assert_eq!(dest, [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);

        // And looping around past the recorded extent also crosses slice
        // boundaries without overrunning any one of them.
        let mut looped = [0.0f32; 4];
        stream.copy_to(Interval::new(Time::new(7), Duration::new(4)), &mut looped);
        assert_eq!(looped, [7.0, 8.0, 0.0, 1.0]);
    }

    #[test]
    fn trim_frees_leading_slices() {
        let mut allocator: BufferAllocator<f32> = BufferAllocator::new(2, 0);
        let mut stream: BufferedSliceStream<AudioSample, f32> = BufferedSliceStream::new(Time::new(0), 1);
        stream.append_raw(&mut allocator, &[1.0, 2.0]);
        stream.append_raw(&mut allocator, &[3.0, 4.0]);
        assert_eq!(stream.discrete_duration(), Duration::new(4));

        stream.trim(Duration::new(2), &mut allocator);
        assert_eq!(stream.discrete_duration(), Duration::new(2));

        let mut dest = [0.0f32; 2];
        stream.copy_to(Interval::new(stream.initial_time(), Duration::new(2)), &mut dest);
        assert_eq!(dest, [3.0, 4.0]);
    }

    #[test]
    fn dispose_returns_all_buffers() {
        let mut allocator: BufferAllocator<f32> = BufferAllocator::new(4, 0);
        let mut stream: BufferedSliceStream<AudioSample, f32> = BufferedSliceStream::new(Time::new(0), 1);
        stream.append_raw(&mut allocator, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(allocator.total_free_slots(), 0);

        stream.dispose(&mut allocator);
        assert!(allocator.total_free_slots() >= 8);
        assert!(stream.is_empty());
    }
}
