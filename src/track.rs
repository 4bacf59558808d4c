//! The track state machine: `Recording → FinishRecording → Looping`, plus the
//! permanent `Deleted` sink.
//!
//! Grounded in `examples/original_source/NowSoundLib/NowSoundTrack.h` for the
//! state machine and field set, and in the teacher's
//! `engine/components/track.rs` (`TrackProcessor::pan`) for the stereo-sourced
//! pan crossfade law, reused with its clamp behavior intact and only the
//! panning convention converted from `[-1, 1]` to this crate's `[0, 1]`.

use std::sync::{Arc, Mutex};

use crate::buffer::BufferAllocator;
use crate::clock::Clock;
use crate::recorder::Recorder;
use crate::stream::BufferedSliceStream;
use crate::time::{AudioSample, Beat, ContinuousDuration, Duration, Interval, Time};
use crate::utils::key_generator::{key_type, Key};

/// Handle to the allocator a stream draws buffers from, shared between the
/// owning track and the graph (spec.md §3: a stream "owns ... a reference to
/// the governing `BufferAllocator`"). A `Mutex` rather than a bare reference
/// because `Track::delete` (control thread) and `Track::record` (audio thread)
/// both need mutable access; `allocate`/`free` are O(1) so the critical section
/// stays bounded, matching spec.md §5.
pub type SharedAllocator = Arc<Mutex<BufferAllocator<f32>>>;

key_type!(TrackId, u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Uninitialized,
    Recording,
    FinishRecording,
    Looping,
    Deleted,
}

/// One looping phrase: owns exactly one [`BufferedSliceStream`] (spec.md §3).
#[derive(Debug)]
pub struct Track {
    id: TrackId,
    /// Host audio input node id this track was recorded from. Device
    /// enumeration/multiplexing is out of scope (spec.md §1); this is kept only
    /// for bookkeeping/diagnostics, matching the field set in the original.
    input_id: u32,
    state: TrackState,
    clock: Clock,
    sliver_size: usize,
    beat_duration: Duration<Beat>,
    stream: BufferedSliceStream<AudioSample, f32>,
    start_time: Time<AudioSample>,
    last_sample_time: Time<AudioSample>,
    is_muted: bool,
    /// `0.0` = full left, `1.0` = full right, `0.5` = center.
    pan: f32,
    use_exact_loop: bool,
    allocator: SharedAllocator,
}
impl Track {
    pub fn new(
        id: TrackId,
        input_id: u32,
        clock: Clock,
        sliver_size: usize,
        use_exact_loop: bool,
        allocator: SharedAllocator,
    ) -> Self {
        let start_time = clock.now();
        tracing::info!(track_id = ?id, ?start_time, "track created, recording started");
        Track {
            id,
            input_id,
            state: TrackState::Recording,
            stream: BufferedSliceStream::new(start_time, sliver_size),
            clock,
            sliver_size,
            beat_duration: Duration::zero(),
            start_time,
            last_sample_time: start_time,
            is_muted: false,
            pan: 0.5,
            use_exact_loop,
            allocator,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }
    pub fn input_id(&self) -> u32 {
        self.input_id
    }
    pub fn state(&self) -> TrackState {
        self.state
    }
    pub fn beat_duration(&self) -> Duration<Beat> {
        self.beat_duration
    }
    /// `None` until the track has finished recording (spec.md §6: `track.exactDuration`).
    pub fn exact_duration(&self) -> Option<ContinuousDuration<AudioSample>> {
        self.stream.is_shut().then(|| self.stream.continuous_duration())
    }
    pub fn is_muted(&self) -> bool {
        self.is_muted
    }
    pub fn set_is_muted(&mut self, muted: bool) {
        self.is_muted = muted;
    }
    pub fn pan(&self) -> f32 {
        self.pan
    }
    pub fn set_pan(&mut self, pan: f32) {
        assert!((0.0..=1.0).contains(&pan), "pan must be within [0, 1]");
        self.pan = pan;
    }
    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            id: self.id,
            state: self.state,
            beat_duration: self.beat_duration,
            exact_duration: self.exact_duration(),
            is_muted: self.is_muted,
            pan: self.pan,
        }
    }

    /// Copies the tail of the graph's shared incoming-audio stream into this
    /// track's own stream, so the performer's capture includes audio from just
    /// before the record gesture (spec.md §4.7, §8 scenario 6). Must be called
    /// at most once, before the first `record`.
    pub fn prepend_pre_recording(
        &mut self,
        incoming: &BufferedSliceStream<AudioSample, f32>,
        pre_recording_duration: Duration<AudioSample>,
    ) {
        assert_eq!(self.state, TrackState::Recording);
        assert!(self.stream.is_empty(), "pre-recording must be prepended before any other append");

        let available = incoming.discrete_duration().min(pre_recording_duration);
        if available.is_empty() {
            return;
        }
        let tail_start = incoming.initial_time() + (incoming.discrete_duration() - available);
        let mut scratch = vec![0.0f32; available.value() as usize * self.sliver_size];
        incoming.copy_to(Interval::new(tail_start, available), &mut scratch);
        let mut allocator = self.allocator.lock().unwrap();
        self.stream.append_raw(&mut allocator, &scratch);
    }

    fn update_beat_duration_from_stream(&mut self) {
        let samples_per_beat = self.clock.samples_per_beat();
        let recorded = self.stream.discrete_duration().value() as f64;
        self.beat_duration = Duration::new((recorded / samples_per_beat).ceil() as i64);
    }

    /// External `finishRecording()`: latches `beat_duration` at its current
    /// value and stops growing it; `record` keeps appending until the stream
    /// reaches that many beats' worth of samples.
    pub fn finish_recording(&mut self) {
        assert_eq!(self.state, TrackState::Recording, "finish_recording requires Recording state");
        tracing::info!(track_id = ?self.id, beat_duration = ?self.beat_duration, "finishing recording");
        self.state = TrackState::FinishRecording;
    }

    /// Output pump for a looping track (spec.md §4.7): fills `output`
    /// (interleaved stereo, `required_samples * 2` floats) from the stream,
    /// applying pan and mute, and advances `last_sample_time` by exactly
    /// `required_samples`.
    pub fn frame_input_node_quantum_started(&mut self, required_samples: Duration<AudioSample>, output: &mut [f32]) {
        assert_eq!(self.state, TrackState::Looping, "can only pump output while Looping");
        assert_eq!(output.len(), required_samples.value() as usize * 2, "output buffer must be stereo-sized");

        if self.is_muted {
            output.fill(0.0);
            self.last_sample_time = self.last_sample_time + required_samples;
            return;
        }

        let mut remaining = Interval::new(self.last_sample_time, required_samples);
        let mut out_offset = 0usize;
        while !remaining.is_empty() {
            let timed = self.stream.get_next_slice_at(remaining);
            let n = timed.slice.duration().value() as usize;
            for i in 0..n {
                let (left, right) = match self.sliver_size {
                    1 => {
                        let sample = timed.slice.get(i as i64, 0);
                        (sample * (1.0 - self.pan), sample * self.pan)
                    }
                    2 => {
                        let l = timed.slice.get(i as i64, 0);
                        let r = timed.slice.get(i as i64, 1);
                        let (left_mult, right_mult) = Self::pan_crossfade(self.pan);
                        (l * left_mult, r * right_mult)
                    }
                    other => unreachable!("track sliver size must be 1 or 2, got {other}"),
                };
                output[out_offset] = left;
                output[out_offset + 1] = right;
                out_offset += 2;
            }
            remaining = remaining.subinterval_starting_at(timed.slice.duration());
        }
        self.last_sample_time = self.last_sample_time + required_samples;
    }

    /// Stereo-sourced pan law, adapted from the teacher's `TrackProcessor::pan`
    /// (which takes panning in `[-1, 1]`) to this crate's `pan` in `[0, 1]`.
    // TODO: this clamp-based law isn't equal-power; same limitation the teacher notes.
    fn pan_crossfade(pan: f32) -> (f32, f32) {
        let panning = pan * 2.0 - 1.0;
        let left = (-panning + 1.0).clamp(0.0, 1.0);
        let right = (panning + 1.0).clamp(0.0, 1.0);
        (left, right)
    }

    pub fn delete(&mut self) {
        tracing::info!(track_id = ?self.id, "deleting track");
        let mut allocator = self.allocator.lock().unwrap();
        self.stream.dispose(&mut allocator);
        self.state = TrackState::Deleted;
    }
}
impl Recorder for Track {
    fn record(&mut self, duration: Duration<AudioSample>, samples: &[f32]) -> bool {
        debug_assert_eq!(samples.len(), duration.value() as usize * self.sliver_size);

        match self.state {
            TrackState::Recording => {
                let mut allocator = self.allocator.lock().unwrap();
                self.stream.append_raw(&mut allocator, samples);
                drop(allocator);
                self.update_beat_duration_from_stream();
                true
            }
            TrackState::FinishRecording => {
                // Only ever append up to the exact target, even if the delivered
                // quantum would overshoot it: `shut` requires discrete_duration to
                // land exactly on continuous_duration's ceiling, and the quantum
                // boundary isn't guaranteed to align with the beat boundary (the
                // startup-latency clamp in particular can shift things by a few
                // samples).
                let target = self.clock.beats_to_samples(self.beat_duration);
                let remaining = target - self.stream.discrete_duration();
                let take = remaining.min(duration);
                let take_samples = &samples[..take.value() as usize * self.sliver_size];

                let mut allocator = self.allocator.lock().unwrap();
                self.stream.append_raw(&mut allocator, take_samples);
                drop(allocator);

                if self.stream.discrete_duration() >= target {
                    let continuous_duration = ContinuousDuration::new(
                        self.beat_duration.value() as f32 * (60.0 / self.clock.bpm()) * self.clock.sample_rate_hz() as f32,
                    );
                    self.stream.shut(continuous_duration, self.use_exact_loop);
                    self.last_sample_time = self.clock.now();
                    self.state = TrackState::Looping;
                    tracing::info!(track_id = ?self.id, beat_duration = ?self.beat_duration, "recording finished, now looping");
                    false
                } else {
                    true
                }
            }
            _ => {
                debug_assert!(false, "record() called on a track not in Recording or FinishRecording state");
                false
            }
        }
    }
}

/// Bundled track query result (spec.md §6: `track.info`).
#[derive(Debug, Clone, Copy)]
pub struct TrackInfo {
    pub id: TrackId,
    pub state: TrackState,
    pub beat_duration: Duration<Beat>,
    pub exact_duration: Option<ContinuousDuration<AudioSample>>,
    pub is_muted: bool,
    pub pan: f32,
}
