//! The graph coordinator: owns the clock, allocator, recorder set, and the
//! shared incoming-audio stream; drives the per-quantum pump.
//!
//! Grounded in `examples/original_source/NowSoundLib/NowSoundGraph.cpp`
//! (`HandleIncomingAudio` for the pump algorithm) and the teacher's
//! `Engine`/`stopped: Arc<AtomicBool>` idiom (`engine/mod.rs`) for the
//! `changing_state` re-entrancy guard.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::BufferAllocator;
use crate::clock::{Clock, TimeInfo};
use crate::config::EngineConfig;
use crate::recorder::Recorder;
use crate::stream::BufferedSliceStream;
use crate::time::{AudioSample, Duration, Time};
use crate::track::{SharedAllocator, Track, TrackId, TrackInfo, TrackState};
use crate::utils::key_generator::KeyGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Uninitialized,
    Initialized,
    Created,
    Running,
    InError,
}

/// Shares one [`Track`] between the control-thread-facing `tracks` map and the
/// audio-thread recorder set, so both can mutate it without the graph owning
/// two copies (spec.md §5: track streams are "mutated only by the track's own
/// code", from whichever thread currently holds this lock).
#[derive(Clone)]
struct TrackHandle(Arc<Mutex<Track>>);
impl TrackHandle {
    fn new(track: Track) -> Self {
        TrackHandle(Arc::new(Mutex::new(track)))
    }
    fn with<R>(&self, f: impl FnOnce(&mut Track) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }
}
impl Debug for TrackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.lock().unwrap().fmt(f)
    }
}
impl Recorder for TrackHandle {
    fn record(&mut self, duration: Duration<AudioSample>, samples: &[f32]) -> bool {
        self.0.lock().unwrap().record(duration, samples)
    }
}

/// The always-on recorder registered at `start_audio_graph`: feeds the shared
/// rolling capture buffer that newly created tracks copy their pre-recording
/// window from.
struct IncomingAudioRecorder {
    stream: Arc<Mutex<BufferedSliceStream<AudioSample, f32>>>,
    allocator: SharedAllocator,
    max_duration: Duration<AudioSample>,
}
impl Debug for IncomingAudioRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingAudioRecorder").finish()
    }
}
impl Recorder for IncomingAudioRecorder {
    fn record(&mut self, _duration: Duration<AudioSample>, samples: &[f32]) -> bool {
        let mut stream = self.stream.lock().unwrap();
        let mut allocator = self.allocator.lock().unwrap();
        stream.append_raw(&mut allocator, samples);
        stream.trim(self.max_duration, &mut allocator);
        true
    }
}

/// Insertion-ordered recorder set with pending-addition staging (spec.md §5's
/// tie-break rule: removals are visible immediately within the quantum that
/// produced them; additions become visible starting the following quantum).
#[derive(Debug, Default)]
struct RecorderSet {
    active: Vec<Box<dyn Recorder>>,
    pending: Vec<Box<dyn Recorder>>,
}
impl RecorderSet {
    fn stage(&mut self, recorder: Box<dyn Recorder>) {
        self.pending.push(recorder);
    }
    fn flush_pending(&mut self) {
        self.active.append(&mut self.pending);
    }
}

pub struct Graph {
    config: EngineConfig,
    state: Mutex<GraphState>,
    changing_state: AtomicBool,
    clock: Mutex<Option<Clock>>,
    allocator: SharedAllocator,
    incoming_stream: Arc<Mutex<BufferedSliceStream<AudioSample, f32>>>,
    recorders: Mutex<RecorderSet>,
    tracks: Mutex<HashMap<TrackId, TrackHandle>>,
    track_ids: Mutex<KeyGenerator<TrackId>>,
}
impl Graph {
    pub fn new(config: EngineConfig) -> Self {
        Graph {
            allocator: Arc::new(Mutex::new(BufferAllocator::new(
                config.buffer_size_in_samples,
                config.initial_buffer_count,
            ))),
            incoming_stream: Arc::new(Mutex::new(BufferedSliceStream::new(Time::zero(), config.channel_count as usize))),
            config,
            state: Mutex::new(GraphState::Uninitialized),
            changing_state: AtomicBool::new(false),
            clock: Mutex::new(None),
            recorders: Mutex::new(RecorderSet::default()),
            tracks: Mutex::new(HashMap::new()),
            track_ids: Mutex::new(KeyGenerator::new()),
        }
    }

    pub fn state(&self) -> GraphState {
        *self.state.lock().unwrap()
    }

    fn begin_transition(&self) {
        let already_changing = self.changing_state.swap(true, Ordering::AcqRel);
        assert!(!already_changing, "graph state transition already in progress");
    }
    fn end_transition(&self, new_state: GraphState) {
        *self.state.lock().unwrap() = new_state;
        self.changing_state.store(false, Ordering::Release);
    }
    fn require_state(&self, expected: GraphState) {
        let actual = self.state();
        assert_eq!(actual, expected, "expected graph state {expected:?}, found {actual:?}");
    }

    /// `initializeAsync` in spec.md §6, `Uninitialized -> Initialized`.
    pub fn initialize(&self) {
        self.begin_transition();
        self.require_state(GraphState::Uninitialized);
        tracing::info!("graph initialized");
        self.end_transition(GraphState::Initialized);
    }

    /// `createAudioGraphAsync`, `Initialized -> Created`. Constructs the
    /// [`Clock`] from the configured sample rate.
    pub fn create_audio_graph(&self) {
        self.begin_transition();
        self.require_state(GraphState::Initialized);
        let clock = Clock::new(
            self.config.bpm(),
            self.config.beats_per_measure,
            self.config.channel_count,
            self.config.sample_rate_hz,
        );
        *self.clock.lock().unwrap() = Some(clock);
        tracing::info!("audio graph created");
        self.end_transition(GraphState::Created);
    }

    /// `startAudioGraphAsync`, `Created -> Running`. Registers the always-on
    /// incoming-audio recorder; after this call quanta may be pumped.
    pub fn start_audio_graph(&self) {
        self.begin_transition();
        self.require_state(GraphState::Created);
        self.recorders.lock().unwrap().stage(Box::new(IncomingAudioRecorder {
            stream: self.incoming_stream.clone(),
            allocator: self.allocator.clone(),
            max_duration: Duration::new(self.config.pre_recording_duration_samples),
        }));
        tracing::info!("audio graph started");
        self.end_transition(GraphState::Running);
    }

    /// A host-originated async failure transitions the graph to the terminal
    /// `InError` state (spec.md §7); unlike the other transitions this can
    /// happen from any state, since it reports a failure rather than
    /// advancing the happy path.
    pub fn mark_in_error(&self, reason: impl std::fmt::Display) {
        tracing::error!(%reason, "graph entering error state");
        *self.state.lock().unwrap() = GraphState::InError;
    }

    fn clock(&self) -> Clock {
        self.clock
            .lock()
            .unwrap()
            .clone()
            .expect("clock not initialized (graph must be at least Created)")
    }

    pub fn time_info(&self) -> TimeInfo {
        self.clock().time_info()
    }

    /// Per-quantum pump (spec.md §4.8): advances the clock, then delivers the
    /// quantum to every active recorder under a single lock. `reported_latency`
    /// is the host's reported output latency in samples, used only on the very
    /// first quantum to trim device-startup backlog (spec.md §9's canonical
    /// single clamp, replacing the original's two inconsistent formulas).
    pub fn pump(&self, raw_input: &[f32], reported_latency_samples: usize) {
        self.require_state(GraphState::Running);
        let channel_count = self.config.channel_count as usize;
        assert_eq!(raw_input.len() % channel_count, 0, "input length must be a whole number of frames");

        let clock = self.clock();
        let trimmed = if clock.now() == Time::zero() {
            self.clip_startup_backlog(raw_input, reported_latency_samples, channel_count)
        } else {
            raw_input
        };

        let duration = Duration::new((trimmed.len() / channel_count) as i64);
        clock.advance_from_audio_graph(duration);

        let mut recorders = self.recorders.lock().unwrap();
        recorders.flush_pending();
        recorders.active.retain_mut(|r| r.record(duration, trimmed));
    }

    /// Keeps only the most recent `latency_samples` frames of `raw`, dropping
    /// whatever precedes them: a backend can hand back a large backlog of
    /// already-stale frames as its very first callback, and only the tail is
    /// actually current (spec.md §9; `original_source/NowSoundLib/NowSoundGraph.cpp`'s
    /// `HandleIncomingAudio` keeps `_audioGraph.LatencyInSamples()` frames from
    /// the tail of the first buffer for the same reason).
    fn clip_startup_backlog<'a>(&self, raw: &'a [f32], reported_latency_samples: usize, channel_count: usize) -> &'a [f32] {
        let latency_samples = if reported_latency_samples == 0 {
            self.config.buffer_size_in_samples
        } else {
            reported_latency_samples
        };
        let frames = raw.len() / channel_count;
        let keep = latency_samples.min(frames);
        let drop = frames - keep;
        &raw[drop * channel_count..]
    }

    /// `createRecordingTrack`: assigns the next id, seeds the track's
    /// pre-recording window from the shared incoming stream, and stages it for
    /// the recorder set.
    pub fn create_recording_track(&self) -> TrackId {
        self.require_state(GraphState::Running);
        let clock = self.clock();
        let id = self
            .track_ids
            .lock()
            .unwrap()
            .next()
            .expect("track id space exhausted");

        let mut track = Track::new(id, 0, clock, self.config.channel_count as usize, self.config.use_exact_loop, self.allocator.clone());
        {
            let incoming = self.incoming_stream.lock().unwrap();
            track.prepend_pre_recording(&incoming, Duration::new(self.config.pre_recording_duration_samples));
        }

        let handle = TrackHandle::new(track);
        self.tracks.lock().unwrap().insert(id, handle.clone());
        self.recorders.lock().unwrap().stage(Box::new(handle));

        tracing::info!(track_id = ?id, "recording track created");
        id
    }

    fn track_handle(&self, id: TrackId) -> TrackHandle {
        self.tracks
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| panic!("no such track: {id:?}"))
    }

    pub fn track_state(&self, id: TrackId) -> TrackState {
        self.track_handle(id).with(|t| t.state())
    }
    pub fn track_info(&self, id: TrackId) -> TrackInfo {
        self.track_handle(id).with(|t| t.info())
    }
    pub fn finish_recording(&self, id: TrackId) {
        self.track_handle(id).with(|t| t.finish_recording())
    }
    pub fn is_track_muted(&self, id: TrackId) -> bool {
        self.track_handle(id).with(|t| t.is_muted())
    }
    pub fn set_track_muted(&self, id: TrackId, muted: bool) {
        self.track_handle(id).with(|t| t.set_is_muted(muted))
    }
    pub fn track_pan(&self, id: TrackId) -> f32 {
        self.track_handle(id).with(|t| t.pan())
    }
    pub fn set_track_pan(&self, id: TrackId, pan: f32) {
        self.track_handle(id).with(|t| t.set_pan(pan))
    }
    pub fn delete_track(&self, id: TrackId) {
        self.track_handle(id).with(|t| t.delete());
        self.tracks.lock().unwrap().remove(&id);
    }

    /// Fills `output` (interleaved stereo) by mixing every `Looping` track's
    /// contribution for this quantum.
    pub fn mix_looping_tracks(&self, required_samples: Duration<AudioSample>, output: &mut [f32]) {
        output.fill(0.0);
        let mut scratch = vec![0.0f32; output.len()];
        for handle in self.tracks.lock().unwrap().values() {
            handle.with(|track| {
                if track.state() != TrackState::Looping {
                    return;
                }
                track.frame_input_node_quantum_started(required_samples, &mut scratch);
                for (mixed, contribution) in output.iter_mut().zip(scratch.iter()) {
                    *mixed += contribution;
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_graph(config: EngineConfig) -> Graph {
        let graph = Graph::new(config);
        graph.initialize();
        graph.create_audio_graph();
        graph.start_audio_graph();
        graph
    }

    #[test]
    fn state_machine_happy_path() {
        let graph = Graph::new(EngineConfig::default());
        assert_eq!(graph.state(), GraphState::Uninitialized);
        graph.initialize();
        assert_eq!(graph.state(), GraphState::Initialized);
        graph.create_audio_graph();
        assert_eq!(graph.state(), GraphState::Created);
        graph.start_audio_graph();
        assert_eq!(graph.state(), GraphState::Running);
    }

    #[test]
    #[should_panic]
    fn out_of_order_transition_is_contract_failure() {
        let graph = Graph::new(EngineConfig::default());
        graph.create_audio_graph();
    }

    #[test]
    fn recording_to_looping_end_to_end() {
        // spec.md §8 scenario 5: bpm=60, beatsPerMeasure=4, 4 quanta of 12000 samples.
        let config = EngineConfig {
            bpm_cents: 6000,
            beats_per_measure: 4,
            channel_count: 2,
            sample_rate_hz: 48000,
            buffer_size_in_samples: 4096,
            initial_buffer_count: 2,
            pre_recording_duration_samples: 0,
            use_exact_loop: false,
        };
        let graph = running_graph(config);

        let id = graph.create_recording_track();
        assert_eq!(graph.track_state(id), TrackState::Recording);

        let quantum: Vec<f32> = vec![0.5; 12000 * 2];
        for _ in 0..4 {
            graph.pump(&quantum, 0);
        }
        graph.finish_recording(id);
        assert_eq!(graph.track_state(id), TrackState::FinishRecording);

        // The startup-latency clamp (first quantum only) may have trimmed a few
        // samples, so feed quanta until the track reaches its exact target and
        // transitions itself to Looping.
        for _ in 0..4 {
            if graph.track_state(id) == TrackState::Looping {
                break;
            }
            graph.pump(&quantum, 1);
        }

        assert_eq!(graph.track_state(id), TrackState::Looping);
        let info = graph.track_info(id);
        assert_eq!(info.beat_duration, crate::time::Duration::new(1));
        assert_eq!(info.exact_duration, Some(crate::time::ContinuousDuration::new(48000.0)));
    }
}
