//! The musical clock: a monotonic sample counter shared between the audio
//! thread (writer) and control threads (readers), plus sample↔beat conversion.
//!
//! Grounded in `examples/original_source/NowSoundLibShared/Time.h` for the
//! conversion formulas and in spec.md §9's replacement of a true singleton with
//! a process-scoped handle, modeled the way the teacher's `Timestamp` carries
//! its `bpm_cents`/`sample_rate` context alongside the raw count.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::time::{AudioSample, Beat, Duration, Time};

struct ClockInner {
    now: AtomicI64,
    sample_rate_hz: u32,
    bpm: f32,
    beats_per_measure: u16,
    channel_count: u16,
    #[cfg(debug_assertions)]
    audio_thread: std::sync::Mutex<Option<std::thread::ThreadId>>,
}

/// A cheap-to-clone handle onto shared clock state. `advance_from_audio_graph`
/// must only ever be called from the audio thread; every other method is safe
/// to call from any thread.
#[derive(Clone)]
pub struct Clock {
    inner: Arc<ClockInner>,
}
impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("now", &self.now())
            .field("bpm", &self.inner.bpm)
            .field("sample_rate_hz", &self.inner.sample_rate_hz)
            .finish()
    }
}
impl Clock {
    /// `Initialize` in spec.md §4.2, renamed to the idiomatic constructor form.
    pub fn new(bpm: f32, beats_per_measure: u16, channel_count: u16, sample_rate_hz: u32) -> Self {
        assert!(bpm > 0.0, "bpm must be positive");
        assert!(sample_rate_hz > 0, "sample_rate_hz must be positive");
        tracing::debug!(bpm, beats_per_measure, channel_count, sample_rate_hz, "clock initialized");
        Clock {
            inner: Arc::new(ClockInner {
                now: AtomicI64::new(0),
                sample_rate_hz,
                bpm,
                beats_per_measure,
                channel_count,
                #[cfg(debug_assertions)]
                audio_thread: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn now(&self) -> Time<AudioSample> {
        Time::new(self.inner.now.load(Ordering::Relaxed))
    }
    pub fn bpm(&self) -> f32 {
        self.inner.bpm
    }
    pub fn beats_per_measure(&self) -> u16 {
        self.inner.beats_per_measure
    }
    pub fn channel_count(&self) -> u16 {
        self.inner.channel_count
    }
    pub fn sample_rate_hz(&self) -> u32 {
        self.inner.sample_rate_hz
    }

    pub fn samples_per_beat(&self) -> f64 {
        60.0 * self.inner.sample_rate_hz as f64 / self.inner.bpm as f64
    }

    /// Advances `now` by `duration`. Audio-thread only; in debug builds the
    /// first caller's thread is remembered and every later call is checked
    /// against it, since a second thread calling this would mean two graphs
    /// (or two callback threads) racing the same clock.
    pub fn advance_from_audio_graph(&self, duration: Duration<AudioSample>) {
        debug_assert!(duration.value() >= 0, "clock cannot advance by a negative duration");
        #[cfg(debug_assertions)]
        {
            let this_thread = std::thread::current().id();
            let mut audio_thread = self.inner.audio_thread.lock().unwrap();
            match *audio_thread {
                Some(expected) => debug_assert_eq!(expected, this_thread, "clock advanced from more than one thread"),
                None => *audio_thread = Some(this_thread),
            }
        }
        self.inner.now.fetch_add(duration.value(), Ordering::Relaxed);
    }

    /// `t · bpm / (60 · sampleRate)`, continuous.
    pub fn time_to_beats(&self, t: Time<AudioSample>) -> f64 {
        t.value() as f64 * self.inner.bpm as f64 / (60.0 * self.inner.sample_rate_hz as f64)
    }

    /// `floor(TimeToBeats(t))`.
    pub fn time_to_complete_beats(&self, t: Time<AudioSample>) -> Duration<Beat> {
        Duration::new(self.time_to_beats(t).floor() as i64)
    }

    /// `b · 60 · sampleRate / bpm`.
    pub fn beats_to_samples(&self, beats: Duration<Beat>) -> Duration<AudioSample> {
        let samples = beats.value() as f64 * self.samples_per_beat();
        Duration::new(samples.round() as i64)
    }

    pub fn time_info(&self) -> TimeInfo {
        let now = self.now();
        let exact_beat = self.time_to_beats(now);
        let complete_beats = self.time_to_complete_beats(now);
        let beat_in_measure = if self.inner.beats_per_measure == 0 {
            0
        } else {
            complete_beats.value().rem_euclid(self.inner.beats_per_measure as i64)
        };
        TimeInfo {
            now,
            exact_beat,
            bpm: self.inner.bpm,
            beat_in_measure,
        }
    }
}

/// Snapshot of clock-derived timing info, bundled for foreign-callable query
/// (spec.md §6's `getTimeInfo`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeInfo {
    pub now: Time<AudioSample>,
    pub exact_beat: f64,
    pub bpm: f32,
    pub beat_in_measure: i64,
}
