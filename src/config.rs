//! Numeric engine configuration.
//!
//! Grounded in the teacher's `engine::config::Config`/`OutputConfig` shape, but
//! covering only the parameters the core data plane actually consumes — device
//! and host enumeration stay out of scope (spec.md §1).

/// `bpm_cents` matches the teacher's `Timestamp::from_samples`/`samples`
/// convention (`src/engine/components/timeline/timestamp.rs`): tempo stored as
/// hundredths of a beat per minute so fractional BPM never needs floats at the
/// config boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub bpm_cents: u16,
    pub beats_per_measure: u16,
    pub channel_count: u16,
    pub sample_rate_hz: u32,
    pub buffer_size_in_samples: usize,
    pub initial_buffer_count: usize,
    /// Length of the rolling pre-recording capture window (spec.md §4.7, §8
    /// scenario 6), in samples.
    pub pre_recording_duration_samples: i64,
    /// Selects `IntervalMapper::ExactLooping` over `SimpleLooping` for newly
    /// shut track streams (spec.md §4.4, §9: exact looping is "mandatory for
    /// correct long-duration playback when BPM does not evenly divide sample
    /// rate").
    pub use_exact_loop: bool,
}
impl EngineConfig {
    pub fn bpm(&self) -> f32 {
        self.bpm_cents as f32 / 100.0
    }
}
impl Default for EngineConfig {
    /// 120 BPM, 4/4, stereo, 48kHz, matching common defaults in the original's
    /// `NowSoundGraphInfo`/`NowSoundTimeInfo` examples.
    fn default() -> Self {
        EngineConfig {
            bpm_cents: 12000,
            beats_per_measure: 4,
            channel_count: 2,
            sample_rate_hz: 48000,
            buffer_size_in_samples: 4096,
            initial_buffer_count: 4,
            pre_recording_duration_samples: 48000 / 5,
            use_exact_loop: true,
        }
    }
}
