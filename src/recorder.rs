//! The callback interface the quantum pump drives every time a block of audio
//! arrives from the host.
//!
//! Grounded in the `Recorder` abstraction implied by `NowSoundTrack.h` /
//! `NowSoundGraph.cpp`'s `HandleIncomingAudio`: each registered recorder gets
//! the same block of input samples, and signals via its return value whether it
//! wants to keep receiving blocks.

use std::fmt::Debug;

use crate::time::{AudioSample, Duration};

/// Something that wants to see every incoming quantum of audio input.
///
/// Implementations must not block or allocate: `record` runs on the real-time
/// audio thread. `Send` because recorders cross from the thread that creates
/// them to the audio thread's recorder set; `Debug` so the graph can log its
/// recorder set on state transitions.
pub trait Recorder: Send + Debug {
    /// Offer `duration` samples of interleaved input starting at `samples`.
    /// Returns `true` to keep recording, `false` to signal the graph may drop
    /// this recorder after this call.
    fn record(&mut self, duration: Duration<AudioSample>, samples: &[f32]) -> bool;
}
