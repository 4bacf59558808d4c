//! Real-time I/O driver: opens the process default input and output devices
//! and drives [`Graph::pump`]/[`Graph::mix_looping_tracks`] from their
//! callbacks.
//!
//! Grounded in the teacher's `engine::Engine` (`engine/mod.rs`): the same
//! `stopped: Arc<AtomicBool>` park/unpark idiom for the owning thread (`cpal`
//! streams aren't `Send`, so they have to live on the thread that creates
//! them), the same `Drop` impl to join it, and the same `dummy()` no-device
//! harness shape for tests. Device/host enumeration and file pickers stay out
//! of scope (spec.md §1); this only ever opens the default devices.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use crate::config::EngineConfig;
use crate::graph::Graph;
use crate::time::{AudioSample, Duration};

/// Owns the live `cpal` streams (on their dedicated thread) and the [`Graph`]
/// they drive. Input frames are pumped into the graph as they arrive; output
/// frames are filled by mixing the graph's looping tracks.
pub struct NowSoundEngine {
    graph: Arc<Graph>,
    stopped: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}
impl NowSoundEngine {
    /// Opens the default input and output `cpal` devices at `config`'s sample
    /// rate and channel count, and starts pumping.
    pub fn new(config: EngineConfig) -> Self {
        let graph = Arc::new(Graph::new(config));
        graph.initialize();
        graph.create_audio_graph();
        graph.start_audio_graph();

        let stream_config = StreamConfig {
            channels: config.channel_count,
            sample_rate: cpal::SampleRate(config.sample_rate_hz),
            buffer_size: cpal::BufferSize::Default,
        };

        let stopped = Arc::new(AtomicBool::new(false));
        let thread_stopped = Arc::clone(&stopped);
        let thread_graph = Arc::clone(&graph);

        let join_handle = thread::spawn(move || {
            // cpal::Stream isn't Send, so both streams and the thread that
            // plays them have to be built here rather than handed in.
            let host = cpal::default_host();
            let input_device = host.default_input_device().expect("no input device available");
            let output_device = host.default_output_device().expect("no output device available");

            let input_stream = build_input_stream(&input_device, &stream_config, Arc::clone(&thread_graph));
            let output_stream = build_output_stream(&output_device, &stream_config, Arc::clone(&thread_graph));

            input_stream.play().expect("failed to start input stream");
            output_stream.play().expect("failed to start output stream");

            tracing::info!(
                input = %input_device.name().unwrap_or_default(),
                output = %output_device.name().unwrap_or_default(),
                "audio streams started"
            );

            while !thread_stopped.load(Ordering::Acquire) {
                thread::park();
            }

            drop(input_stream);
            drop(output_stream);
            tracing::info!("audio streams stopped");
        });

        NowSoundEngine {
            graph,
            stopped,
            join_handle: Some(join_handle),
        }
    }

    /// A no-device harness that pumps synthetic quanta at a fixed buffer size
    /// instead of opening real streams, for integration tests that need a
    /// running graph without real hardware.
    pub fn dummy(config: EngineConfig) -> Self {
        let graph = Arc::new(Graph::new(config));
        graph.initialize();
        graph.create_audio_graph();
        graph.start_audio_graph();

        let stopped = Arc::new(AtomicBool::new(false));
        let thread_stopped = Arc::clone(&stopped);
        let thread_graph = Arc::clone(&graph);
        let buffer_size = config.buffer_size_in_samples;
        let channel_count = config.channel_count as usize;

        let join_handle = thread::spawn(move || {
            let quantum = vec![0.0f32; buffer_size * channel_count];
            while !thread_stopped.load(Ordering::Acquire) {
                thread_graph.pump(&quantum, 0);
                let mut scratch = vec![0.0f32; buffer_size * channel_count];
                thread_graph.mix_looping_tracks(Duration::<AudioSample>::new(buffer_size as i64), &mut scratch);
            }
        });

        NowSoundEngine {
            graph,
            stopped,
            join_handle: Some(join_handle),
        }
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }
}
impl Drop for NowSoundEngine {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        let join_handle = self.join_handle.take().expect("engine stopped more than once");
        join_handle.thread().unpark();
        join_handle.join().unwrap();
    }
}

fn build_input_stream(device: &cpal::Device, config: &StreamConfig, graph: Arc<Graph>) -> Stream {
    let sample_format = device.default_input_config().map(|c| c.sample_format()).unwrap_or(SampleFormat::F32);
    assert_eq!(sample_format, SampleFormat::F32, "only f32 input devices are supported");
    device
        .build_input_stream(
            config,
            move |data: &[f32], info: &cpal::InputCallbackInfo| {
                let latency_samples = info
                    .timestamp()
                    .callback
                    .duration_since(&info.timestamp().capture)
                    .map(|d| (d.as_secs_f64() * config.sample_rate.0 as f64) as usize)
                    .unwrap_or(0);
                graph.pump(data, latency_samples);
            },
            |err| tracing::error!(%err, "input stream error"),
            None,
        )
        .expect("failed to build input stream")
}

fn build_output_stream(device: &cpal::Device, config: &StreamConfig, graph: Arc<Graph>) -> Stream {
    let sample_format = device.default_output_config().map(|c| c.sample_format()).unwrap_or(SampleFormat::F32);
    assert_eq!(sample_format, SampleFormat::F32, "only f32 output devices are supported");
    let channel_count = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info| {
                let required_samples = Duration::<AudioSample>::new((data.len() / channel_count) as i64);
                graph.mix_looping_tracks(required_samples, data);
            },
            |err| tracing::error!(%err, "output stream error"),
            None,
        )
        .expect("failed to build output stream")
}
