//! The musical clock, queried through `Graph::time_info`.

use nowsound::{EngineConfig, Graph};

fn running_graph(config: EngineConfig) -> Graph {
    let graph = Graph::new(config);
    graph.initialize();
    graph.create_audio_graph();
    graph.start_audio_graph();
    graph
}

#[test]
fn time_starts_at_zero() {
    let graph = running_graph(EngineConfig::default());
    let info = graph.time_info();
    assert_eq!(info.now, nowsound::Time::zero());
    assert_eq!(info.exact_beat, 0.0);
    assert_eq!(info.beat_in_measure, 0);
}

#[test]
fn time_advances_with_pumped_quanta() {
    // 120bpm, 4/4, 48kHz -> 24000 samples per beat.
    let config = EngineConfig {
        bpm_cents: 12000,
        beats_per_measure: 4,
        channel_count: 2,
        sample_rate_hz: 48000,
        buffer_size_in_samples: 24000,
        initial_buffer_count: 2,
        pre_recording_duration_samples: 0,
        use_exact_loop: true,
    };
    let graph = running_graph(config);

    // The very first quantum is subject to the startup-backlog clamp, which
    // keeps only the most recent `reported_latency` frames; report a latency
    // one short of the full quantum so it admits all but one sample and
    // leaves the clock no longer at zero.
    let first_quantum = vec![0.0f32; 24000 * 2];
    graph.pump(&first_quantum, 23999);
    assert_eq!(graph.time_info().now, nowsound::Time::new(23999));

    // Top up the remaining single sample with a quantum of exactly that size;
    // the clock is no longer at zero, so no further clamping applies.
    let topup = vec![0.0f32; 1 * 2];
    graph.pump(&topup, 0);

    let info = graph.time_info();
    assert_eq!(info.now, nowsound::Time::new(24000));
    assert_eq!(info.exact_beat, 1.0);
    assert_eq!(info.beat_in_measure, 1);
}

#[test]
fn bpm_is_reported_from_config() {
    let config = EngineConfig {
        bpm_cents: 9000,
        ..EngineConfig::default()
    };
    let graph = running_graph(config);
    assert_eq!(graph.time_info().bpm, 90.0);
}
