//! Play the timeline headlessly through the render loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use framewright_common::clock::{PlaybackClock, RateController};
use framewright_common::config::AppConfig;
use framewright_render_engine::{AudioScheduler, RenderLoop, TracingAudioSink};

use super::{build_renderer, load_render_snapshot, output_size};

/// How often the audio scheduler samples the clock.
const AUDIO_POLL: Duration = Duration::from_millis(10);

pub async fn run(
    config: &AppConfig,
    path: PathBuf,
    from: f64,
    seconds: f64,
    width: Option<u32>,
    height: Option<u32>,
    synthetic: bool,
) -> anyhow::Result<()> {
    let snapshot = load_render_snapshot(&path)?;
    if !snapshot.has_anything_to_render() {
        anyhow::bail!("Nothing to play: the timeline is empty");
    }
    let size = output_size(&snapshot, width, height);
    let renderer = Arc::new(build_renderer(config, size, synthetic));

    let clock = Arc::new(PlaybackClock::new());
    clock.set_duration(Some(snapshot.timeline.total_duration()));
    clock.seek(from.max(0.0));

    let (_snapshots, receiver) = watch::channel(Arc::clone(&snapshot));
    let render_loop = RenderLoop::spawn(
        Arc::clone(&renderer),
        receiver,
        clock.clone(),
        config.playback.refresh_hz,
    );
    let mut display = render_loop.display().subscribe();

    let sink = Arc::new(TracingAudioSink::new());
    let mut audio = AudioScheduler::new(sink, config.playback.audio_schedule_lead_secs);

    println!(
        "Playing '{}' from {:.2}s for {:.1}s at {}Hz ({}x{})",
        snapshot.settings.name,
        clock.current_time(),
        seconds,
        config.playback.refresh_hz,
        size.width,
        size.height
    );
    clock.play();

    let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    let mut report = RateController::new(1);
    let mut audio_poll = tokio::time::interval(AUDIO_POLL);
    let mut presented = 0u64;
    let mut cache_hits = 0u64;
    let mut incomplete = 0u64;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            changed = display.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(frame) = display.borrow_and_update().as_ref() {
                    presented += 1;
                    cache_hits += u64::from(frame.cache_hit);
                    incomplete += u64::from(!frame.complete);
                }
            }
            _ = audio_poll.tick() => {
                audio.update(&clock.status(), &snapshot);
                if report.should_tick() {
                    let stats = renderer.cache().stats();
                    println!(
                        "  t={:>7.3}s presented={presented} hits={cache_hits} incomplete={incomplete} cached={} ({} KB)",
                        clock.current_time(),
                        stats.entries,
                        stats.resident_bytes / 1024
                    );
                }
                if !clock.is_playing() {
                    println!("  reached end of timeline");
                    break;
                }
            }
        }
    }

    clock.pause();
    audio.update(&clock.status(), &snapshot);
    render_loop.shutdown().await;

    let stats = renderer.cache().stats();
    let media = renderer.compositor().media().stats();
    println!();
    println!("Frames presented: {presented}");
    println!("  From cache: {cache_hits}");
    println!("  Incomplete: {incomplete}");
    println!(
        "Frame cache: {} entries, {} hits, {} misses, {} evictions, {} prerendered",
        stats.entries, stats.hits, stats.misses, stats.evictions, stats.prerendered
    );
    println!(
        "Media: {} sources, {} seeks, {} timeouts, {} predictive decodes",
        media.sources, media.raw_seeks, media.seek_timeouts, media.predictive_decodes
    );
    Ok(())
}
