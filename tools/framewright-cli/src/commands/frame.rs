//! Render one frame to PNG.

use std::path::PathBuf;
use std::time::Duration;

use framewright_common::clock::frame_index_round;
use framewright_common::config::AppConfig;

use super::{build_renderer, load_render_snapshot, output_size};

/// Attempts before giving up on sources that are still decoding.
const SETTLE_ATTEMPTS: u32 = 100;
const SETTLE_DELAY: Duration = Duration::from_millis(20);

pub async fn run(
    config: &AppConfig,
    path: PathBuf,
    time: f64,
    output: PathBuf,
    width: Option<u32>,
    height: Option<u32>,
    synthetic: bool,
) -> anyhow::Result<()> {
    let snapshot = load_render_snapshot(&path)?;
    let size = output_size(&snapshot, width, height);
    let renderer = build_renderer(config, size, synthetic);

    let time = time.max(0.0);
    let outcome = renderer
        .render_settled(&snapshot, time, SETTLE_ATTEMPTS, SETTLE_DELAY)
        .await
        .map_err(|e| anyhow::anyhow!("Render failed: {e}"))?;

    let frame = &outcome.frame;
    let image = image::RgbaImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
        .ok_or_else(|| anyhow::anyhow!("Rendered frame has an invalid pixel buffer"))?;
    image
        .save(&output)
        .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", output.display()))?;

    println!(
        "Frame {} ({:.3}s) -> {} [{}x{}]",
        frame_index_round(time, snapshot.fps()),
        time,
        output.display(),
        size.width,
        size.height
    );
    if !outcome.complete {
        println!("  warning: some layers were still loading and show placeholders");
    }
    if outcome.blur_source_missing {
        println!("  warning: blur background has no video or image to blur");
    }
    Ok(())
}
