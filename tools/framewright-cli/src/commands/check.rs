//! Check decoders and fonts available on this system.

use framewright_common::config::{config_file_path, AppConfig};
use framewright_media_source::{DecodeBackend, FfmpegCliBackend};
use framewright_render_engine::FontdueRasterizer;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Framewright System Check");
    println!("========================");
    println!();
    println!("Config: {}", config_file_path().display());
    println!();

    let ffmpeg = FfmpegCliBackend::from_config(&config.decode);
    println!("Decoders:");
    println!(
        "  ffmpeg ({}): {}",
        ffmpeg.ffmpeg_bin(),
        status(ffmpeg.is_available())
    );
    println!(
        "  ffprobe ({}): {}",
        ffmpeg.ffprobe_bin(),
        status(ffmpeg.ffprobe_available())
    );
    println!("  still images: built in");
    println!();

    println!("Fonts:");
    match FontdueRasterizer::discover(&config.text.font_dirs) {
        Some(fonts) => println!("  {} face(s) found", fonts.face_count()),
        None => println!("  none found; text renders with block glyphs"),
    }
    for dir in &config.text.font_dirs {
        println!("  searched {}", dir.display());
    }
    println!();

    println!("Caches:");
    println!(
        "  frame cache: {} MB (prerender {} ahead, {} behind)",
        config.cache.frame_cache_budget_mb,
        config.cache.prerender_ahead,
        config.cache.prerender_behind
    );
    println!(
        "  decoded frames: {} MB",
        config.cache.decoded_frame_budget_mb
    );
    println!();

    if !ffmpeg.is_available() {
        println!("Video layers will render as placeholders until ffmpeg is installed.");
    }
    Ok(())
}

fn status(ok: bool) -> &'static str {
    if ok {
        "available"
    } else {
        "not found"
    }
}
