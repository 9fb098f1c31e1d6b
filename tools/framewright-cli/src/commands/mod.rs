//! Subcommand implementations.

pub mod check;
pub mod frame;
pub mod info;
pub mod init;
pub mod play;
pub mod validate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use framewright_common::config::AppConfig;
use framewright_media_source::{DecodeBackend, ManagerConfig, MediaSourceManager, SyntheticBackend};
use framewright_project_model::project::{CanvasSize, ProjectSnapshot};
use framewright_render_engine::{
    default_rasterizer, FrameCache, FrameCompositor, PreviewRenderer, RenderSnapshot,
};

/// Load a snapshot; relative media paths resolve against its directory.
pub fn load_snapshot(path: &Path) -> anyhow::Result<(ProjectSnapshot, PathBuf)> {
    let project =
        ProjectSnapshot::load(path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((project, base_dir))
}

/// Load a snapshot and refuse to render an invalid one.
pub fn load_render_snapshot(path: &Path) -> anyhow::Result<Arc<RenderSnapshot>> {
    let (project, base_dir) = load_snapshot(path)?;
    let errors = project.validate();
    if !project.settings.fps.is_finite() || project.settings.fps <= 0.0 {
        anyhow::bail!("Cannot render: {}", errors.join("; "));
    }
    for error in &errors {
        tracing::warn!("{error}");
    }
    Ok(Arc::new(RenderSnapshot::from_project(project, &base_dir)))
}

/// Output size from overrides, falling back to the canvas.
pub fn output_size(snapshot: &RenderSnapshot, width: Option<u32>, height: Option<u32>) -> CanvasSize {
    let canvas = snapshot.settings.canvas;
    CanvasSize::new(
        width.unwrap_or(canvas.width).max(1),
        height.unwrap_or(canvas.height).max(1),
    )
}

/// Build the preview pipeline for one output size.
pub fn build_renderer(config: &AppConfig, output: CanvasSize, synthetic: bool) -> PreviewRenderer {
    let backend: Arc<dyn DecodeBackend> = if synthetic {
        Arc::new(SyntheticBackend::new(output.width, output.height))
    } else {
        Arc::new(framewright_media_source::backend::default_backend(&config.decode))
    };
    let manager = MediaSourceManager::new(backend, ManagerConfig::from_app_config(config));
    let compositor = FrameCompositor::new(
        manager,
        default_rasterizer(&config.text),
        config.text.clone(),
    );
    PreviewRenderer::new(
        Arc::new(compositor),
        Arc::new(FrameCache::from_config(&config.cache)),
        output,
    )
}
