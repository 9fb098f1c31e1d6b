//! Create a new empty snapshot.

use std::path::PathBuf;

use framewright_project_model::project::ProjectSnapshot;

pub fn run(path: PathBuf, name: String, width: u32, height: u32, fps: f64) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("Refusing to overwrite {}", path.display());
    }
    if !(fps.is_finite() && fps > 0.0) {
        anyhow::bail!("Frame rate must be positive, got {fps}");
    }

    let project = ProjectSnapshot::new(&name, width, height, fps);
    project
        .save(&path)
        .map_err(|e| anyhow::anyhow!("Failed to save project: {e}"))?;

    println!("Created project '{name}' at {}", path.display());
    println!("  Canvas: {width}x{height} @ {fps}fps");
    Ok(())
}
