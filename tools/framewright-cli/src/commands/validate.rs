//! Validate a snapshot.

use std::path::PathBuf;

use super::load_snapshot;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    let (project, base_dir) = load_snapshot(&path)?;

    let mut errors = project.validate();
    for missing in project.missing_media_files(&base_dir) {
        errors.push(format!("Media file not found: {}", missing.display()));
    }

    if errors.is_empty() {
        println!("Project '{}' is valid.", project.settings.name);
        Ok(())
    } else {
        println!("Project '{}' has {} problem(s):", project.settings.name, errors.len());
        for error in &errors {
            println!("  - {error}");
        }
        anyhow::bail!("Validation failed")
    }
}
