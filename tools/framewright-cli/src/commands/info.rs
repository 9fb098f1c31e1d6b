//! Show snapshot information.

use std::path::PathBuf;

use framewright_project_model::project::ProjectSnapshot;
use framewright_project_model::timeline::TimelineElement;

use super::load_snapshot;

pub fn run(path: PathBuf, json: bool) -> anyhow::Result<()> {
    let (project, base_dir) = load_snapshot(&path)?;
    if json {
        return print_json(&project);
    }
    let s = &project.settings;

    println!("Project: {}", s.name);
    println!("  Version: {}", project.version);
    println!("  Created: {}", project.created_at);
    println!("  Modified: {}", project.modified_at);
    println!(
        "  Canvas: {}x{} @ {}fps",
        s.canvas.width, s.canvas.height, s.fps
    );
    println!("  Background: {:?}", s.background.kind);
    println!("  Media root: {}", base_dir.display());
    println!();

    println!("Media ({}):", project.media.len());
    for item in project.media.iter() {
        let duration = item
            .duration
            .map(|d| format!("{d:.2}s"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} [{:?}] {} ({})",
            item.id, item.kind, item.source, duration
        );
    }
    println!();

    println!("Tracks ({}):", project.timeline.tracks.len());
    for track in &project.timeline.tracks {
        let muted = if track.muted { ", muted" } else { "" };
        println!(
            "  {} [{:?}{}] {} elements",
            track.id,
            track.kind,
            muted,
            track.elements.len()
        );
        for element in &track.elements {
            println!("    {}", describe(element));
        }
    }
    println!();

    println!(
        "Total duration: {:.2}s",
        project.timeline.total_duration()
    );
    Ok(())
}

fn describe(element: &TimelineElement) -> String {
    let what = match (element.media_id(), element.as_text()) {
        (Some(media_id), _) => format!("media '{media_id}'"),
        (None, Some(text)) => format!("text {:?}", text.content),
        (None, None) => "empty".to_string(),
    };
    format!(
        "{} {}: {:.2}s..{:.2}s (trim {:.2}/{:.2})",
        element.id,
        what,
        element.start_time,
        element.end_time(),
        element.trim_start,
        element.trim_end
    )
}

fn print_json(project: &ProjectSnapshot) -> anyhow::Result<()> {
    let tracks: Vec<_> = project
        .timeline
        .tracks
        .iter()
        .map(|track| {
            serde_json::json!({
                "id": track.id,
                "kind": track.kind,
                "muted": track.muted,
                "elements": track.elements.len(),
            })
        })
        .collect();
    let summary = serde_json::json!({
        "name": project.settings.name,
        "canvas": project.settings.canvas,
        "fps": project.settings.fps,
        "media": project.media.len(),
        "tracks": tracks,
        "total_duration": project.timeline.total_duration(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
