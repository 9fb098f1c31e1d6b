//! Text rasterization into coverage masks.
//!
//! A [`TextRasterizer`] turns one line of text into an 8-bit coverage mask.
//! [`layout_text`] stacks lines, applies alignment and decoration, and
//! returns a single mask the compositor tints and places.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fontdue::{Font, FontSettings};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use framewright_common::config::TextConfig;
use framewright_project_model::timeline::{FontStyle, FontWeight, TextAlign, TextDecoration};

/// Font selection for one rasterization.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub family: String,
    pub px: f32,
    pub weight: FontWeight,
    pub style: FontStyle,
}

/// 8-bit coverage of rendered text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextMask {
    pub width: u32,
    pub height: u32,
    pub coverage: Vec<u8>,
    /// Row of the first line's baseline.
    pub baseline: u32,
}

impl TextMask {
    pub fn new(width: u32, height: u32, baseline: u32) -> Self {
        Self {
            width,
            height,
            coverage: vec![0; width as usize * height as usize],
            baseline,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.coverage[y as usize * self.width as usize + x as usize]
    }

    /// Max-combine `value` at `(x, y)`, ignoring positions outside the mask.
    fn accumulate(&mut self, x: i64, y: i64, value: u8) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let i = y as usize * self.width as usize + x as usize;
        self.coverage[i] = self.coverage[i].max(value);
    }

    fn blit(&mut self, other: &TextMask, dx: i64, dy: i64) {
        for y in 0..other.height {
            for x in 0..other.width {
                let value = other.get(x, y);
                if value > 0 {
                    self.accumulate(dx + x as i64, dy + y as i64, value);
                }
            }
        }
    }

    fn fill_rows(&mut self, x0: i64, x1: i64, y0: i64, rows: i64) {
        for y in y0..y0 + rows {
            for x in x0..x1 {
                self.accumulate(x, y, 255);
            }
        }
    }
}

/// Rasterizes single lines of text.
pub trait TextRasterizer: Send + Sync {
    fn name(&self) -> &str;

    /// Rasterize one line. `baseline` on the result is the line's baseline row.
    fn rasterize_line(&self, text: &str, style: &TextStyle) -> TextMask;
}

/// Lay out `content` (split on `\n`) with alignment and decoration.
pub fn layout_text(
    rasterizer: &dyn TextRasterizer,
    content: &str,
    style: &TextStyle,
    align: TextAlign,
    decoration: TextDecoration,
) -> TextMask {
    let lines: Vec<TextMask> = content
        .split('\n')
        .map(|line| rasterizer.rasterize_line(line, style))
        .collect();

    let width = lines.iter().map(|l| l.width).max().unwrap_or(0);
    if width == 0 {
        return TextMask::default();
    }
    let line_height = lines
        .iter()
        .map(|l| l.height)
        .max()
        .unwrap_or(0)
        .max((style.px * 1.2).ceil() as u32);
    let height = line_height.saturating_mul(lines.len() as u32);
    let first_baseline = lines.first().map_or(0, |l| l.baseline);
    let mut mask = TextMask::new(width, height, first_baseline);
    let thickness = ((style.px / 15.0).round() as i64).max(1);

    for (row, line) in lines.iter().enumerate() {
        let dx = match align {
            TextAlign::Left => 0,
            TextAlign::Center => (width - line.width) / 2,
            TextAlign::Right => width - line.width,
        } as i64;
        let dy = row as i64 * i64::from(line_height);
        mask.blit(line, dx, dy);

        if line.width == 0 {
            continue;
        }
        let baseline = dy + line.baseline as i64;
        let x1 = dx + line.width as i64;
        match decoration {
            TextDecoration::None => {}
            TextDecoration::Underline => {
                mask.fill_rows(dx, x1, baseline + thickness, thickness);
            }
            TextDecoration::LineThrough => {
                let y = baseline - (style.px * 0.3).round() as i64;
                mask.fill_rows(dx, x1, y, thickness);
            }
        }
    }
    mask
}

/// Deterministic block glyphs. Used when no font file is available and
/// for placeholder labels in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockGlyphRasterizer;

impl TextRasterizer for BlockGlyphRasterizer {
    fn name(&self) -> &str {
        "block"
    }

    fn rasterize_line(&self, text: &str, style: &TextStyle) -> TextMask {
        let px = style.px.max(1.0);
        let advance = (px * 0.6).ceil().max(1.0) as u32;
        let ascent = (px * 0.8).ceil() as u32;
        let height = px.ceil() as u32;
        let glyph_height = (px * 0.7).ceil() as u32;
        let glyph_width = match style.weight {
            FontWeight::Bold => advance,
            FontWeight::Normal => (advance * 5 / 6).max(1),
        };
        // Italic shifts the top half of each block right by one column.
        let slant = matches!(style.style, FontStyle::Italic) as i64;

        let count = text.chars().count() as u32;
        let mut mask = TextMask::new(advance * count, height, ascent);
        for (i, ch) in text.chars().enumerate() {
            if ch.is_whitespace() {
                continue;
            }
            let x0 = (i as u32 * advance) as i64;
            let top = (ascent - glyph_height) as i64;
            for y in 0..glyph_height as i64 {
                let shift = if y < glyph_height as i64 / 2 { slant } else { 0 };
                for x in 0..glyph_width as i64 {
                    mask.accumulate(x0 + x + shift, top + y, 255);
                }
            }
        }
        mask
    }
}

/// Renders with font files discovered on disk.
pub struct FontdueRasterizer {
    /// Lowercased file stem to path, sorted for a stable fallback face.
    faces: Vec<(String, PathBuf)>,
    loaded: Mutex<HashMap<PathBuf, Arc<Font>>>,
}

impl FontdueRasterizer {
    /// Scan `dirs` for `.ttf` / `.otf` files. `None` when nothing is found.
    pub fn discover(dirs: &[PathBuf]) -> Option<Self> {
        let mut faces = Vec::new();
        for dir in dirs {
            collect_font_files(dir, 0, &mut faces);
        }
        if faces.is_empty() {
            return None;
        }
        faces.sort();
        faces.dedup_by(|a, b| a.0 == b.0);
        info!(count = faces.len(), "Discovered font files");
        Some(Self {
            faces,
            loaded: Mutex::new(HashMap::new()),
        })
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Path of the face used for `style`.
    pub fn resolve(&self, style: &TextStyle) -> Option<&Path> {
        let family = normalize(&style.family);
        let want_bold = style.weight == FontWeight::Bold;
        let want_italic = style.style == FontStyle::Italic;

        let score = |stem: &str| -> Option<u32> {
            let rest = stem.strip_prefix(family.as_str())?;
            let bold = rest.contains("bold") || rest == "bd" || rest == "bi";
            let italic = rest.contains("italic") || rest.contains("oblique") || rest == "i" || rest == "bi";
            let mut score = 0;
            if bold == want_bold {
                score += 2;
            }
            if italic == want_italic {
                score += 2;
            }
            if rest.is_empty() || rest == "regular" {
                score += 1;
            }
            Some(score)
        };

        self.faces
            .iter()
            .filter_map(|(stem, path)| score(stem).map(|s| (s, path)))
            // Highest score wins; ties keep the first in sorted order.
            .fold(None, |best: Option<(u32, &PathBuf)>, (s, path)| match best {
                Some((b, _)) if b >= s => best,
                _ => Some((s, path)),
            })
            .map(|(_, path)| path.as_path())
            .or_else(|| self.faces.first().map(|(_, path)| path.as_path()))
    }

    fn font_for(&self, style: &TextStyle) -> Option<Arc<Font>> {
        let path = self.resolve(style)?.to_path_buf();
        let mut loaded = self.loaded.lock();
        if let Some(font) = loaded.get(&path) {
            return Some(Arc::clone(font));
        }
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read font file");
                return None;
            }
        };
        match Font::from_bytes(bytes, FontSettings::default()) {
            Ok(font) => {
                debug!(path = %path.display(), "Loaded font");
                let font = Arc::new(font);
                loaded.insert(path, Arc::clone(&font));
                Some(font)
            }
            Err(e) => {
                warn!(path = %path.display(), error = e, "Failed to parse font file");
                None
            }
        }
    }
}

impl TextRasterizer for FontdueRasterizer {
    fn name(&self) -> &str {
        "fontdue"
    }

    fn rasterize_line(&self, text: &str, style: &TextStyle) -> TextMask {
        let Some(font) = self.font_for(style) else {
            return BlockGlyphRasterizer.rasterize_line(text, style);
        };
        let px = style.px.max(1.0);
        let (ascent, descent) = font
            .horizontal_line_metrics(px)
            .map(|m| (m.ascent.ceil(), (-m.descent).ceil()))
            .unwrap_or(((px * 0.8).ceil(), (px * 0.2).ceil()));

        let glyphs: Vec<_> = text.chars().map(|ch| font.rasterize(ch, px)).collect();
        let width: f32 = glyphs.iter().map(|(m, _)| m.advance_width).sum();
        let baseline = ascent.max(0.0) as u32;
        let mut mask = TextMask::new(
            width.ceil().max(0.0) as u32,
            (ascent + descent).max(1.0) as u32,
            baseline,
        );

        let mut cursor = 0.0f32;
        for (metrics, bitmap) in &glyphs {
            let gx = cursor.round() as i64 + metrics.xmin as i64;
            let gy = baseline as i64 - (metrics.height as i64 + metrics.ymin as i64);
            for y in 0..metrics.height {
                for x in 0..metrics.width {
                    let value = bitmap[y * metrics.width + x];
                    if value > 0 {
                        mask.accumulate(gx + x as i64, gy + y as i64, value);
                    }
                }
            }
            cursor += metrics.advance_width;
        }
        mask
    }
}

/// Fontdue when any font file is found under `config.font_dirs`, block
/// glyphs otherwise.
pub fn default_rasterizer(config: &TextConfig) -> Arc<dyn TextRasterizer> {
    match FontdueRasterizer::discover(&config.font_dirs) {
        Some(fonts) => Arc::new(fonts),
        None => {
            warn!("No font files found; text renders as block glyphs");
            Arc::new(BlockGlyphRasterizer)
        }
    }
}

fn normalize(family: &str) -> String {
    family
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn collect_font_files(dir: &Path, depth: usize, out: &mut Vec<(String, PathBuf)>) {
    if depth > 4 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_font_files(&path, depth + 1, out);
            continue;
        }
        let is_font = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("ttf") || e.eq_ignore_ascii_case("otf"));
        if !is_font {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            out.push((normalize(stem), path));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style(px: f32) -> TextStyle {
        TextStyle {
            family: "Arial".into(),
            px,
            weight: FontWeight::Normal,
            style: FontStyle::Normal,
        }
    }

    #[test]
    fn test_block_glyphs_are_deterministic() {
        let a = BlockGlyphRasterizer.rasterize_line("Hi there", &style(20.0));
        let b = BlockGlyphRasterizer.rasterize_line("Hi there", &style(20.0));
        assert_eq!(a, b);
        assert_eq!(a.width, 12 * 8);
        assert_eq!(a.height, 20);
        assert_eq!(a.baseline, 16);
        // Space column stays empty.
        assert_eq!(a.get(2 * 12 + 5, 10), 0);
        assert_eq!(a.get(5, 10), 255);
    }

    #[test]
    fn test_bold_blocks_are_wider() {
        let mut bold = style(12.0);
        bold.weight = FontWeight::Bold;
        let normal = BlockGlyphRasterizer.rasterize_line("a", &style(12.0));
        let bold = BlockGlyphRasterizer.rasterize_line("a", &bold);
        let filled = |m: &TextMask| m.coverage.iter().filter(|&&c| c > 0).count();
        assert!(filled(&bold) > filled(&normal));
    }

    #[test]
    fn test_layout_aligns_lines() {
        let s = style(10.0);
        let left = layout_text(&BlockGlyphRasterizer, "abcd\nab", &s, TextAlign::Left, TextDecoration::None);
        let right = layout_text(&BlockGlyphRasterizer, "abcd\nab", &s, TextAlign::Right, TextDecoration::None);
        assert_eq!(left.width, 24);
        assert_eq!(left.height, 24);
        // Second line starts at column 0 when left aligned, 12 when right aligned.
        let row = 12 + 5;
        assert_eq!(left.get(0, row), 255);
        assert_eq!(right.get(0, row), 0);
        assert_eq!(right.get(12, row), 255);
    }

    #[test]
    fn test_underline_adds_coverage_below_baseline() {
        let s = style(30.0);
        let plain = layout_text(&BlockGlyphRasterizer, "ab", &s, TextAlign::Center, TextDecoration::None);
        let underlined =
            layout_text(&BlockGlyphRasterizer, "ab", &s, TextAlign::Center, TextDecoration::Underline);
        let row = plain.baseline + 2;
        assert_eq!(plain.get(0, row), 0);
        assert_eq!(underlined.get(0, row), 255);
    }

    #[test]
    fn test_empty_content_yields_empty_mask() {
        let mask = layout_text(&BlockGlyphRasterizer, "", &style(20.0), TextAlign::Center, TextDecoration::None);
        assert!(mask.is_empty());
    }

    #[test]
    fn test_discover_without_fonts_is_none() {
        let dir = std::env::temp_dir().join("framewright_test_no_fonts");
        std::fs::create_dir_all(&dir).unwrap();
        assert!(FontdueRasterizer::discover(&[dir.clone()]).is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_resolve_prefers_matching_variant() {
        let rasterizer = FontdueRasterizer {
            faces: vec![
                ("arial".into(), PathBuf::from("/f/Arial.ttf")),
                ("arialbold".into(), PathBuf::from("/f/Arial-Bold.ttf")),
                ("arialitalic".into(), PathBuf::from("/f/Arial-Italic.ttf")),
                ("dejavusans".into(), PathBuf::from("/f/DejaVuSans.ttf")),
            ],
            loaded: Mutex::new(HashMap::new()),
        };
        let mut s = style(12.0);
        assert_eq!(rasterizer.resolve(&s), Some(Path::new("/f/Arial.ttf")));
        s.weight = FontWeight::Bold;
        assert_eq!(rasterizer.resolve(&s), Some(Path::new("/f/Arial-Bold.ttf")));
        s.weight = FontWeight::Normal;
        s.style = FontStyle::Italic;
        assert_eq!(rasterizer.resolve(&s), Some(Path::new("/f/Arial-Italic.ttf")));
        s.family = "Unknown Sans".into();
        assert_eq!(rasterizer.resolve(&s), Some(Path::new("/f/Arial.ttf")));
    }
}
