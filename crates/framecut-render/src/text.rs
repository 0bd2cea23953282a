//! Text rasterization.
//! Uses fontdue for CPU glyph rendering onto 16-bit pictures.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fontdue::{Font, FontSettings};
use parking_lot::Mutex;

use framecut_core::{Color, FrameCutError, FrameCutResult, Picture};

use crate::kernels;

/// Directories searched when a text entry names a font family instead of a file.
const SYSTEM_FONT_DIRS: &[&str] = &[
    "/usr/share/fonts",
    "/usr/local/share/fonts",
    "/Library/Fonts",
    "/System/Library/Fonts",
    "C:\\Windows\\Fonts",
];

const FONT_EXTENSIONS: &[&str] = &["ttf", "otf", "ttc"];

/// Rasterizes text into pictures, caching parsed fonts by file path.
pub struct TextRasterizer {
    font_cache: Mutex<HashMap<PathBuf, Arc<Font>>>,
    search_dirs: Vec<PathBuf>,
}

impl TextRasterizer {
    pub fn new() -> Self {
        Self::with_search_dirs(SYSTEM_FONT_DIRS.iter().map(PathBuf::from).collect())
    }

    pub fn with_search_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            font_cache: Mutex::new(HashMap::new()),
            search_dirs,
        }
    }

    /// Load and cache a font file.
    pub fn load_font(&self, path: &Path) -> FrameCutResult<Arc<Font>> {
        if let Some(font) = self.font_cache.lock().get(path) {
            return Ok(Arc::clone(font));
        }
        let data = std::fs::read(path).map_err(|e| {
            FrameCutError::resource(format!("failed to read font file: {}", e), path)
        })?;
        let font = Font::from_bytes(data, FontSettings::default())
            .map_err(|e| FrameCutError::resource(format!("failed to parse font: {}", e), path))?;
        let font = Arc::new(font);
        self.font_cache
            .lock()
            .insert(path.to_path_buf(), Arc::clone(&font));
        Ok(font)
    }

    /// Pick the font for a text entry: an explicit file wins, then a family
    /// name matched against font file stems in the search directories.
    pub fn resolve(&self, family: Option<&str>, file: Option<&str>) -> FrameCutResult<Arc<Font>> {
        if let Some(file) = file.filter(|f| !f.is_empty()) {
            return self.load_font(Path::new(file));
        }
        let family = family.filter(|f| !f.is_empty()).unwrap_or("DejaVuSans");
        let wanted = normalize_family(family);
        for dir in &self.search_dirs {
            if let Some(path) = find_font_file(dir, &wanted, 0) {
                tracing::debug!("Resolved font family {} to {}", family, path.display());
                return self.load_font(&path);
            }
        }
        Err(FrameCutError::resource_unbound(format!(
            "font family `{family}` not found"
        )))
    }

    /// Draw `text` onto `canvas` with its top-left corner at `(x, y)`.
    /// Lines split on `\n`; glyph coverage is alpha-composited over what
    /// the canvas already holds.
    pub fn draw(
        &self,
        canvas: &mut Picture,
        font: &Font,
        text: &str,
        x: i32,
        y: i32,
        font_size: f32,
        color: &Color,
    ) {
        let line_spacing = (font_size * 1.3) as i32;
        let mut y_offset = y;
        for line in text.split('\n') {
            let ascent = line_ascent(font, line, font_size);
            self.render_line_into(canvas, font, line, font_size, color, x, y_offset, ascent);
            y_offset += line_spacing;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn render_line_into(
        &self,
        canvas: &mut Picture,
        font: &Font,
        text: &str,
        font_size: f32,
        color: &Color,
        x_offset: i32,
        y_offset: i32,
        ascent: i32,
    ) {
        let max = 65535.0;
        let mut cursor_x = x_offset;

        for ch in text.chars() {
            let (metrics, bitmap) = font.rasterize(ch, font_size);
            let glyph_x = cursor_x + metrics.xmin;
            let glyph_y = y_offset + ascent - (metrics.height as i32 + metrics.ymin);

            for gy in 0..metrics.height {
                for gx in 0..metrics.width {
                    let coverage = bitmap[gy * metrics.width + gx];
                    if coverage == 0 {
                        continue;
                    }
                    let px = glyph_x + gx as i32;
                    let py = glyph_y + gy as i32;
                    if px < 0 || py < 0 {
                        continue;
                    }
                    let Some((under, under_a)) = canvas.get_pixel(px as u32, py as u32) else {
                        continue;
                    };
                    let glyph_a = (coverage as f32 / 255.0) * color.alpha();
                    let mut rgb = [0u16; 3];
                    let mut out_a = under_a;
                    for (i, top) in [color.r, color.g, color.b].into_iter().enumerate() {
                        let (c, a) =
                            kernels::overlay(top as f32, under[i] as f32, glyph_a, under_a, max);
                        rgb[i] = c as u16;
                        out_a = a;
                    }
                    canvas.set_pixel(px as u32, py as u32, rgb, out_a);
                }
            }

            cursor_x += metrics.advance_width as i32;
        }
    }
}

impl Default for TextRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

fn line_ascent(font: &Font, text: &str, font_size: f32) -> i32 {
    let sample = if text.is_empty() { " " } else { text };
    sample
        .chars()
        .map(|ch| {
            let metrics = font.metrics(ch, font_size);
            metrics.height as i32 + metrics.ymin
        })
        .max()
        .unwrap_or(0)
}

fn normalize_family(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn find_font_file(dir: &Path, wanted: &str, depth: usize) -> Option<PathBuf> {
    if depth > 4 {
        return None;
    }
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
            continue;
        }
        let is_font = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| FONT_EXTENSIONS.iter().any(|f| f.eq_ignore_ascii_case(e)));
        let stem_matches = path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| normalize_family(s) == wanted);
        if is_font && stem_matches {
            return Some(path);
        }
    }
    subdirs
        .into_iter()
        .find_map(|sub| find_font_file(&sub, wanted, depth + 1))
}
