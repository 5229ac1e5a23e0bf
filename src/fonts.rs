use std::collections::HashMap;
use std::sync::Mutex;

use egui::{Color32, FontFamily, FontId};
use lazy_static::lazy_static;

/// Ascent/descent/linespace of a font, in pixels above and below the
/// baseline. Queried once per font and memoized.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FontMetrics {
    pub ascent: f32,
    pub descent: f32,
    pub linespace: f32,
}

#[derive(Clone, Hash, PartialEq, Eq)]
struct FontKey {
    size_bits: u32,
    weight: String,
    style: String,
}

#[derive(Clone)]
struct CachedFont {
    id: FontId,
    metrics: FontMetrics,
    space_width: f32,
}

lazy_static! {
    /// Process-wide font cache keyed by (size, weight, style). Entries are
    /// immutable once created.
    static ref FONT_CACHE: Mutex<HashMap<FontKey, CachedFont>> = Mutex::new(HashMap::new());
}

/// A sized font handle plus its cached measurements.
///
/// Weight and style participate in sizing and in the cache key, but egui's
/// default family ships a single face, so they do not change the rasterized
/// glyphs.
#[derive(Clone)]
pub struct Font {
    pub id: FontId,
    pub metrics: FontMetrics,
    pub space_width: f32,
    ctx: egui::Context,
}

impl Font {
    /// Width of `text` in pixels when laid out without wrapping.
    pub fn measure(&self, text: &str) -> f32 {
        let galley = self.ctx.fonts_mut(|f| {
            f.layout_no_wrap(text.to_string(), self.id.clone(), Color32::BLACK)
        });
        galley.size().x
    }
}

impl std::fmt::Debug for Font {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Font").field("id", &self.id).finish()
    }
}

/// Returns the font for a CSS pixel size and the computed weight/style,
/// converting px to points (x 0.75) and filling the cache on first use.
pub fn get_font(ctx: &egui::Context, size_px: f32, weight: &str, style: &str) -> Font {
    let points = size_px * 0.75;
    let key = FontKey {
        size_bits: points.to_bits(),
        weight: weight.to_string(),
        style: style.to_string(),
    };

    if let Some(cached) = FONT_CACHE.lock().expect("font cache poisoned").get(&key) {
        return Font {
            id: cached.id.clone(),
            metrics: cached.metrics,
            space_width: cached.space_width,
            ctx: ctx.clone(),
        };
    }

    let id = FontId::new(points, FontFamily::Proportional);
    let (metrics, space_width) = ctx.fonts_mut(|f| {
        let reference = f.layout_no_wrap("Mgj".to_string(), id.clone(), Color32::BLACK);
        let metrics = reference
            .rows
            .first()
            .and_then(|row| row.row.glyphs.first())
            .map(|glyph| FontMetrics {
                ascent: glyph.font_ascent,
                descent: glyph.font_height - glyph.font_ascent,
                linespace: glyph.font_height,
            })
            .unwrap_or(FontMetrics {
                ascent: points,
                descent: points * 0.25,
                linespace: points * 1.25,
            });
        let space = f.layout_no_wrap(" ".to_string(), id.clone(), Color32::BLACK);
        (metrics, space.size().x)
    });

    FONT_CACHE
        .lock()
        .expect("font cache poisoned")
        .insert(key, CachedFont { id: id.clone(), metrics, space_width });
    Font { id, metrics, space_width, ctx: ctx.clone() }
}
