use egui::{Align2, Color32, CornerRadius, FontId, Pos2, Stroke, StrokeKind};

use crate::rect::Rect;

/// Parses a CSS color string. `transparent` (and any fully transparent
/// color) comes back as `None` so callers can skip the paint entirely.
pub fn parse_color(value: &str) -> Option<Color32> {
    let color = csscolorparser::parse(value).ok()?;
    let [r, g, b, a] = color.to_rgba8();
    if a == 0 {
        return None;
    }
    Some(Color32::from_rgba_unmultiplied(r, g, b, a))
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawText {
    pub rect: Rect,
    pub text: String,
    pub font: FontId,
    pub color: Color32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawRect {
    pub rect: Rect,
    pub color: Color32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawRRect {
    pub rect: Rect,
    pub color: Color32,
    pub radius: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawLine {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub color: Color32,
    pub thickness: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawOutline {
    pub rect: Rect,
    pub color: Color32,
    pub thickness: f32,
}

/// One drawing primitive of the display list. List order is z-order.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    Text(DrawText),
    Rect(DrawRect),
    RRect(DrawRRect),
    Line(DrawLine),
    Outline(DrawOutline),
}

impl DrawCommand {
    pub fn top(&self) -> f32 {
        match self {
            DrawCommand::Text(c) => c.rect.top,
            DrawCommand::Rect(c) => c.rect.top,
            DrawCommand::RRect(c) => c.rect.top,
            DrawCommand::Line(c) => c.y1.min(c.y2),
            DrawCommand::Outline(c) => c.rect.top,
        }
    }

    pub fn bottom(&self) -> f32 {
        match self {
            DrawCommand::Text(c) => c.rect.bottom,
            DrawCommand::Rect(c) => c.rect.bottom,
            DrawCommand::RRect(c) => c.rect.bottom,
            DrawCommand::Line(c) => c.y1.max(c.y2),
            DrawCommand::Outline(c) => c.rect.bottom,
        }
    }

    /// Draws the primitive, shifted up by the scroll offset.
    pub fn execute(&self, scroll: f32, painter: &egui::Painter) {
        match self {
            DrawCommand::Text(c) => {
                painter.text(
                    Pos2::new(c.rect.left, c.rect.top - scroll),
                    Align2::LEFT_TOP,
                    c.text.clone(),
                    c.font.clone(),
                    c.color,
                );
            }
            DrawCommand::Rect(c) => {
                painter.rect_filled(c.rect.to_egui(scroll), CornerRadius::ZERO, c.color);
            }
            DrawCommand::RRect(c) => {
                painter.rect_filled(
                    c.rect.to_egui(scroll),
                    CornerRadius::same(c.radius.round() as u8),
                    c.color,
                );
            }
            DrawCommand::Line(c) => {
                painter.line_segment(
                    [Pos2::new(c.x1, c.y1 - scroll), Pos2::new(c.x2, c.y2 - scroll)],
                    Stroke::new(c.thickness, c.color),
                );
            }
            DrawCommand::Outline(c) => {
                painter.rect_stroke(
                    c.rect.to_egui(scroll),
                    CornerRadius::ZERO,
                    Stroke::new(c.thickness, c.color),
                    StrokeKind::Middle,
                );
            }
        }
    }
}
