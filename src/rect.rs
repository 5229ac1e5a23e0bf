use egui::{Pos2, Vec2};

/// An axis-aligned rectangle in document coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Rect {
        Rect { left, top, right, bottom }
    }

    pub fn from_pos_size(pos: Vec2, size: Vec2) -> Rect {
        Rect::new(pos.x, pos.y, pos.x + size.x, pos.y + size.y)
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    /// Converts to screen coordinates by subtracting the scroll offset.
    pub fn to_egui(&self, scroll: f32) -> egui::Rect {
        egui::Rect::from_min_max(
            Pos2::new(self.left, self.top - scroll),
            Pos2::new(self.right, self.bottom - scroll),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extents_come_from_corners() {
        let r = Rect::from_pos_size(Vec2::new(2.0, 3.0), Vec2::new(10.0, 20.0));
        assert_eq!(r.width(), 10.0);
        assert_eq!(r.height(), 20.0);
        assert_eq!(r.right, 12.0);
        assert_eq!(r.bottom, 23.0);
    }

    #[test]
    fn contains_is_half_open() {
        let r = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(r.contains(0.0, 0.0));
        assert!(r.contains(9.9, 9.9));
        assert!(!r.contains(10.0, 5.0));
        assert!(!r.contains(-0.1, 5.0));
    }
}
