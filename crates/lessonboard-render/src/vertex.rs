//! Vertex layouts uploaded as-is to the accelerated pipeline.

use bytemuck::{Pod, Zeroable};
use kurbo::Point;

/// Round brush dab: a point sprite of `size` pixels.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PointVertex {
    pub position: [f32; 2],
    pub size: f32,
    pub color: [f32; 4],
}

/// One end of a line-list segment.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LineVertex {
    pub position: [f32; 2],
    pub width: f32,
    pub color: [f32; 4],
}

fn position(p: Point) -> [f32; 2] {
    [p.x as f32, p.y as f32]
}

impl PointVertex {
    pub fn new(p: Point, size: f64, color: [f32; 4]) -> Self {
        Self {
            position: position(p),
            size: size as f32,
            color,
        }
    }
}

impl LineVertex {
    pub fn new(p: Point, width: f64, color: [f32; 4]) -> Self {
        Self {
            position: position(p),
            width: width as f32,
            color,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<PointVertex>(), 28);
        assert_eq!(std::mem::size_of::<LineVertex>(), 28);
        let v = [LineVertex::new(Point::new(1.0, 2.0), 3.0, [1.0; 4])];
        let bytes: &[u8] = bytemuck::cast_slice(&v);
        assert_eq!(bytes.len(), 28);
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
    }
}
