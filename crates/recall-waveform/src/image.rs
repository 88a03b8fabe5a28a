//! Owned RGBA raster for rendered segments and composites
//!
//! Pixels are stored as tightly packed RGBA8, row-major, which is the layout
//! GUI toolkits take for in-memory image handles.

/// 8-bit RGBA colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    /// Whole-second gridlines
    pub const GRID: Color = Color::rgb(226, 224, 131);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

/// 3x5 glyphs, one `u8` per row, low three bits used (MSB on the left)
fn glyph(c: char) -> Option<[u8; 5]> {
    let rows = match c {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        's' => [0b000, 0b011, 0b100, 0b001, 0b110],
        _ => return None,
    };
    Some(rows)
}

/// Horizontal advance of one glyph including spacing
pub const GLYPH_ADVANCE: u32 = 4;
pub const GLYPH_HEIGHT: u32 = 5;

/// An RGBA image
#[derive(Clone, PartialEq, Eq)]
pub struct SegmentImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl std::fmt::Debug for SegmentImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl SegmentImage {
    /// A `width` × `height` image filled with `background`
    pub fn new(width: u32, height: u32, background: Color) -> Self {
        let mut image = Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        };
        image.fill(background);
        image
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA8 bytes
    pub fn as_rgba(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_rgba(self) -> Vec<u8> {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        let i = self.index(x as i64, y as i64)?;
        let p = &self.pixels[i..i + 4];
        Some(Color {
            r: p[0],
            g: p[1],
            b: p[2],
            a: p[3],
        })
    }

    /// Set one pixel; coordinates outside the image are ignored
    pub fn set_pixel(&mut self, x: i64, y: i64, color: Color) {
        if let Some(i) = self.index(x, y) {
            self.pixels[i..i + 4].copy_from_slice(&[color.r, color.g, color.b, color.a]);
        }
    }

    pub fn fill(&mut self, color: Color) {
        for p in self.pixels.chunks_exact_mut(4) {
            p.copy_from_slice(&[color.r, color.g, color.b, color.a]);
        }
    }

    /// Horizontal line from `x0` to `x1` inclusive
    pub fn hline(&mut self, y: i64, x0: i64, x1: i64, color: Color) {
        let (lo, hi) = (x0.min(x1).max(0), x0.max(x1).min(self.width as i64 - 1));
        for x in lo..=hi {
            self.set_pixel(x, y, color);
        }
    }

    /// Vertical line from `y0` to `y1` inclusive
    pub fn vline(&mut self, x: i64, y0: i64, y1: i64, color: Color) {
        let (lo, hi) = (y0.min(y1).max(0), y0.max(y1).min(self.height as i64 - 1));
        for y in lo..=hi {
            self.set_pixel(x, y, color);
        }
    }

    /// Copy `src` with its top-left corner at (`dest_x`, `dest_y`), clipped to
    /// this image
    pub fn blit(&mut self, src: &SegmentImage, dest_x: i64, dest_y: i64) {
        let x_start = dest_x.max(0);
        let x_end = (dest_x + src.width as i64).min(self.width as i64);
        if x_start >= x_end {
            return;
        }
        let row_bytes = (x_end - x_start) as usize * 4;
        let src_x = (x_start - dest_x) as usize;

        for sy in 0..src.height as i64 {
            let y = dest_y + sy;
            if y < 0 || y >= self.height as i64 {
                continue;
            }
            let src_offset = (sy as usize * src.width as usize + src_x) * 4;
            let dst_offset = (y as usize * self.width as usize + x_start as usize) * 4;
            self.pixels[dst_offset..dst_offset + row_bytes]
                .copy_from_slice(&src.pixels[src_offset..src_offset + row_bytes]);
        }
    }

    /// Draw `text` with the built-in 3x5 font, top-left at (`x`, `y`)
    ///
    /// Only digits, `.`, `-` and `s` have glyphs; anything else advances blank.
    pub fn draw_text(&mut self, x: i64, y: i64, text: &str, color: Color) {
        let mut pen = x;
        for c in text.chars() {
            if let Some(rows) = glyph(c) {
                for (dy, row) in rows.iter().enumerate() {
                    for dx in 0..3 {
                        if row & (0b100 >> dx) != 0 {
                            self.set_pixel(pen + dx, y + dy as i64, color);
                        }
                    }
                }
            }
            pen += GLYPH_ADVANCE as i64;
        }
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_filled() {
        let image = SegmentImage::new(3, 2, Color::WHITE);
        assert_eq!(image.as_rgba().len(), 24);
        assert_eq!(image.pixel(2, 1), Some(Color::WHITE));
        assert_eq!(image.pixel(3, 0), None);
    }

    #[test]
    fn test_lines_are_clipped() {
        let mut image = SegmentImage::new(4, 4, Color::WHITE);
        image.hline(1, -5, 10, Color::BLACK);
        image.vline(2, -1, 100, Color::GRID);
        assert_eq!(image.pixel(0, 1), Some(Color::BLACK));
        assert_eq!(image.pixel(3, 1), Some(Color::BLACK));
        assert_eq!(image.pixel(2, 0), Some(Color::GRID));
        assert_eq!(image.pixel(2, 3), Some(Color::GRID));
        assert_eq!(image.pixel(0, 0), Some(Color::WHITE));
    }

    #[test]
    fn test_blit_clips_left_and_right() {
        let src = SegmentImage::new(4, 2, Color::BLACK);
        let mut dst = SegmentImage::new(6, 2, Color::WHITE);

        dst.blit(&src, -2, 0);
        assert_eq!(dst.pixel(1, 0), Some(Color::BLACK));
        assert_eq!(dst.pixel(2, 0), Some(Color::WHITE));

        dst.blit(&src, 5, 1);
        assert_eq!(dst.pixel(5, 1), Some(Color::BLACK));
        assert_eq!(dst.pixel(4, 1), Some(Color::WHITE));

        // Entirely outside: no-op
        dst.blit(&src, 10, 0);
        dst.blit(&src, -10, 0);
    }

    #[test]
    fn test_blit_centres_vertically() {
        let src = SegmentImage::new(2, 2, Color::BLACK);
        let mut dst = SegmentImage::new(2, 4, Color::WHITE);
        dst.blit(&src, 0, 1);
        assert_eq!(dst.pixel(0, 0), Some(Color::WHITE));
        assert_eq!(dst.pixel(0, 1), Some(Color::BLACK));
        assert_eq!(dst.pixel(0, 2), Some(Color::BLACK));
        assert_eq!(dst.pixel(0, 3), Some(Color::WHITE));
    }

    #[test]
    fn test_draw_text() {
        let mut image = SegmentImage::new(20, 6, Color::WHITE);
        image.draw_text(0, 0, "1.00s", Color::GRID);
        // Middle column of '1' is set on every row
        assert!((0..5).all(|y| image.pixel(1, y) == Some(Color::GRID)));
        // '.' only on its bottom row
        assert_eq!(image.pixel(5, 4), Some(Color::GRID));
        assert_eq!(image.pixel(5, 3), Some(Color::WHITE));
    }
}
