//! The framebuffer shared between the host and the RFB server.
//!
//! A [`Framebuffer`] holds the pixels in the host's layout together with the
//! server-side description of that layout: true-colour shifts and maxima for
//! depths above 8 bits, or an RGB palette of `2^bpp` entries otherwise.

use byteorder::{ByteOrder, NativeEndian};

use crate::error::{Result, VideoError};
use crate::host::{Color, PixelFormat, Rect};

/// Channel layout of a true-colour framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrueColour {
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
}

impl TrueColour {
    /// Derives shifts and maxima from the host's masks (`max = mask >> shift`).
    pub fn from_format(format: &PixelFormat) -> Self {
        Self {
            red_shift: format.r_shift,
            green_shift: format.g_shift,
            blue_shift: format.b_shift,
            red_max: (format.r_mask >> format.r_shift) as u16,
            green_max: (format.g_mask >> format.g_shift) as u16,
            blue_max: (format.b_mask >> format.b_shift) as u16,
        }
    }
}

/// How pixel values map to colours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColourMode {
    TrueColour(TrueColour),
    /// Three bytes (r, g, b) per entry.
    Indexed(Vec<u8>),
}

/// Pixel storage plus its server-side format description.
#[derive(Debug)]
pub struct Framebuffer {
    width: u16,
    height: u16,
    bits_per_pixel: u8,
    bytes_per_pixel: u8,
    mode: ColourMode,
    pixels: Vec<u8>,
}

impl Framebuffer {
    /// Allocates a zeroed framebuffer for `format`.
    ///
    /// Nothing is modified on failure, so the caller's current framebuffer
    /// stays valid.
    pub fn allocate(width: u16, height: u16, format: &PixelFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(VideoError::InvalidMode {
                width: width.into(),
                height: height.into(),
            });
        }

        let bytes_per_pixel = format.bytes_per_pixel;
        let len = usize::from(width) * usize::from(height) * usize::from(bytes_per_pixel);
        let pixels = zeroed(len, "framebuffer")?;

        let mode = if format.is_indexed() {
            let entries = 1usize << format.bits_per_pixel;
            ColourMode::Indexed(zeroed(entries * 3, "palette")?)
        } else {
            ColourMode::TrueColour(TrueColour::from_format(format))
        };

        Ok(Self {
            width,
            height,
            bits_per_pixel: format.bits_per_pixel,
            bytes_per_pixel,
            mode,
            pixels,
        })
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn bits_per_pixel(&self) -> u8 {
        self.bits_per_pixel
    }

    pub fn bytes_per_pixel(&self) -> u8 {
        self.bytes_per_pixel
    }

    /// Bytes per row.
    pub fn pitch(&self) -> usize {
        usize::from(self.width) * usize::from(self.bytes_per_pixel)
    }

    pub fn mode(&self) -> &ColourMode {
        &self.mode
    }

    pub fn is_true_colour(&self) -> bool {
        matches!(self.mode, ColourMode::TrueColour(_))
    }

    /// Palette bytes, if the framebuffer is indexed.
    pub fn palette(&self) -> Option<&[u8]> {
        match &self.mode {
            ColourMode::Indexed(bytes) => Some(bytes),
            ColourMode::TrueColour(_) => None,
        }
    }

    /// Number of palette entries, `0` in true-colour mode.
    pub fn palette_len(&self) -> usize {
        self.palette().map_or(0, |p| p.len() / 3)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Overwrites palette entries `first..first + colors.len()`.
    ///
    /// The whole range must fit in the palette; otherwise nothing changes.
    /// True-colour framebuffers have no palette and accept any update.
    pub fn set_palette(&mut self, first: usize, colors: &[Color]) -> Result<()> {
        let ColourMode::Indexed(bytes) = &mut self.mode else {
            return Ok(());
        };

        let size = bytes.len() / 3;
        let end = first.checked_add(colors.len()).filter(|end| *end <= size);
        if end.is_none() {
            return Err(VideoError::PaletteRange {
                first,
                count: colors.len(),
                size,
            });
        }

        for (entry, color) in bytes[first * 3..].chunks_exact_mut(3).zip(colors) {
            entry.copy_from_slice(&[color.r, color.g, color.b]);
        }
        Ok(())
    }

    /// Clips `rect` to the framebuffer, returning `None` if nothing remains.
    pub fn clip(&self, rect: Rect) -> Option<Rect> {
        if rect.x >= self.width || rect.y >= self.height {
            return None;
        }
        let w = rect.w.min(self.width - rect.x);
        let h = rect.h.min(self.height - rect.y);
        (w > 0 && h > 0).then_some(Rect::new(rect.x, rect.y, w, h))
    }

    /// Reads a region back as RGBA32, the layout the server stores.
    pub fn to_rgba(&self, rect: Rect) -> Vec<u8> {
        let Some(rect) = self.clip(rect) else {
            return Vec::new();
        };
        let bpp = usize::from(self.bytes_per_pixel);
        let pitch = self.pitch();
        let mut out = Vec::with_capacity(usize::from(rect.w) * usize::from(rect.h) * 4);

        for y in rect.y..rect.y + rect.h {
            let start = usize::from(y) * pitch + usize::from(rect.x) * bpp;
            let row = &self.pixels[start..start + usize::from(rect.w) * bpp];
            for pixel in row.chunks_exact(bpp) {
                let [r, g, b] = self.colour_of(read_pixel(pixel));
                out.extend_from_slice(&[r, g, b, 0xFF]);
            }
        }
        out
    }

    fn colour_of(&self, value: u32) -> [u8; 3] {
        match &self.mode {
            ColourMode::TrueColour(tc) => [
                scale(value >> tc.red_shift, tc.red_max),
                scale(value >> tc.green_shift, tc.green_max),
                scale(value >> tc.blue_shift, tc.blue_max),
            ],
            ColourMode::Indexed(palette) => {
                let at = value as usize * 3;
                palette
                    .get(at..at + 3)
                    .map_or([0, 0, 0], |c| [c[0], c[1], c[2]])
            }
        }
    }
}

fn read_pixel(pixel: &[u8]) -> u32 {
    match pixel.len() {
        1 => u32::from(pixel[0]),
        2 => u32::from(NativeEndian::read_u16(pixel)),
        3 => NativeEndian::read_u24(pixel),
        _ => NativeEndian::read_u32(pixel),
    }
}

/// Scales a channel value in `0..=max` to `0..=255`.
fn scale(value: u32, max: u16) -> u8 {
    if max == 0 {
        return 0;
    }
    let max = u32::from(max);
    ((value & max) * 255 / max) as u8
}

fn zeroed(len: usize, what: &'static str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| VideoError::OutOfMemory { what, bytes: len })?;
    buf.resize(len, 0);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn framebuffer(width: u16, height: u16, bpp: u8) -> Framebuffer {
        Framebuffer::allocate(width, height, &PixelFormat::for_depth(bpp).unwrap()).unwrap()
    }

    #[test]
    fn true_colour_layout_from_masks() {
        let fb = framebuffer(4, 3, 16);
        assert_eq!(fb.pixels().len(), 4 * 3 * 2);
        assert_eq!(
            fb.mode(),
            &ColourMode::TrueColour(TrueColour {
                red_shift: 11,
                green_shift: 5,
                blue_shift: 0,
                red_max: 31,
                green_max: 63,
                blue_max: 31,
            })
        );
        assert_eq!(fb.palette_len(), 0);
    }

    #[test]
    fn indexed_framebuffer_has_zeroed_palette() {
        let fb = framebuffer(2, 2, 8);
        assert!(!fb.is_true_colour());
        assert_eq!(fb.palette_len(), 256);
        assert!(fb.palette().unwrap().iter().all(|&b| b == 0));

        let fb = framebuffer(2, 2, 4);
        assert_eq!(fb.palette_len(), 16);
        assert_eq!(fb.bytes_per_pixel(), 1);
    }

    #[test]
    fn zero_sized_modes_are_rejected() {
        let format = PixelFormat::for_depth(32).unwrap();
        assert_eq!(
            Framebuffer::allocate(0, 10, &format).unwrap_err(),
            VideoError::InvalidMode { width: 0, height: 10 }
        );
    }

    #[test]
    fn palette_update_out_of_range_leaves_palette_unchanged() {
        let mut fb = framebuffer(1, 1, 8);
        let colors = vec![Color { r: 1, g: 2, b: 3 }; 20];
        let err = fb.set_palette(250, &colors).unwrap_err();
        assert_eq!(err, VideoError::PaletteRange { first: 250, count: 20, size: 256 });
        assert!(fb.palette().unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn palette_update_writes_at_first_index() {
        let mut fb = framebuffer(1, 1, 8);
        let colors = [Color { r: 10, g: 20, b: 30 }, Color { r: 40, g: 50, b: 60 }];
        fb.set_palette(254, &colors).unwrap();
        let palette = fb.palette().unwrap();
        assert_eq!(&palette[254 * 3..], &[10, 20, 30, 40, 50, 60]);
        assert!(palette[..254 * 3].iter().all(|&b| b == 0));
    }

    #[test]
    fn true_colour_ignores_palette_updates() {
        let mut fb = framebuffer(1, 1, 32);
        assert!(fb.set_palette(1000, &[Color::default()]).is_ok());
    }

    #[test]
    fn rgb565_reads_back_as_rgba() {
        let mut fb = framebuffer(2, 1, 16);
        NativeEndian::write_u16(&mut fb.pixels_mut()[0..2], 0xF800);
        NativeEndian::write_u16(&mut fb.pixels_mut()[2..4], 0x07E0);
        assert_eq!(
            fb.to_rgba(Rect::new(0, 0, 2, 1)),
            vec![255, 0, 0, 255, 0, 255, 0, 255]
        );
    }

    #[test]
    fn indexed_pixels_read_through_palette() {
        let mut fb = framebuffer(2, 2, 8);
        fb.set_palette(7, &[Color { r: 9, g: 8, b: 7 }]).unwrap();
        fb.pixels_mut()[3] = 7;
        assert_eq!(fb.to_rgba(Rect::new(1, 1, 1, 1)), vec![9, 8, 7, 255]);
        assert_eq!(fb.to_rgba(Rect::new(0, 0, 1, 1)), vec![0, 0, 0, 255]);
    }

    #[test]
    fn readback_is_clipped() {
        let fb = framebuffer(4, 4, 24);
        assert_eq!(fb.to_rgba(Rect::new(2, 2, 10, 10)).len(), 2 * 2 * 4);
        assert!(fb.to_rgba(Rect::new(4, 0, 1, 1)).is_empty());
        assert_eq!(fb.clip(Rect::new(3, 3, 0, 5)), None);
    }
}
