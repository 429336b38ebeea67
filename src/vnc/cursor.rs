//! Cursor images for the RFB server.
//!
//! The host describes cursors as two packed, MSB-first bitmaps (colour data
//! and mask). The server wants one byte per pixel per plane, so every bit is
//! expanded to [`CURSOR_FOREGROUND`] or [`CURSOR_BACKGROUND`].

use std::sync::Arc;

use log::debug;

use crate::error::{Result, VideoError};

/// Byte marking a set pixel in a converted plane.
pub const CURSOR_FOREGROUND: u8 = b'x';
/// Byte marking a clear pixel in a converted plane.
pub const CURSOR_BACKGROUND: u8 = b' ';

/// A cursor in the server's byte-per-pixel format.
#[derive(Debug, PartialEq, Eq)]
pub struct CursorImage {
    pub width: u16,
    pub height: u16,
    pub hot_x: u16,
    pub hot_y: u16,
    source: Vec<u8>,
    mask: Vec<u8>,
}

impl CursorImage {
    /// Converts packed `data` and `mask` bitmaps. Each row occupies
    /// `ceil(width / 8)` bytes.
    pub fn from_bitmaps(
        data: &[u8],
        mask: &[u8],
        width: u16,
        height: u16,
        hot_x: u16,
        hot_y: u16,
    ) -> Result<Self> {
        let stride = usize::from(width).div_ceil(8);
        let packed = stride * usize::from(height);
        for plane in [data, mask] {
            if plane.len() < packed {
                return Err(VideoError::InvalidCursor {
                    expected: packed,
                    actual: plane.len(),
                });
            }
        }

        let source = expand_plane(data, width, height, stride)?;
        let mask = expand_plane(mask, width, height, stride)?;

        Ok(Self {
            width,
            height,
            hot_x,
            hot_y,
            source,
            mask,
        })
    }

    /// The fully transparent cursor used to hide the pointer.
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            hot_x: 0,
            hot_y: 0,
            source: Vec::new(),
            mask: Vec::new(),
        }
    }

    /// Colour plane, `width * height` bytes.
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    /// Mask plane, `width * height` bytes.
    pub fn mask(&self) -> &[u8] {
        &self.mask
    }
}

fn expand_plane(bits: &[u8], width: u16, height: u16, stride: usize) -> Result<Vec<u8>> {
    let (width, height) = (usize::from(width), usize::from(height));
    let len = width * height;
    let mut plane = Vec::new();
    plane.try_reserve_exact(len).map_err(|_| VideoError::OutOfMemory {
        what: "cursor plane",
        bytes: len,
    })?;

    for row in bits.chunks(stride.max(1)).take(height) {
        plane.extend((0..width).map(|x| {
            if row[x / 8] & (0x80 >> (x % 8)) != 0 {
                CURSOR_FOREGROUND
            } else {
                CURSOR_BACKGROUND
            }
        }));
    }
    Ok(plane)
}

/// A cursor handed to the host. The host gives it back to be freed; the
/// server only ever borrows the image while it is installed.
#[derive(Debug)]
pub struct WmCursor {
    image: Arc<CursorImage>,
}

impl WmCursor {
    pub fn new(image: CursorImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn image(&self) -> &Arc<CursorImage> {
        &self.image
    }

    /// Releases the cursor's planes and the cursor itself.
    pub fn release(self) {
        debug!(
            "Freeing {}x{} cursor",
            self.image.width, self.image.height
        );
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn all_set_bits_become_foreground() {
        let bits = [0xff; 16 * 2];
        let cursor = CursorImage::from_bitmaps(&bits, &bits, 16, 16, 0, 0).unwrap();
        assert_eq!(cursor.source().len(), 256);
        assert!(cursor.source().iter().all(|&b| b == CURSOR_FOREGROUND));
        assert!(cursor.mask().iter().all(|&b| b == CURSOR_FOREGROUND));
    }

    #[test]
    fn clear_bits_become_background() {
        let bits = [0u8; 8];
        let cursor = CursorImage::from_bitmaps(&bits, &bits, 8, 8, 3, 4).unwrap();
        assert_eq!(cursor.mask().len(), 64);
        assert!(cursor.source().iter().all(|&b| b == CURSOR_BACKGROUND));
        assert!(cursor.mask().iter().all(|&b| b == CURSOR_BACKGROUND));
        assert_eq!((cursor.hot_x, cursor.hot_y), (3, 4));
    }

    #[test]
    fn planes_convert_independently_msb_first() {
        // 10 pixels wide: two bytes per row, last six bits padding.
        let data = [0b1000_0001, 0b0100_0000, 0b0000_0000, 0b1100_0000];
        let mask = [0b1111_1111, 0b1100_0000, 0b0000_0000, 0b0000_0000];
        let cursor = CursorImage::from_bitmaps(&data, &mask, 10, 2, 0, 0).unwrap();

        assert_eq!(cursor.source(), b"x      x x        xx".as_slice());
        assert_eq!(cursor.mask(), b"xxxxxxxxxx          ".as_slice());
    }

    #[test]
    fn short_bitmaps_are_rejected() {
        let err = CursorImage::from_bitmaps(&[0; 3], &[0; 4], 16, 2, 0, 0).unwrap_err();
        assert_eq!(err, VideoError::InvalidCursor { expected: 4, actual: 3 });
    }

    #[test]
    fn empty_cursor_has_no_pixels() {
        let cursor = CursorImage::empty();
        assert!(cursor.source().is_empty());
        assert!(cursor.mask().is_empty());
        assert_eq!(CursorImage::from_bitmaps(&[], &[], 0, 0, 0, 0).unwrap(), cursor);
    }
}
