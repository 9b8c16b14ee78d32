//! Display capture and normalization.
//!
//! This module takes a snapshot of the primary display restricted to a region
//! and scales it to the region's logical size. Retina displays hand back
//! native pixels at twice the logical resolution, so every capture goes
//! through the resize step before recognition sees it.

use crate::types::{CaptureError, CapturedImage, DisplayId, DisplayInfo, Region};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Display enumeration and pixel capture
pub trait DisplayService: Send + Sync {
    /// All active displays
    fn active_displays(&self) -> Vec<DisplayInfo>;

    /// Capture `rect` (screen coordinates) from a display
    fn capture(&self, display: DisplayId, rect: Region) -> Option<RgbaImage>;
}

/// Produces normalized captures for the pipeline
pub struct Capturer {
    displays: Arc<dyn DisplayService>,
}

impl Capturer {
    pub fn new(displays: Arc<dyn DisplayService>) -> Self {
        Self { displays }
    }

    /// Capture `region` from the primary display.
    ///
    /// A zero-area region captures the display's full bounds.
    pub fn capture(&self, region: Region) -> Result<CapturedImage, CaptureError> {
        let displays = self.displays.active_displays();
        let screen = displays
            .iter()
            .find(|d| d.is_main)
            .or_else(|| displays.first())
            .ok_or(CaptureError::NoActiveDisplay)?;

        let rect = if region.is_full_display() {
            screen.bounds
        } else {
            region
        };

        trace!("Capturing {:?} from display {}", rect, screen.id);

        let start = Instant::now();
        let raw = self
            .displays
            .capture(screen.id, rect)
            .ok_or_else(|| {
                warn!("Failed to capture display {}", screen.id);
                CaptureError::CaptureFailed(screen.id)
            })?;

        debug!(
            "Display {} captured {}x{} in {:?}",
            screen.id,
            raw.width(),
            raw.height(),
            start.elapsed()
        );

        // `raw` is consumed here; only the normalized copy leaves this function.
        let normalized = normalize(raw, rect.width, rect.height)?;
        Ok(CapturedImage::new(normalized))
    }
}

/// Scale a raw capture to the logical size of the captured rect
pub fn normalize(raw: RgbaImage, width: u32, height: u32) -> Result<RgbaImage, CaptureError> {
    if width == 0 || height == 0 {
        return Err(CaptureError::ResizeFailed(format!(
            "target size {}x{} is empty",
            width, height
        )));
    }
    if raw.width() == 0 || raw.height() == 0 {
        return Err(CaptureError::ResizeFailed("capture is empty".to_string()));
    }

    if raw.width() == width && raw.height() == height {
        return Ok(raw);
    }

    let resized = imageops::resize(&raw, width, height, FilterType::Lanczos3);
    trace!(
        "Resized {}x{} -> {}x{}",
        raw.width(),
        raw.height(),
        resized.width(),
        resized.height()
    );
    Ok(resized)
}

#[cfg(target_os = "macos")]
mod macos {
    use super::*;
    use core_graphics::display::{CGDisplayBounds, CGGetActiveDisplayList, CGMainDisplayID};
    use core_graphics::geometry::{CGPoint, CGRect, CGSize};
    use core_graphics::image::CGImage;
    use core_graphics::window::{kCGWindowImageBestResolution, CGWindowListCreateImage};
    use foreign_types_shared::ForeignType;

    /// Get all active displays
    pub fn get_displays() -> Vec<DisplayInfo> {
        let mut display_count: u32 = 0;

        unsafe {
            CGGetActiveDisplayList(0, std::ptr::null_mut(), &mut display_count);
        }

        if display_count == 0 {
            return vec![];
        }

        let mut displays = vec![0u32; display_count as usize];

        unsafe {
            CGGetActiveDisplayList(display_count, displays.as_mut_ptr(), &mut display_count);
        }
        displays.truncate(display_count as usize);

        let main_display = unsafe { CGMainDisplayID() };

        displays
            .into_iter()
            .map(|id| {
                let bounds = unsafe { CGDisplayBounds(id) };
                DisplayInfo {
                    id,
                    bounds: Region::new(
                        bounds.origin.x as i32,
                        bounds.origin.y as i32,
                        bounds.size.width as u32,
                        bounds.size.height as u32,
                    ),
                    is_main: id == main_display,
                }
            })
            .collect()
    }

    /// Capture a rect of the screen.
    ///
    /// The CGImage is released when it drops at the end of this function.
    pub fn capture_rect(rect: Region) -> Option<RgbaImage> {
        let cg_rect = CGRect::new(
            &CGPoint::new(rect.x as f64, rect.y as f64),
            &CGSize::new(rect.width as f64, rect.height as f64),
        );

        let cg_image: CGImage = unsafe {
            let image_ref = CGWindowListCreateImage(
                cg_rect,
                0, // kCGWindowListOptionAll
                0, // kCGNullWindowID
                kCGWindowImageBestResolution,
            );
            if image_ref.is_null() {
                return None;
            }
            CGImage::from_ptr(image_ref)
        };

        convert_cgimage_to_rgba(&cg_image)
    }

    /// Convert CGImage to image crate's RgbaImage
    fn convert_cgimage_to_rgba(cg_image: &CGImage) -> Option<RgbaImage> {
        let width = cg_image.width();
        let height = cg_image.height();
        let bytes_per_row = cg_image.bytes_per_row();
        let bytes_per_pixel = cg_image.bits_per_pixel() / 8;

        let data = cg_image.data();
        let bytes = data.bytes();

        if bytes.is_empty() || bytes_per_pixel < 4 {
            return None;
        }

        let mut rgba_data = Vec::with_capacity(width * height * 4);

        for y in 0..height {
            let row_start = y * bytes_per_row;
            for x in 0..width {
                let pixel_start = row_start + x * bytes_per_pixel;
                if pixel_start + 3 < bytes.len() {
                    // Screen captures come back as BGRA
                    let b = bytes[pixel_start];
                    let g = bytes[pixel_start + 1];
                    let r = bytes[pixel_start + 2];
                    let a = bytes[pixel_start + 3];
                    rgba_data.extend_from_slice(&[r, g, b, a]);
                }
            }
        }

        RgbaImage::from_raw(width as u32, height as u32, rgba_data)
    }
}

/// Display service backed by CoreGraphics
#[cfg(target_os = "macos")]
#[derive(Debug, Default, Clone, Copy)]
pub struct CgDisplayService;

#[cfg(target_os = "macos")]
impl DisplayService for CgDisplayService {
    fn active_displays(&self) -> Vec<DisplayInfo> {
        macos::get_displays()
    }

    fn capture(&self, _display: DisplayId, rect: Region) -> Option<RgbaImage> {
        macos::capture_rect(rect)
    }
}

/// Display service for platforms without a capture binding
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDisplayService;

impl DisplayService for NoDisplayService {
    fn active_displays(&self) -> Vec<DisplayInfo> {
        vec![]
    }

    fn capture(&self, _display: DisplayId, _rect: Region) -> Option<RgbaImage> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::sync::Mutex;

    /// Pretends to be a 2x Retina display
    struct RetinaDisplay {
        displays: Vec<DisplayInfo>,
        requested: Mutex<Vec<(DisplayId, Region)>>,
    }

    impl RetinaDisplay {
        fn new(displays: Vec<DisplayInfo>) -> Self {
            Self {
                displays,
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl DisplayService for RetinaDisplay {
        fn active_displays(&self) -> Vec<DisplayInfo> {
            self.displays.clone()
        }

        fn capture(&self, display: DisplayId, rect: Region) -> Option<RgbaImage> {
            self.requested.lock().unwrap().push((display, rect));
            Some(RgbaImage::from_pixel(
                rect.width * 2,
                rect.height * 2,
                Rgba([255, 255, 255, 255]),
            ))
        }
    }

    fn display(id: DisplayId, is_main: bool) -> DisplayInfo {
        DisplayInfo {
            id,
            bounds: Region::new(0, 0, 1440, 900),
            is_main,
        }
    }

    #[test]
    fn test_capture_resizes_to_logical_size() {
        let service = Arc::new(RetinaDisplay::new(vec![display(1, true)]));
        let capturer = Capturer::new(service.clone());

        let image = capturer.capture(Region::new(0, 0, 800, 600)).unwrap();
        assert_eq!((image.width(), image.height()), (800, 600));
    }

    #[test]
    fn test_full_display_region_uses_display_bounds() {
        let service = Arc::new(RetinaDisplay::new(vec![display(4, false), display(7, true)]));
        let capturer = Capturer::new(service.clone());

        let image = capturer.capture(Region::FULL_DISPLAY).unwrap();
        assert_eq!((image.width(), image.height()), (1440, 900));
        assert_eq!(
            service.requested.lock().unwrap()[0],
            (7, Region::new(0, 0, 1440, 900))
        );
    }

    #[test]
    fn test_no_active_display() {
        let capturer = Capturer::new(Arc::new(NoDisplayService));
        assert_eq!(
            capturer.capture(Region::new(0, 0, 10, 10)).unwrap_err(),
            CaptureError::NoActiveDisplay
        );
    }

    #[test]
    fn test_capture_failure() {
        struct Blank;
        impl DisplayService for Blank {
            fn active_displays(&self) -> Vec<DisplayInfo> {
                vec![display(3, true)]
            }
            fn capture(&self, _display: DisplayId, _rect: Region) -> Option<RgbaImage> {
                None
            }
        }

        let capturer = Capturer::new(Arc::new(Blank));
        assert_eq!(
            capturer.capture(Region::new(0, 0, 10, 10)).unwrap_err(),
            CaptureError::CaptureFailed(3)
        );
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert!(matches!(
            normalize(RgbaImage::new(0, 0), 10, 10),
            Err(CaptureError::ResizeFailed(_))
        ));
        assert!(matches!(
            normalize(RgbaImage::new(10, 10), 0, 10),
            Err(CaptureError::ResizeFailed(_))
        ));
    }

    #[test]
    fn test_normalize_same_size_is_untouched() {
        let raw = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4]));
        let out = normalize(raw.clone(), 3, 2).unwrap();
        assert_eq!(out, raw);
    }
}
