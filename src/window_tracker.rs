//! Window targeting.
//!
//! This module finds the screen region a scan should capture: the first window
//! of the frontmost application, or one the user picks from that
//! application's window list. Geometry comes from the window server, whose
//! attribute reads may come back empty at any time, so every read is optional
//! and missing geometry degrades to a full-display capture.

use crate::dialogs::ChoicePrompt;
use crate::types::{Region, TargetError, WindowId};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Windows of the frontmost application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontmostApp {
    /// Application name
    pub app_name: String,
    /// Window IDs, front to back
    pub windows: Vec<WindowId>,
}

/// Window enumeration and attribute reads
pub trait WindowService: Send + Sync {
    /// Enumerate the windows of the frontmost application
    fn frontmost_app(&self) -> Option<FrontmostApp>;

    /// Window title, if readable
    fn title(&self, window: WindowId) -> Option<String>;

    /// Top-left corner in screen coordinates, if readable
    fn position(&self, window: WindowId) -> Option<(i32, i32)>;

    /// Width and height in points, if readable
    fn size(&self, window: WindowId) -> Option<(u32, u32)>;
}

/// The window a scan was aimed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub app_name: String,
    pub window_title: String,
    pub region: Region,
}

/// Resolves the region for each scan
pub struct TargetLocator {
    windows: Arc<dyn WindowService>,
    chooser: Arc<dyn ChoicePrompt>,
    last_target: Mutex<Option<TargetInfo>>,
}

impl TargetLocator {
    pub fn new(windows: Arc<dyn WindowService>, chooser: Arc<dyn ChoicePrompt>) -> Self {
        Self {
            windows,
            chooser,
            last_target: Mutex::new(None),
        }
    }

    /// Resolve the region of the target window.
    ///
    /// With `interactive` set, the user picks the window; otherwise the first
    /// window of the frontmost application is used.
    pub fn resolve_region(&self, interactive: bool) -> Result<Region, TargetError> {
        let app = self.windows.frontmost_app().unwrap_or_default();
        if app.windows.is_empty() {
            debug!("Frontmost app '{}' has no windows", app.app_name);
            return Err(TargetError::NoWindow);
        }

        let window = if interactive {
            self.choose_window(&app.windows)?
        } else {
            app.windows[0]
        };

        let title = self
            .windows
            .title(window)
            .unwrap_or_else(|| "Unknown Window".to_string());

        let geometry = match (self.windows.position(window), self.windows.size(window)) {
            (Some((x, y)), Some((width, height))) => Some(Region::new(x, y, width, height)),
            _ => None,
        };

        self.remember(TargetInfo {
            app_name: app.app_name.clone(),
            window_title: title.clone(),
            region: geometry.unwrap_or(Region::FULL_DISPLAY),
        });

        match geometry {
            Some(region) => {
                info!("Target: {} - {} at {:?}", app.app_name, title, region);
                Ok(region)
            }
            None => {
                warn!("Failed to get position or size of '{}'", title);
                Err(TargetError::GeometryUnavailable)
            }
        }
    }

    /// Like [`resolve_region`](Self::resolve_region), but unavailable
    /// geometry yields the zero-area full-display region instead of an error
    pub fn resolve_region_or_full_display(&self, interactive: bool) -> Result<Region, TargetError> {
        match self.resolve_region(interactive) {
            Err(TargetError::GeometryUnavailable) => Ok(Region::FULL_DISPLAY),
            other => other,
        }
    }

    /// The most recently resolved target
    pub fn last_target(&self) -> Option<TargetInfo> {
        self.last_target.lock().ok().and_then(|t| t.clone())
    }

    fn remember(&self, target: TargetInfo) {
        if let Ok(mut last) = self.last_target.lock() {
            *last = Some(target);
        }
    }

    fn choose_window(&self, windows: &[WindowId]) -> Result<WindowId, TargetError> {
        let titles: Vec<Option<String>> = windows.iter().map(|w| self.windows.title(*w)).collect();
        let labels = window_labels(&titles);

        let index = self
            .chooser
            .choose("Target Window", "Choose a window to scan.", &labels)
            .ok_or(TargetError::SelectionCancelled)?;

        windows.get(index).copied().ok_or_else(|| {
            warn!("Selection index {} out of range ({} windows)", index, windows.len());
            TargetError::SelectionCancelled
        })
    }
}

/// Labels for the window chooser. Untitled windows are numbered by position
/// so that every label stays distinct.
pub fn window_labels(titles: &[Option<String>]) -> Vec<String> {
    titles
        .iter()
        .enumerate()
        .map(|(i, title)| match title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => format!("Untitled {}", i + 1),
        })
        .collect()
}

#[cfg(target_os = "macos")]
mod macos {
    use super::*;
    use core_foundation::array::CFArray;
    use core_foundation::base::{CFType, TCFType};
    use core_foundation::dictionary::CFDictionary;
    use core_foundation::number::CFNumber;
    use core_foundation::string::CFString;
    use core_graphics::window::{
        kCGNullWindowID, kCGWindowListExcludeDesktopElements, kCGWindowListOptionOnScreenOnly,
        CGWindowListCopyWindowInfo,
    };

    /// One entry from the window server's list
    #[derive(Debug, Clone)]
    pub struct WindowEntry {
        pub id: WindowId,
        pub pid: i64,
        pub layer: i64,
        pub app_name: String,
        pub title: Option<String>,
        pub bounds: Option<(i32, i32, u32, u32)>,
    }

    /// Get all on-screen windows, front to back
    pub fn list_windows() -> Vec<WindowEntry> {
        let options = kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements;

        let window_list: CFArray<CFDictionary<CFString, CFType>> = unsafe {
            let list_ref = CGWindowListCopyWindowInfo(options, kCGNullWindowID);
            if list_ref.is_null() {
                return vec![];
            }
            CFArray::wrap_under_create_rule(list_ref)
        };

        let mut windows = Vec::new();
        for i in 0..window_list.len() {
            if let Some(dict) = window_list.get(i) {
                if let Some(entry) = parse_window_dict(&dict) {
                    windows.push(entry);
                }
            }
        }
        windows
    }

    fn parse_window_dict(dict: &CFDictionary<CFString, CFType>) -> Option<WindowEntry> {
        let id = get_dict_number(dict, "kCGWindowNumber")? as u64;
        let pid = get_dict_number(dict, "kCGWindowOwnerPID")?;
        let layer = get_dict_number(dict, "kCGWindowLayer").unwrap_or(0);

        Some(WindowEntry {
            id,
            pid,
            layer,
            app_name: get_dict_string(dict, "kCGWindowOwnerName").unwrap_or_default(),
            // Only readable with screen recording permission
            title: get_dict_string(dict, "kCGWindowName"),
            bounds: get_window_bounds(dict),
        })
    }

    fn get_dict_number(dict: &CFDictionary<CFString, CFType>, key: &str) -> Option<i64> {
        get_dict_f64(dict, key).map(|n| n as i64)
    }

    fn get_dict_f64(dict: &CFDictionary<CFString, CFType>, key: &str) -> Option<f64> {
        let cf_key = CFString::new(key);
        dict.find(&cf_key).and_then(|value| {
            if value.type_of() == CFNumber::type_id() {
                let num: CFNumber = unsafe {
                    CFNumber::wrap_under_get_rule(value.as_CFTypeRef() as *const _)
                };
                num.to_f64()
            } else {
                None
            }
        })
    }

    fn get_dict_string(dict: &CFDictionary<CFString, CFType>, key: &str) -> Option<String> {
        let cf_key = CFString::new(key);
        dict.find(&cf_key).and_then(|value| {
            if value.type_of() == CFString::type_id() {
                let s: CFString = unsafe {
                    CFString::wrap_under_get_rule(value.as_CFTypeRef() as *const _)
                };
                Some(s.to_string())
            } else {
                None
            }
        })
    }

    fn get_window_bounds(dict: &CFDictionary<CFString, CFType>) -> Option<(i32, i32, u32, u32)> {
        let cf_key = CFString::new("kCGWindowBounds");
        let bounds_dict = dict.find(&cf_key)?;

        if bounds_dict.type_of() != CFDictionary::<CFString, CFType>::type_id() {
            return None;
        }

        let bounds: CFDictionary<CFString, CFType> = unsafe {
            CFDictionary::wrap_under_get_rule(bounds_dict.as_CFTypeRef() as *const _)
        };

        let x = get_dict_f64(&bounds, "X")? as i32;
        let y = get_dict_f64(&bounds, "Y")? as i32;
        let width = get_dict_f64(&bounds, "Width")?.max(0.0) as u32;
        let height = get_dict_f64(&bounds, "Height")?.max(0.0) as u32;

        Some((x, y, width, height))
    }
}

/// Window service backed by the CoreGraphics window list.
///
/// The list is ordered front to back, so the owner of the first normal
/// (layer 0) window is the frontmost application.
#[cfg(target_os = "macos")]
pub struct CgWindowService {
    snapshot: Mutex<std::collections::HashMap<WindowId, macos::WindowEntry>>,
}

#[cfg(target_os = "macos")]
impl CgWindowService {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn entry(&self, window: WindowId) -> Option<macos::WindowEntry> {
        self.snapshot.lock().ok()?.get(&window).cloned()
    }
}

#[cfg(target_os = "macos")]
impl Default for CgWindowService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "macos")]
impl WindowService for CgWindowService {
    fn frontmost_app(&self) -> Option<FrontmostApp> {
        let entries: Vec<_> = macos::list_windows()
            .into_iter()
            .filter(|e| e.layer == 0)
            .collect();
        let front = entries.first()?;
        let pid = front.pid;
        let app_name = front.app_name.clone();

        let own: Vec<_> = entries.into_iter().filter(|e| e.pid == pid).collect();
        let windows = own.iter().map(|e| e.id).collect();

        if let Ok(mut snapshot) = self.snapshot.lock() {
            snapshot.clear();
            for entry in own {
                snapshot.insert(entry.id, entry);
            }
        }

        Some(FrontmostApp { app_name, windows })
    }

    fn title(&self, window: WindowId) -> Option<String> {
        self.entry(window)?.title
    }

    fn position(&self, window: WindowId) -> Option<(i32, i32)> {
        self.entry(window)?.bounds.map(|(x, y, _, _)| (x, y))
    }

    fn size(&self, window: WindowId) -> Option<(u32, u32)> {
        self.entry(window)?.bounds.map(|(_, _, w, h)| (w, h))
    }
}

/// Window service for platforms without a window server binding
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWindowService;

impl WindowService for NoWindowService {
    fn frontmost_app(&self) -> Option<FrontmostApp> {
        None
    }

    fn title(&self, _window: WindowId) -> Option<String> {
        None
    }

    fn position(&self, _window: WindowId) -> Option<(i32, i32)> {
        None
    }

    fn size(&self, _window: WindowId) -> Option<(u32, u32)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeWindows {
        app_name: String,
        order: Vec<WindowId>,
        titles: HashMap<WindowId, String>,
        geometry: HashMap<WindowId, (i32, i32, u32, u32)>,
        size_missing: bool,
    }

    impl WindowService for FakeWindows {
        fn frontmost_app(&self) -> Option<FrontmostApp> {
            Some(FrontmostApp {
                app_name: self.app_name.clone(),
                windows: self.order.clone(),
            })
        }

        fn title(&self, window: WindowId) -> Option<String> {
            self.titles.get(&window).cloned()
        }

        fn position(&self, window: WindowId) -> Option<(i32, i32)> {
            self.geometry.get(&window).map(|g| (g.0, g.1))
        }

        fn size(&self, window: WindowId) -> Option<(u32, u32)> {
            if self.size_missing {
                return None;
            }
            self.geometry.get(&window).map(|g| (g.2, g.3))
        }
    }

    struct FixedChoice {
        answer: Option<usize>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl FixedChoice {
        fn new(answer: Option<usize>) -> Self {
            Self {
                answer,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl ChoicePrompt for FixedChoice {
        fn choose(&self, _title: &str, _message: &str, options: &[String]) -> Option<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen.lock().unwrap() = options.to_vec();
            self.answer
        }
    }

    fn two_windows() -> FakeWindows {
        let mut windows = FakeWindows {
            app_name: "Mail".to_string(),
            order: vec![11, 22],
            ..Default::default()
        };
        windows.titles.insert(11, "Inbox".to_string());
        windows.geometry.insert(11, (10, 20, 800, 600));
        windows.geometry.insert(22, (100, 200, 400, 300));
        windows
    }

    #[test]
    fn test_first_window_when_not_interactive() {
        let chooser = Arc::new(FixedChoice::new(Some(1)));
        let locator = TargetLocator::new(Arc::new(two_windows()), chooser.clone());

        let region = locator.resolve_region(false).unwrap();
        assert_eq!(region, Region::new(10, 20, 800, 600));
        assert_eq!(chooser.calls.load(Ordering::SeqCst), 0);

        let target = locator.last_target().unwrap();
        assert_eq!(target.app_name, "Mail");
        assert_eq!(target.window_title, "Inbox");
    }

    #[test]
    fn test_interactive_uses_chosen_window() {
        let chooser = Arc::new(FixedChoice::new(Some(1)));
        let locator = TargetLocator::new(Arc::new(two_windows()), chooser.clone());

        let region = locator.resolve_region(true).unwrap();
        assert_eq!(region, Region::new(100, 200, 400, 300));
        assert_eq!(
            *chooser.seen.lock().unwrap(),
            vec!["Inbox".to_string(), "Untitled 2".to_string()]
        );
    }

    #[test]
    fn test_interactive_cancel() {
        let locator = TargetLocator::new(Arc::new(two_windows()), Arc::new(FixedChoice::new(None)));
        assert_eq!(locator.resolve_region(true), Err(TargetError::SelectionCancelled));

        let locator = TargetLocator::new(Arc::new(two_windows()), Arc::new(FixedChoice::new(Some(7))));
        assert_eq!(locator.resolve_region(true), Err(TargetError::SelectionCancelled));
    }

    #[test]
    fn test_no_window() {
        let locator = TargetLocator::new(Arc::new(NoWindowService), Arc::new(FixedChoice::new(None)));
        assert_eq!(locator.resolve_region(false), Err(TargetError::NoWindow));
        assert_eq!(
            locator.resolve_region_or_full_display(false),
            Err(TargetError::NoWindow)
        );
    }

    #[test]
    fn test_missing_geometry_falls_back_to_full_display() {
        let mut windows = two_windows();
        windows.size_missing = true;
        let locator = TargetLocator::new(Arc::new(windows), Arc::new(FixedChoice::new(None)));

        assert_eq!(
            locator.resolve_region(false),
            Err(TargetError::GeometryUnavailable)
        );

        let region = locator.resolve_region_or_full_display(false).unwrap();
        assert!(region.is_full_display());
        assert_eq!(locator.last_target().unwrap().region, Region::FULL_DISPLAY);
    }

    #[test]
    fn test_window_labels_disambiguate_untitled() {
        let labels = window_labels(&[None, Some("  ".to_string()), Some("Notes".to_string())]);
        assert_eq!(labels, vec!["Untitled 1", "Untitled 2", "Notes"]);
    }
}
