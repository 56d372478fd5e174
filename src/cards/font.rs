use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fontdue::{Font, FontSettings};
use tracing::{debug, info};

use crate::error::{CardError, Result};

/// Searched in order when no font is configured
pub const FONT_CANDIDATES: &[&str] = &[
    "assets/fonts/Inter-Regular.ttf",
    "assets/fonts/Roboto-Regular.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Default)]
struct Entries {
    fonts: HashMap<PathBuf, Arc<Font>>,
    order: VecDeque<PathBuf>,
}

/// Parsed fonts keyed by path, evicting the oldest entry past `capacity`
pub struct FontCache {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl FontCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Parse the font at `path`, or return the cached copy
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<Arc<Font>> {
        let path = path.as_ref();
        if let Some(font) = self.cached(path) {
            return Ok(font);
        }

        let bytes = std::fs::read(path).map_err(|e| CardError::FontParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let font = Font::from_bytes(bytes, FontSettings::default()).map_err(|reason| {
            CardError::FontParse {
                path: path.display().to_string(),
                reason: reason.to_string(),
            }
        })?;
        let font = Arc::new(font);
        debug!("Loaded font {}", path.display());

        if let Ok(mut entries) = self.entries.lock() {
            if !entries.fonts.contains_key(path) {
                entries.order.push_back(path.to_path_buf());
            }
            entries.fonts.insert(path.to_path_buf(), Arc::clone(&font));
            while entries.order.len() > self.capacity {
                if let Some(oldest) = entries.order.pop_front() {
                    entries.fonts.remove(&oldest);
                }
            }
        }
        Ok(font)
    }

    /// Load `preferred` if given, otherwise the first candidate present on disk
    pub fn resolve(&self, preferred: Option<&Path>) -> Result<Arc<Font>> {
        if let Some(path) = preferred {
            if path.is_file() {
                return self.load(path);
            }
            return Err(CardError::FontNotFound {
                tried: path.display().to_string(),
            }
            .into());
        }

        match FONT_CANDIDATES.iter().map(Path::new).find(|p| p.is_file()) {
            Some(path) => {
                info!("🔤 Using font {}", path.display());
                self.load(path)
            }
            None => Err(CardError::FontNotFound {
                tried: FONT_CANDIDATES.join(", "),
            }
            .into()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.fonts.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, path: &Path) -> Option<Arc<Font>> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.fonts.get(path).cloned())
    }
}

impl Default for FontCache {
    fn default() -> Self {
        Self::new(8)
    }
}

/// First system font found, for tests that need real glyphs
#[cfg(test)]
pub(crate) fn system_font() -> Option<PathBuf> {
    FONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}
