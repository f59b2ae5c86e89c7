//! Game page detection: which app the library is showing and where the
//! overlay should be anchored.

use regex::Regex;
use scraper::Selector;

use crate::page::PageTree;
use crate::types::{GamePage, OverlayError, OverlayResult, SubjectId};

/// Header logo image on the game page.
pub const HEADER_IMAGE_SELECTOR: &str = "._3NBxSLAZLbbbnul8KfDFjw._2dzwXkCVAuZGFC-qKgo8XB";
/// Hero image, present when the game has no logo.
pub const FALLBACK_IMAGE_SELECTOR: &str = r#"img.HNbe3eZf6H7dtJ042x1vM[src*="library_hero"]"#;
/// Header container the overlay is appended to.
pub const CONTAINER_SELECTOR: &str = ".NZMJ6g2iVnFsOOp-lDmIP";
/// App id inside an asset URL, e.g. `/assets/1245620/logo.png`.
pub const APP_ID_PATTERN: &str = r"/assets/(\d+)";

/// Structural markers used to find a game page.
///
/// The class names are generated by the Steam client build and change
/// between client releases; keep them together so they can be swapped as a
/// set.
#[derive(Debug, Clone)]
pub struct Markers {
    header_image: Selector,
    fallback_image: Selector,
    container: Selector,
    app_id_pattern: Regex,
    sources: MarkerSources,
}

/// The raw marker strings, for display in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MarkerSources {
    pub header_image: String,
    pub fallback_image: String,
    pub container: String,
    pub app_id_pattern: String,
}

impl Markers {
    /// Build a marker set from selector and pattern strings.
    pub fn new(
        header_image: &str,
        fallback_image: &str,
        container: &str,
        pattern: &str,
    ) -> OverlayResult<Self> {
        let app_id_pattern = Regex::new(pattern)
            .map_err(|e| OverlayError::InvalidMarker(format!("{pattern}: {e}")))?;
        if app_id_pattern.captures_len() < 2 {
            return Err(OverlayError::InvalidMarker(format!(
                "{pattern}: pattern needs a capture group for the app id"
            )));
        }

        Ok(Self {
            header_image: parse_selector(header_image)?,
            fallback_image: parse_selector(fallback_image)?,
            container: parse_selector(container)?,
            app_id_pattern,
            sources: MarkerSources {
                header_image: header_image.to_string(),
                fallback_image: fallback_image.to_string(),
                container: container.to_string(),
                app_id_pattern: pattern.to_string(),
            },
        })
    }

    /// Markers for the current Steam library layout.
    pub fn library() -> OverlayResult<Self> {
        Self::new(
            HEADER_IMAGE_SELECTOR,
            FALLBACK_IMAGE_SELECTOR,
            CONTAINER_SELECTOR,
            APP_ID_PATTERN,
        )
    }

    /// Raw marker strings.
    pub fn sources(&self) -> &MarkerSources {
        &self.sources
    }

    /// Extract an app id from an image URL.
    pub fn app_id_from_src(&self, src: &str) -> Option<SubjectId> {
        let caps = self.app_id_pattern.captures(src)?;
        caps.get(1)?.as_str().parse().ok()
    }
}

fn parse_selector(selector: &str) -> OverlayResult<Selector> {
    Selector::parse(selector).map_err(|e| OverlayError::InvalidMarker(format!("{selector}: {e:?}")))
}

/// Detect the game page currently shown.
///
/// Tries the header logo first, then the hero image. Pure: repeated calls
/// on an unchanged page return the same app id, and nothing is cached
/// between calls.
pub fn detect<P: PageTree + ?Sized>(page: &P, markers: &Markers) -> Option<GamePage> {
    try_extract(page, &markers.header_image, markers)
        .or_else(|| try_extract(page, &markers.fallback_image, markers))
}

fn try_extract<P: PageTree + ?Sized>(
    page: &P,
    image: &Selector,
    markers: &Markers,
) -> Option<GamePage> {
    let img = page.select_first(image)?;
    let src = page.attribute(img, "src").unwrap_or_default();
    let subject_id = markers.app_id_from_src(&src)?;
    // An image outside the header container is not a game page we can
    // anchor to.
    let container = page.closest(img, &markers.container)?;
    Some(GamePage {
        subject_id,
        container,
    })
}
