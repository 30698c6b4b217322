//! Source discovery from the metadata folder.
//!
//! Each monitored source is described by a `<id>_native.md` CV document.
//! Discovery enumerates those files in sorted order, optionally extracts a
//! display name from the first markdown header, and applies the configured
//! source cap.

use crate::error::{PipelineError, Result};
use crate::models::Source;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Options controlling source discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Extract display names from CV headers.
    pub extract_names: bool,
    /// Keep only the first N discovered sources (truncation, not sampling).
    pub max_sources: Option<usize>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            extract_names: true,
            max_sources: None,
        }
    }
}

/// Discover sources from the two input folders.
///
/// Both folders must exist; the primary folder holds the daily file
/// listings (validated here, read later by the evidence loader), the
/// metadata folder holds one CV document per source. Returns sources in
/// stable sorted order, deduplicated by id.
pub fn discover_sources(
    primary_folder: &Path,
    metadata_folder: &Path,
    options: &DiscoveryOptions,
) -> Result<Vec<Source>> {
    for folder in [primary_folder, metadata_folder] {
        if !folder.is_dir() {
            return Err(PipelineError::NotFound(folder.to_path_buf()));
        }
    }

    let mut cv_paths: Vec<_> = fs::read_dir(metadata_folder)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with("_native.md"))
        })
        .collect();
    cv_paths.sort();

    if cv_paths.is_empty() {
        return Err(PipelineError::NoSources(metadata_folder.to_path_buf()));
    }

    let mut sources = Vec::new();
    for path in cv_paths {
        let Some(id) = source_id_from_path(&path) else {
            continue;
        };
        if sources.iter().any(|s: &Source| s.id == id) {
            continue;
        }

        let cv = match fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!("Could not read CV file {}: {}", path.display(), e);
                None
            }
        };

        let display_name = if options.extract_names {
            cv.as_deref().and_then(extract_name_from_cv)
        } else {
            None
        };

        debug!(
            "Discovered source {} ({})",
            id,
            display_name.as_deref().unwrap_or("unnamed")
        );

        sources.push(Source {
            id,
            display_name,
            cv,
        });
    }

    if let Some(max) = options.max_sources {
        sources.truncate(max);
    }

    Ok(sources)
}

/// Extract the source id from a CV path: "195385_native.md" -> "195385".
fn source_id_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|stem| stem.trim_end_matches("_native").to_string())
        .filter(|id| !id.is_empty())
}

/// Extract a display name from the first markdown header line.
///
/// "# _Settlement_Layout_2" -> "Settlement_Layout_2". Returns None when
/// the document has no usable header; the caller falls back to the raw id.
fn extract_name_from_cv(cv: &str) -> Option<String> {
    let first_line = cv.lines().next()?.trim();
    if !first_line.starts_with('#') {
        return None;
    }

    let name = first_line
        .trim_start_matches('#')
        .trim()
        .trim_matches('_')
        .to_string();

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
