//! Media reference resolution
//!
//! A session's `media_ref` must resolve before the session can be created.
//! Resolution yields what a player needs to embed the media, plus its
//! duration when known (used to clamp seeks).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of a bare video identifier, e.g. `dQw4w9WgXcQ`
const VIDEO_ID_LEN: usize = 11;

/// Failure to bind a media reference to a player
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("invalid media reference: {0}")]
    InvalidReference(String),

    #[error("player unavailable: {0}")]
    PlayerUnavailable(String),
}

/// Embeddable configuration for a resolved media reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub media_ref: String,
    pub title: Option<String>,
    pub duration_seconds: Option<f64>,
    pub embed_url: String,
}

/// A known media item, typically loaded from config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub media_ref: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

impl CatalogEntry {
    /// The configured duration if it can bound a position
    pub fn known_duration(&self) -> Option<f64> {
        self.duration_seconds.filter(|d| d.is_finite() && *d > 0.0)
    }
}

pub trait MediaResolver: Send + Sync {
    fn resolve(&self, media_ref: &str) -> Result<MediaInfo, LoadError>;
}

/// Resolves catalog entries first, then (optionally) any well-formed video id
#[derive(Debug, Clone, Default)]
pub struct CatalogResolver {
    entries: HashMap<String, CatalogEntry>,
    accept_video_ids: bool,
}

impl CatalogResolver {
    pub fn new(entries: impl IntoIterator<Item = CatalogEntry>, accept_video_ids: bool) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.media_ref.clone(), e))
                .collect(),
            accept_video_ids,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MediaResolver for CatalogResolver {
    fn resolve(&self, media_ref: &str) -> Result<MediaInfo, LoadError> {
        let trimmed = media_ref.trim();
        if trimmed.is_empty() {
            return Err(LoadError::InvalidReference("empty media reference".into()));
        }

        if let Some(entry) = self.entries.get(trimmed) {
            return Ok(MediaInfo {
                media_ref: entry.media_ref.clone(),
                title: entry.title.clone(),
                duration_seconds: entry.known_duration(),
                embed_url: embed_url(&entry.media_ref),
            });
        }

        if self.accept_video_ids {
            if let Some(id) = extract_video_id(trimmed) {
                if let Some(entry) = self.entries.get(id) {
                    return self.resolve(&entry.media_ref);
                }
                return Ok(MediaInfo {
                    media_ref: id.to_string(),
                    title: None,
                    duration_seconds: None,
                    embed_url: embed_url(id),
                });
            }
        }

        Err(LoadError::InvalidReference(trimmed.to_string()))
    }
}

fn embed_url(media_ref: &str) -> String {
    format!("https://www.youtube.com/embed/{}?enablejsapi=1", media_ref)
}

/// Pull a video id out of a bare id, a `watch?v=` URL, or a short link
pub fn extract_video_id(input: &str) -> Option<&str> {
    let input = input.trim();
    if is_video_id(input) {
        return Some(input);
    }

    let without_scheme = input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))
        .unwrap_or(input);

    let candidate = if let Some(rest) = without_scheme.strip_prefix("youtu.be/") {
        rest
    } else if let Some(idx) = without_scheme.find("v=") {
        let host = &without_scheme[..idx];
        if !host.contains("youtube.com/") {
            return None;
        }
        &without_scheme[idx + 2..]
    } else if let Some(idx) = without_scheme.find("/embed/") {
        &without_scheme[idx + "/embed/".len()..]
    } else {
        return None;
    };

    let end = candidate
        .find(|c: char| c == '&' || c == '?' || c == '#' || c == '/')
        .unwrap_or(candidate.len());
    let id = &candidate[..end];
    is_video_id(id).then_some(id)
}

fn is_video_id(s: &str) -> bool {
    s.len() == VIDEO_ID_LEN
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> CatalogResolver {
        CatalogResolver::new(
            [CatalogEntry {
                media_ref: "abc".into(),
                title: Some("Finals recap".into()),
                duration_seconds: Some(600.0),
            }],
            true,
        )
    }

    #[test]
    fn test_catalog_entry_resolves_with_duration() {
        let info = resolver().resolve("abc").unwrap();
        assert_eq!(info.duration_seconds, Some(600.0));
        assert_eq!(info.title.as_deref(), Some("Finals recap"));
    }

    #[test]
    fn test_unusable_duration_treated_as_unknown() {
        let resolver = CatalogResolver::new(
            [
                CatalogEntry {
                    media_ref: "negative".into(),
                    title: None,
                    duration_seconds: Some(-10.0),
                },
                CatalogEntry {
                    media_ref: "nan".into(),
                    title: None,
                    duration_seconds: Some(f64::NAN),
                },
            ],
            false,
        );
        assert_eq!(resolver.resolve("negative").unwrap().duration_seconds, None);
        assert_eq!(resolver.resolve("nan").unwrap().duration_seconds, None);
    }

    #[test]
    fn test_video_url_resolves_without_duration() {
        let info = resolver()
            .resolve("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10")
            .unwrap();
        assert_eq!(info.media_ref, "dQw4w9WgXcQ");
        assert_eq!(info.duration_seconds, None);
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let err = resolver().resolve("not a video").unwrap_err();
        assert!(matches!(err, LoadError::InvalidReference(_)));
        assert!(resolver().resolve("   ").is_err());
    }

    #[test]
    fn test_video_ids_can_be_disabled() {
        let strict = CatalogResolver::new([], false);
        assert!(strict.resolve("dQw4w9WgXcQ").is_err());
    }

    #[test]
    fn test_extract_video_id_forms() {
        assert_eq!(extract_video_id("dQw4w9WgXcQ"), Some("dQw4w9WgXcQ"));
        assert_eq!(extract_video_id("https://youtu.be/dQw4w9WgXcQ?t=3"), Some("dQw4w9WgXcQ"));
        assert_eq!(
            extract_video_id("https://www.youtube.com/embed/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(extract_video_id("https://example.com/watch?v=dQw4w9WgXcQ"), None);
        assert_eq!(extract_video_id("https://youtu.be/short"), None);
    }
}
