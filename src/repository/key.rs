//! Cache key derivation.
//!
//! The root resource is always stored under [`ROOT_KEY`]. Every other
//! resource is stored under its trailing non-empty path segment plus
//! [`KEY_SUFFIX`], so `http://host/api/people/` and `http://host/api/people`
//! share the key `people.json`.

use url::Url;

/// Fixed key of the root resource.
pub const ROOT_KEY: &str = "root";

/// Suffix appended to a resource's trailing path segment.
pub const KEY_SUFFIX: &str = ".json";

/// Derives the cache key of a non-root resource.
///
/// Returns `None` when the URL has no non-empty path segment (e.g. the bare
/// origin) or cannot have a path at all.
///
/// # Examples
///
/// ```
/// use rfetch::repository::cache_key;
///
/// let url = "http://example.com/api/people/?page=2".parse().unwrap();
/// assert_eq!(cache_key(&url).as_deref(), Some("people.json"));
///
/// let origin = "http://example.com/".parse().unwrap();
/// assert_eq!(cache_key(&origin), None);
/// ```
pub fn cache_key(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(|segment| format!("{segment}{KEY_SUFFIX}"))
}
