//! Request target → storage file name.

use std::fmt;

/// Percent-encoded file name identifying one cached request target.
///
/// Every byte outside `A-Z a-z 0-9 - _ . ~` is escaped, so the name never
/// contains a path separator. A leading `.` is escaped as well: the name can
/// never be `.`/`..` and never collides with the dot-prefixed temporary files
/// the store writes through.
///
/// # Examples
///
/// ```
/// use modelcache::cache::CacheKey;
///
/// let key = CacheKey::for_target("/modelviewer/tbc/meta/armor/1/15372.json");
/// assert_eq!(key.as_str(), "%2Fmodelviewer%2Ftbc%2Fmeta%2Farmor%2F1%2F15372.json");
/// assert_eq!(key.target(), "/modelviewer/tbc/meta/armor/1/15372.json");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a raw request target (path and query).
    pub fn for_target(target: &str) -> Self {
        let encoded = urlencoding::encode(target);
        match encoded.strip_prefix('.') {
            Some(rest) => Self(format!("%2E{rest}")),
            None => Self(encoded.into_owned()),
        }
    }

    /// Recovers a key from a file name found in the storage root.
    ///
    /// Returns `None` for names this mapper could not have produced, such as
    /// in-flight temporary files.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let target = urlencoding::decode(name).ok()?;
        let key = Self::for_target(&target);
        (key.0 == name).then_some(key)
    }

    /// Returns the encoded file name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decodes the key back into the request target it was derived from.
    pub fn target(&self) -> String {
        // Keys only ever hold the encoding of a valid UTF-8 string.
        urlencoding::decode(&self.0)
            .map(|t| t.into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
