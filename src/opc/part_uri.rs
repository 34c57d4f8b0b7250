//! Part URI handling for OPC packages

use crate::error::{Error, Result};
use std::fmt;

/// Represents a URI to a part within an OPC package.
///
/// Part URIs are always absolute paths starting with '/'.
/// Example: `/package/services/digital-signature/origin.psdsor`
#[derive(Clone, Debug, Eq)]
pub struct PartUri {
    path: String,
}

impl PartUri {
    /// Create a new PartUri from a string.
    ///
    /// The path will be normalized (leading '/' ensured, no trailing '/').
    pub fn new(path: &str) -> Result<Self> {
        let path = path.trim();

        if path.is_empty() {
            return Err(Error::InvalidPartUri("empty path".into()));
        }

        // Normalize: ensure leading '/', remove trailing '/'
        let normalized = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        let normalized = normalized.trim_end_matches('/').to_string();

        // Validate: no double slashes, no '..' for now
        if normalized.contains("//") {
            return Err(Error::InvalidPartUri(format!(
                "invalid path '{}': contains double slashes",
                path
            )));
        }

        Ok(Self { path: normalized })
    }

    /// Create PartUri without validation (for internal use)
    pub(crate) fn from_string_unchecked(path: String) -> Self {
        Self { path }
    }

    /// Get the path as a string slice
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Get the ZIP entry name for this URI (no leading '/').
    pub fn zip_entry_name(&self) -> &str {
        &self.path[1..]
    }

    /// Get the file name portion
    pub fn file_name(&self) -> Option<&str> {
        self.path.rsplit('/').next()
    }

    /// Get the file extension
    pub fn extension(&self) -> Option<&str> {
        self.file_name()
            .and_then(|name| name.rsplit('.').next())
            .filter(|ext| !ext.is_empty() && !ext.contains('/'))
    }

    /// Get the parent directory URI
    pub fn parent(&self) -> Option<PartUri> {
        let pos = self.path.rfind('/')?;
        if pos == 0 {
            None
        } else {
            Some(PartUri {
                path: self.path[..pos].to_string(),
            })
        }
    }

    /// Get the relationships URI for this part.
    ///
    /// For `/foo/bar.xml`, returns `/foo/_rels/bar.xml.rels`
    pub fn relationships_uri(&self) -> PartUri {
        let file_name = self.file_name().unwrap_or("");
        let parent = self.parent().map(|p| p.path).unwrap_or_default();

        let rels_path = format!("{}/_rels/{}.rels", parent, file_name);
        PartUri { path: rels_path }
    }

    /// Resolve a relative path against this URI.
    ///
    /// For `/foo/bar.xml` and `../baz/quux.png`, returns `/baz/quux.png`
    pub fn resolve(&self, relative: &str) -> Result<PartUri> {
        if relative.starts_with('/') {
            // Absolute path
            return PartUri::new(relative);
        }

        let base_dir = self.parent().map(|p| p.path).unwrap_or_default();
        let mut parts: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();

        for segment in relative.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    parts.pop();
                }
                s => parts.push(s),
            }
        }

        let resolved = format!("/{}", parts.join("/"));
        PartUri::new(&resolved)
    }

    /// Check if this URI points to a relationships file
    pub fn is_relationships(&self) -> bool {
        self.path.contains("/_rels/") && self.path.ends_with(".rels")
    }
}

impl fmt::Display for PartUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

impl std::str::FromStr for PartUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PartUri::new(s)
    }
}

// OPC part name comparison is case-insensitive (ECMA-376 part 2, §10.1.2.3).
// Hash is derived from the same lowercased projection so that equal URIs
// (per PartialEq) always hash equal, preserving the HashMap contract.
impl PartialEq for PartUri {
    fn eq(&self, other: &Self) -> bool {
        self.path.eq_ignore_ascii_case(&other.path)
    }
}

impl std::hash::Hash for PartUri {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.path.to_ascii_lowercase().hash(state);
    }
}

/// Well-known part URIs used by the digital-signature subsystem.
pub mod well_known {
    use super::PartUri;

    pub fn content_types() -> PartUri {
        PartUri::from_string_unchecked("/[Content_Types].xml".into())
    }

    pub fn package_rels() -> PartUri {
        PartUri::from_string_unchecked("/_rels/.rels".into())
    }

    /// The signature-origin part: an empty-bodied part that anchors every
    /// signature via a relationship, and is itself anchored from the
    /// package root.
    pub fn signature_origin() -> PartUri {
        PartUri::from_string_unchecked(
            "/package/services/digital-signature/origin.psdsor".into(),
        )
    }

    /// Allocate a fresh XML-signature part URI for a newly created
    /// signature, named by a random identifier (typically a UUID).
    pub fn xml_signature(id: &str) -> PartUri {
        PartUri::from_string_unchecked(format!(
            "/package/services/digital-signature/xml-signature/{}.psdsxs",
            id
        ))
    }
}
