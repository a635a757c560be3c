use std::fmt;

use serde::{Deserialize, Serialize};

const CFI_PREFIX: &str = "epubcfi(";

/// Fragment-stripped, document-relative path that names "the same chapter" no matter
/// whether it was reached through the TOC, the spine, or a CFI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChapterIdentity(String);

impl ChapterIdentity {
    /// Strips any `#fragment` suffix. Returns `None` when nothing is left.
    pub fn from_reference(reference: &str) -> Option<Self> {
        let path = strip_fragment(reference.trim());
        if path.is_empty() {
            return None;
        }
        Some(Self(path.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ChapterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChapterIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationReference {
    /// A TOC or spine href, possibly carrying a `#fragment`.
    Href(String),
    /// A location pointer produced by the rendering engine.
    Cfi(String),
    /// An already-normalized chapter identity.
    ChapterId(ChapterIdentity),
}

impl NavigationReference {
    /// Classifies a raw engine string. Anything shaped like `epubcfi(...)` is a CFI,
    /// everything else is treated as an href.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if is_cfi(trimmed) {
            return Some(Self::Cfi(trimmed.to_owned()));
        }
        Some(Self::Href(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Href(value) | Self::Cfi(value) => value,
            Self::ChapterId(id) => id.as_str(),
        }
    }
}

impl From<ChapterIdentity> for NavigationReference {
    fn from(id: ChapterIdentity) -> Self {
        Self::ChapterId(id)
    }
}

impl fmt::Display for NavigationReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_cfi(raw: &str) -> bool {
    raw.starts_with(CFI_PREFIX)
}

pub fn strip_fragment(reference: &str) -> &str {
    match reference.split_once('#') {
        Some((path, _)) => path,
        None => reference,
    }
}

pub fn fragment(reference: &str) -> Option<&str> {
    reference
        .split_once('#')
        .map(|(_, hash)| hash)
        .filter(|hash| !hash.is_empty())
}
