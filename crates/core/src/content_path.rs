//! Content paths and `content://` addresses.
//!
//! A content path is a string of the form `/{c0}/{c1}..{cx}.{ext}`: one or
//! more path components followed by an optional extension. The path root is
//! the first component; [`ContentPath::rest`] narrows the path to everything
//! after the current root. Paths are immutable once constructed.

use crate::error::{Error, Result};
use std::collections::HashMap;
use url::Url;

/// An immutable content path: ordered components plus an optional extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentPath {
    /// All components of the full path.
    components: Vec<String>,
    /// Index of the current root component.
    root_idx: usize,
    /// The extension at the end of the path, without the leading dot.
    ext: Option<String>,
}

impl ContentPath {
    /// Parse a path string such as `files/content/page.html`.
    ///
    /// Leading and trailing slashes are ignored. An extension on the final
    /// component is split off and available through [`ContentPath::ext`].
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(Error::InvalidPath("empty path".to_string()));
        }

        let mut components: Vec<String> = Vec::new();
        for component in trimmed.split('/') {
            if component.is_empty() {
                return Err(Error::InvalidPath(format!(
                    "empty component in path '{path}'"
                )));
            }
            components.push(component.to_string());
        }

        // Split an extension off the last component.
        let mut ext = None;
        if let Some(last) = components.last_mut()
            && let Some(dot) = last.rfind('.')
            && dot > 0
            && dot < last.len() - 1
        {
            ext = Some(last[dot + 1..].to_string());
            last.truncate(dot);
        }

        Ok(Self {
            components,
            root_idx: 0,
            ext,
        })
    }

    /// The root component of the current path.
    pub fn root(&self) -> &str {
        &self.components[self.root_idx]
    }

    /// The path extension, if any.
    pub fn ext(&self) -> Option<&str> {
        self.ext.as_deref()
    }

    /// The portion of the path after the root component.
    ///
    /// Returns a new path whose root is the component after the current
    /// root, or `None` if no components are left.
    pub fn rest(&self) -> Option<ContentPath> {
        if self.root_idx + 1 < self.components.len() {
            Some(Self {
                components: self.components.clone(),
                root_idx: self.root_idx + 1,
                ext: self.ext.clone(),
            })
        } else {
            None
        }
    }

    /// The current root component and all components following it.
    pub fn components(&self) -> &[String] {
        &self.components[self.root_idx..]
    }

    /// Whether the path has no root component.
    pub fn is_empty(&self) -> bool {
        self.root_idx >= self.components.len()
    }

    /// The full path as a string, including any extension.
    pub fn full_path(&self) -> String {
        let joined = self.components.join("/");
        match &self.ext {
            Some(ext) => format!("{joined}.{ext}"),
            None => joined,
        }
    }

    /// The portion of the full path from the current root onwards.
    pub fn relative_path(&self) -> String {
        let joined = self.components().join("/");
        match &self.ext {
            Some(ext) => format!("{joined}.{ext}"),
            None => joined,
        }
    }
}

/// A parsed `content://{authority}/{path}[?param=value...]` address.
#[derive(Clone, Debug)]
pub struct ContentAddress {
    /// The authority name addressed by the URL.
    pub authority: String,
    /// The path forwarded to the authority.
    pub path: ContentPath,
    /// Query parameters.
    pub params: HashMap<String, String>,
}

/// The URL scheme used for content addresses.
pub const CONTENT_SCHEME: &str = "content";

impl ContentAddress {
    /// Parse a content address from its URL form.
    pub fn parse(address: &str) -> Result<Self> {
        let url = Url::parse(address)
            .map_err(|e| Error::InvalidAddress(format!("{address}: {e}")))?;
        if url.scheme() != CONTENT_SCHEME {
            return Err(Error::InvalidAddress(format!(
                "unsupported scheme '{}' in {address}",
                url.scheme()
            )));
        }
        let authority = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidAddress(format!("missing authority in {address}")))?
            .to_string();
        let path = ContentPath::parse(url.path())?;
        let params = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Ok(Self {
            authority,
            path,
            params,
        })
    }
}
