//! Logical path resolution.
//!
//! A logical path names a container by its first segment and a blob key
//! by the rest. Blob keys always use `/` on the wire, whatever separator
//! the caller configured.

/// Separator used inside blob keys on the backend.
pub const BLOB_DELIMITER: char = '/';

/// [`BLOB_DELIMITER`] as the `delimiter` query value.
pub const BLOB_DELIMITER_STR: &str = "/";

/// A logical path split into its backend parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// First segment, or empty for the root.
    pub container: String,
    /// Remaining segments joined with `/`, or empty.
    pub blob_key: String,
    /// True for the empty path.
    pub is_root: bool,
}

impl ResolvedPath {
    /// True when the path names a container and nothing below it.
    pub fn is_container(&self) -> bool {
        !self.is_root && self.blob_key.is_empty()
    }

    /// Last segment of the path: the blob's display name, or the
    /// container name for a container-only path.
    pub fn name(&self) -> &str {
        if self.blob_key.is_empty() {
            &self.container
        } else {
            self.blob_key
                .rsplit(BLOB_DELIMITER)
                .next()
                .unwrap_or(&self.blob_key)
        }
    }

    /// Listing prefix selecting everything below this path inside its
    /// container: the blob key plus a trailing `/`, or empty at
    /// container level.
    pub fn child_prefix(&self) -> String {
        if self.blob_key.is_empty() {
            String::new()
        } else {
            format!("{}{}", self.blob_key, BLOB_DELIMITER)
        }
    }

    /// Rebuild the logical path using `separator`.
    pub fn join(&self, separator: char) -> String {
        if self.is_root {
            return String::new();
        }
        if self.blob_key.is_empty() {
            return self.container.clone();
        }
        let key = self
            .blob_key
            .split(BLOB_DELIMITER)
            .collect::<Vec<_>>()
            .join(&separator.to_string());
        format!("{}{}{}", self.container, separator, key)
    }
}

/// Normalise `path`: `/`, `\` and `separator` all count as separators,
/// runs of them collapse to one `separator`, and leading/trailing
/// separators are dropped.
pub fn clean(path: &str, separator: char) -> String {
    segments(path, separator)
        .collect::<Vec<_>>()
        .join(&separator.to_string())
}

/// Split a logical path into container and blob key.
pub fn resolve(path: &str, separator: char) -> ResolvedPath {
    let mut parts = segments(path, separator);
    match parts.next() {
        None => ResolvedPath {
            container: String::new(),
            blob_key: String::new(),
            is_root: true,
        },
        Some(container) => ResolvedPath {
            container: container.to_string(),
            blob_key: parts.collect::<Vec<_>>().join("/"),
            is_root: false,
        },
    }
}

/// Join a directory path and a child name with `separator`.
pub fn child(parent: &str, name: &str, separator: char) -> String {
    let parent = clean(parent, separator);
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}{separator}{name}")
    }
}

fn segments<'a>(path: &'a str, separator: char) -> impl Iterator<Item = &'a str> + 'a {
    path.split(move |c: char| c == separator || c == '/' || c == '\\')
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_path() {
        for p in ["", "/", "//", "\\"] {
            let r = resolve(p, '/');
            assert!(r.is_root, "{p:?} should be root");
            assert!(r.container.is_empty());
            assert!(r.blob_key.is_empty());
        }
    }

    #[test]
    fn test_container_only() {
        let r = resolve("/photos/", '/');
        assert!(!r.is_root);
        assert!(r.is_container());
        assert_eq!(r.container, "photos");
        assert_eq!(r.blob_key, "");
        assert_eq!(r.name(), "photos");
        assert_eq!(r.child_prefix(), "");
    }

    #[test]
    fn test_nested_path() {
        let r = resolve("photos//2024/summer/beach.jpg", '/');
        assert_eq!(r.container, "photos");
        assert_eq!(r.blob_key, "2024/summer/beach.jpg");
        assert_eq!(r.name(), "beach.jpg");
        assert_eq!(r.child_prefix(), "2024/summer/beach.jpg/");
    }

    #[test]
    fn test_custom_separator_normalizes_to_slash_keys() {
        let r = resolve("docs\\reports\\Q1.pdf", '\\');
        assert_eq!(r.container, "docs");
        assert_eq!(r.blob_key, "reports/Q1.pdf");
        assert_eq!(r.join('\\'), "docs\\reports\\Q1.pdf");
    }

    #[test]
    fn test_case_is_preserved() {
        let r = resolve("Data/ReadMe.TXT", '/');
        assert_eq!(r.container, "Data");
        assert_eq!(r.blob_key, "ReadMe.TXT");
    }

    #[test]
    fn test_resolve_then_join_reconstructs_cleaned_path() {
        let cases = [
            "",
            "/",
            "a",
            "a/",
            "/a/b/c",
            "a//b///c/",
            "x\\y/z",
            "container/dir/file.txt",
        ];
        for sep in ['/', '\\', ':'] {
            for p in cases {
                let p = p.replace('/', &sep.to_string());
                assert_eq!(resolve(&p, sep).join(sep), clean(&p, sep), "path {p:?}");
            }
        }
    }

    #[test]
    fn test_child() {
        assert_eq!(child("", "c", '/'), "c");
        assert_eq!(child("/c/", "d", '/'), "c/d");
        assert_eq!(child("c/d", "f.txt", '/'), "c/d/f.txt");
    }
}
