//! Download requests and their probed form.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::error::{BatchError, BatchResult};

/// Suffix appended to the file name of an in-flight artifact.
pub const PART_SUFFIX: &str = ".part";

/// A file the caller wants fetched.
///
/// `destination` is relative to the batch output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Remote URL of the file.
    pub url: String,
    /// Destination relative to the output root.
    pub destination: PathBuf,
}

impl DownloadRequest {
    /// Create a request for `url` stored at `destination`.
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
        }
    }

    /// Create a request whose destination is the decoded last path segment.
    ///
    /// Returns `None` when the URL has no usable file name.
    pub fn from_url(url: &str) -> Option<Self> {
        let parsed = url::Url::parse(url).ok()?;
        let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
        let name = decode_or_raw(segment);
        if name == "." || name == ".." || name.contains('/') {
            return None;
        }
        Some(Self::new(url, name))
    }

    /// Resolve the destination against the output root.
    ///
    /// Absolute destinations and any `..` component are rejected so every
    /// artifact stays under the root. The destination must also name a file:
    /// `.` alone would put the partial next to the root instead of inside it.
    pub fn resolve_destination(&self, output_root: &Path) -> BatchResult<PathBuf> {
        if self.destination.as_os_str().is_empty() {
            return Err(BatchError::InvalidRequest(format!(
                "empty destination for {}",
                self.url
            )));
        }

        for component in self.destination.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(BatchError::InvalidRequest(format!(
                        "destination {} for {} must be a relative path inside the output root",
                        self.destination.display(),
                        self.url
                    )));
                }
            }
        }

        if !self
            .destination
            .components()
            .any(|c| matches!(c, Component::Normal(_)))
        {
            return Err(BatchError::InvalidRequest(format!(
                "destination {} for {} does not name a file",
                self.destination.display(),
                self.url
            )));
        }

        Ok(output_root.join(&self.destination))
    }
}

/// A request after probing, ready for transfer.
///
/// Owned by exactly one worker while it is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    /// Remote URL of the file.
    pub url: String,
    /// Absolute path of the final artifact.
    pub destination: PathBuf,
    /// Expected size in bytes; `0` when unknown.
    pub expected_size: u64,
    /// Whether a byte-range request may be attempted.
    pub resumable: bool,
}

impl ResolvedFile {
    /// Path of the in-flight artifact for this file.
    pub fn part_path(&self) -> PathBuf {
        part_path(&self.destination)
    }

    /// Whether this file is a zip archive eligible for extraction.
    pub fn is_archive(&self) -> bool {
        is_zip_archive(&self.destination)
    }
}

/// Path of the `.part` artifact that belongs to `destination`.
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(PART_SUFFIX);
    destination.with_file_name(name)
}

/// Whether `path` ends in `.zip`, ignoring case.
pub fn is_zip_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// Builds download requests for the files of one remote directory.
///
/// Listing hrefs are percent-encoded; local paths use the decoded form.
#[derive(Debug, Clone)]
pub struct DirectoryPlan {
    base_url: String,
    remote_dir: String,
}

impl DirectoryPlan {
    /// Plan downloads from `remote_dir` (e.g. `"No-Intro/Nintendo%20-%20Game%20Boy/"`)
    /// below `base_url`.
    pub fn new(base_url: impl Into<String>, remote_dir: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            base_url,
            remote_dir: remote_dir.into().trim_start_matches('/').to_string(),
        }
    }

    /// Local directory (relative to the output root) the files land in.
    pub fn local_dir(&self) -> PathBuf {
        PathBuf::from(decode_or_raw(&self.remote_dir))
    }

    /// Build requests for the given listing hrefs.
    ///
    /// Directory entries and the parent link are skipped.
    pub fn requests<'a, I>(&self, hrefs: I) -> Vec<DownloadRequest>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let local_dir = self.local_dir();
        hrefs
            .into_iter()
            .filter(|href| !href.is_empty() && !href.ends_with('/') && *href != "../")
            .map(|href| {
                let url = format!("{}{}{}", self.base_url, self.remote_dir, href);
                DownloadRequest::new(url, local_dir.join(decode_or_raw(href)))
            })
            .collect()
    }
}

fn decode_or_raw(value: &str) -> String {
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/out/games/a.zip")),
            PathBuf::from("/out/games/a.zip.part")
        );
    }

    #[test]
    fn test_is_zip_archive_case_insensitive() {
        assert!(is_zip_archive(Path::new("a.zip")));
        assert!(is_zip_archive(Path::new("dir/B.ZIP")));
        assert!(!is_zip_archive(Path::new("a.7z")));
        assert!(!is_zip_archive(Path::new("zip")));
    }

    #[test]
    fn test_from_url_decodes_last_segment() {
        let req = DownloadRequest::from_url("https://host/files/Super%20Game%20(USA).zip").unwrap();
        assert_eq!(req.destination, PathBuf::from("Super Game (USA).zip"));
    }

    #[test]
    fn test_from_url_rejects_dot_segments() {
        assert!(DownloadRequest::from_url("https://host/").is_none());
        assert!(DownloadRequest::from_url("not a url").is_none());
    }

    #[test]
    fn test_resolve_destination_rejects_escape() {
        let root = Path::new("/out");
        let bad = DownloadRequest::new("http://h/a", "../a.bin");
        assert!(bad.resolve_destination(root).is_err());

        let abs = DownloadRequest::new("http://h/a", "/etc/passwd");
        assert!(abs.resolve_destination(root).is_err());

        for dot in [".", "./", "./.", "././"] {
            let req = DownloadRequest::new("http://h/a", dot);
            assert!(
                matches!(req.resolve_destination(root), Err(BatchError::InvalidRequest(_))),
                "{:?} should be rejected",
                dot
            );
        }

        let dotted = DownloadRequest::new("http://h/a", "./sub/a.bin");
        assert_eq!(
            dotted.resolve_destination(root).unwrap(),
            PathBuf::from("/out/sub/a.bin")
        );

        let ok = DownloadRequest::new("http://h/a", "sub/a.bin");
        assert_eq!(
            ok.resolve_destination(root).unwrap(),
            PathBuf::from("/out/sub/a.bin")
        );
    }

    #[test]
    fn test_directory_plan_skips_directories() {
        let plan = DirectoryPlan::new("https://host/files", "Retro%20Set/");
        let requests = plan.requests(["../", "Sub/", "Game%201.zip", "readme.txt"]);

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url, "https://host/files/Retro%20Set/Game%201.zip");
        assert_eq!(
            requests[0].destination,
            PathBuf::from("Retro Set").join("Game 1.zip")
        );
        assert_eq!(requests[1].destination, PathBuf::from("Retro Set").join("readme.txt"));
    }

    #[test]
    fn test_directory_plan_keeps_undecodable_names() {
        let plan = DirectoryPlan::new("https://host/", "");
        let requests = plan.requests(["bad%ZZname.bin"]);
        assert_eq!(requests[0].destination, PathBuf::from("bad%ZZname.bin"));
    }

    proptest! {
        #[test]
        fn prop_resolved_destination_stays_under_root(parts in proptest::collection::vec("[a-z.]{1,4}", 1..5)) {
            let root = Path::new("/root-dir");
            let req = DownloadRequest::new("http://h/x", parts.join("/"));
            if let Ok(path) = req.resolve_destination(root) {
                prop_assert!(path.starts_with(root));
                prop_assert!(path != root);
                prop_assert!(part_path(&path).starts_with(root));
                prop_assert!(!path.components().any(|c| c == Component::ParentDir));
            }
        }
    }
}
