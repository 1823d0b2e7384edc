//! Destination naming for multi-item transfers

use crate::error::TransferError;
use std::path::{Component, Path, PathBuf};

/// Object name for `source` uploaded under `prefix`.
///
/// Only the file name of `source` is kept; a trailing `/` on the prefix is
/// not doubled.
pub fn upload_destination(prefix: &str, source: &Path) -> Result<String, TransferError> {
    let base = source
        .file_name()
        .ok_or_else(|| TransferError::InvalidPath(source.display().to_string()))?
        .to_string_lossy();

    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        Ok(base.into_owned())
    } else {
        Ok(format!("{}/{}", prefix, base))
    }
}

/// Local path for `object_name` downloaded under `prefix`.
///
/// `existing` (the pass-through destination, if any) sits between the
/// prefix and the object name. Root, current-dir and parent-dir components
/// of the joined parts are dropped so the result stays under `prefix`.
pub fn download_destination(prefix: &Path, existing: Option<&Path>, object_name: &str) -> PathBuf {
    let mut destination = prefix.to_path_buf();
    if let Some(existing) = existing {
        push_relative(&mut destination, existing);
    }
    push_relative(&mut destination, Path::new(object_name));
    destination
}

fn push_relative(base: &mut PathBuf, part: &Path) {
    for component in part.components() {
        if let Component::Normal(segment) = component {
            base.push(segment);
        }
    }
}

/// `name` with a leading literal `prefix` removed.
///
/// This is plain text matching, not path-aware: stripping `data` from
/// `database/x` leaves `base/x`. Names that don't start with `prefix` are
/// returned unchanged.
pub fn strip_literal_prefix<'a>(name: &'a str, prefix: &str) -> &'a str {
    name.strip_prefix(prefix).unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_destination() {
        assert_eq!(upload_destination("up/", Path::new("a/x.txt")).unwrap(), "up/x.txt");
        assert_eq!(upload_destination("up", Path::new("b/y.txt")).unwrap(), "up/y.txt");
        assert_eq!(
            upload_destination("deep/er//", Path::new("/abs/z.bin")).unwrap(),
            "deep/er/z.bin"
        );
        assert_eq!(upload_destination("", Path::new("z.bin")).unwrap(), "z.bin");
    }

    #[test]
    fn test_upload_destination_needs_file_name() {
        assert!(matches!(
            upload_destination("up", Path::new("/")),
            Err(TransferError::InvalidPath(_))
        ));
        assert!(upload_destination("up", Path::new("dir/..")).is_err());
    }

    #[test]
    fn test_download_destination() {
        let prefix = Path::new("/tmp/mirror");
        assert_eq!(
            download_destination(prefix, None, "2024/a.csv"),
            PathBuf::from("/tmp/mirror/2024/a.csv")
        );
        assert_eq!(
            download_destination(prefix, Some(Path::new("/reports")), "a.csv"),
            PathBuf::from("/tmp/mirror/reports/a.csv")
        );
        assert_eq!(
            download_destination(prefix, None, "../../etc/passwd"),
            PathBuf::from("/tmp/mirror/etc/passwd")
        );
    }

    #[test]
    fn test_strip_is_literal() {
        assert_eq!(strip_literal_prefix("data/2024/a.csv", "data/"), "2024/a.csv");
        assert_eq!(strip_literal_prefix("database/x", "data"), "base/x");
        assert_eq!(strip_literal_prefix("logs/a.log", "data/"), "logs/a.log");
    }
}
