//! Small path and filesystem helpers shared by the pool container and the
//! heap loader. Everything here works on pool-relative names as they appear
//! in the directory file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Composes the path of a file inside the pool directory from the parts the
/// directory file stores. `name` may itself contain separators (physical
/// names look like `07/701`), but must not be absolute: an absolute name in
/// a pool would let a directory file escape its own farm.
pub fn compose_path(
    pool_dir: &Path,
    sub_dir: Option<&str>,
    name: &str,
    extension: Option<&str>,
) -> io::Result<PathBuf> {
    if Path::new(name).is_absolute() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("absolute name {:?} in a pool-relative context", name),
        ));
    }
    let mut path = pool_dir.to_path_buf();
    if let Some(dir) = sub_dir {
        path.push(dir);
    }
    match extension {
        Some(ext) => path.push(format!("{}.{}", name, ext)),
        None => path.push(name),
    }
    Ok(path)
}

/// Whether the file can actually be opened for reading, as opposed to
/// merely existing.
pub fn is_readable(path: &Path) -> bool { fs::File::open(path).is_ok() }

/// Whether `path` is a directory we can descend into (readable and
/// executable for this process).
pub fn is_traversable_directory(path: &Path) -> bool {
    path.is_dir() && fs::read_dir(path).is_ok()
}

/// Physical names are written with whatever separator the persisting server
/// used. Bring them to the separator of this platform.
pub fn normalize_separators(name: &str) -> String {
    let sep = std::path::MAIN_SEPARATOR;
    name.chars().map(|c| if c == '/' || c == '\\' { sep } else { c }).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn compose_rejects_absolute_names() {
        let err = compose_path(Path::new("/db"), None, "/etc/passwd", None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn compose_joins_subdir_name_and_extension() {
        let path = compose_path(Path::new("/db"), Some("BACKUP"), "BBP", Some("dir")).unwrap();
        assert_eq!(path, PathBuf::from("/db/BACKUP/BBP.dir"));

        let path = compose_path(Path::new("/db"), None, "07/701", Some("tail")).unwrap();
        assert_eq!(path, PathBuf::from("/db/07/701.tail"));
    }

    #[test]
    fn separator_normalization() {
        assert_eq!(normalize_separators("07\\701"), format!("07{}701", std::path::MAIN_SEPARATOR));
        assert_eq!(normalize_separators("07/701"), format!("07{}701", std::path::MAIN_SEPARATOR));
    }

    #[test]
    fn traversable_directory_probe() {
        let tmp = TempDir::new("bbp-utils-test").unwrap();
        assert!(is_traversable_directory(tmp.path()));
        assert!(!is_traversable_directory(&tmp.path().join("nope")));
    }
}
