// NOTE: every test will complain about the functions it doesn't use
#![allow(unused)]

use std::fs;
use std::path::{Path, PathBuf};

/// Creates an empty frame file under root, along with its parent directories.
pub fn touch_frame(root: &Path, rel: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("rel has a filename")).unwrap();
    fs::write(&path, "").unwrap();
    path
}
