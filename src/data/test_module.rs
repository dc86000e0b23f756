//! On-disk fixtures shared by the dataset tests

use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

/// Write a `width x height` PNG with a simple gradient
pub(crate) fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_fn(width, height, |x, y| Rgb([(x * 7) as u8, (y * 13) as u8, 200]))
        .save(&path)
        .unwrap();
    path
}

/// Create `root/name` holding `count` images named `0.png`, `1.png`, ...
pub(crate) fn concept_dir(root: &Path, name: &str, count: usize) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..count {
        write_png(&dir, &format!("{}.png", i), 10 + i as u32, 9);
    }
    dir
}
