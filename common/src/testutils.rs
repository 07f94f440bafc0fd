use crate::task::{Locator, TransferTask};

/// Relative paths created under `movie/` by [`setup_media_dir`], sorted
pub const MEDIA_FILES: &[&str] = &[
    "master.m3u8",
    "poster.JPG",
    "stream_0/data000.ts",
    "stream_0/data001.ts",
    "stream_0/index.m3u8",
];

pub fn media_contents(relative_path: &str) -> String {
    format!("contents of {relative_path}")
}

pub async fn setup_media_dir() -> anyhow::Result<tempfile::TempDir> {
    let tmp_dir = tempfile::tempdir()?;
    // movie
    // |- master.m3u8
    // |- poster.JPG
    // |- stream_0
    //    |- data000.ts
    //    |- data001.ts
    //    |- index.m3u8
    // |- empty
    let movie = tmp_dir.path().join("movie");
    tokio::fs::create_dir_all(movie.join("stream_0")).await?;
    tokio::fs::create_dir_all(movie.join("empty")).await?;
    for relative_path in MEDIA_FILES {
        tokio::fs::write(movie.join(relative_path), media_contents(relative_path)).await?;
    }
    Ok(tmp_dir)
}

/// Tasks with distinct relative paths, never touching a real store
pub fn fixed_tasks(count: usize) -> Vec<TransferTask> {
    (0..count)
        .map(|idx| TransferTask {
            relative_path: format!("segment{idx:03}.ts"),
            source: Locator::Remote(format!("src/segment{idx:03}.ts")),
            destination: Locator::Remote(format!("dst/segment{idx:03}.ts")),
        })
        .collect()
}
