use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 取り込み対象のマークダウン記事を列挙する
pub fn walk_articles(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("md") | Some("mdx")
            )
        })
        .collect();
    files.sort();
    files
}
