pub mod front_matter;
pub mod walker;

use std::path::Path;

use anyhow::{Context, Result};

use self::front_matter::parse_article;
use crate::models::ArticleDraft;

/// 記事ファイルを読み、ストアに渡せるドラフトに変換する。
/// タイトルが無ければファイル名、カテゴリが無ければ health を使う。
pub fn draft_from_file(path: &Path, source: &str) -> Result<ArticleDraft> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("記事ファイルを読めません: {}", path.display()))?;
    let (front_matter, body) = parse_article(&raw);

    let title = front_matter.title.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string())
    });

    Ok(ArticleDraft {
        title,
        content: body,
        category: front_matter.category.unwrap_or_else(|| "health".to_string()),
        tags: front_matter.tags,
        source: source.to_string(),
        file_path: Some(path.to_string_lossy().to_string()),
    })
}
