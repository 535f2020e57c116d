use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::openai::{OpenAiClient, ProviderError};

/// 埋め込みモデルの入力上限。超過分は失敗させず切り詰める。
pub const MAX_EMBED_CHARS: usize = 8000;

/// text-embedding-3-small の次元数
pub const EMBEDDING_DIM: usize = 1536;

/// content のSHA-256ハッシュ（16進）。再埋め込み要否の判定キー。
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// 上限を超える入力をchar境界で切り詰める
pub fn truncate_input(text: &str) -> String {
    if text.chars().count() <= MAX_EMBED_CHARS {
        return text.to_string();
    }
    text.chars().take(MAX_EMBED_CHARS).collect()
}

pub struct EmbeddingGenerator {
    client: Arc<OpenAiClient>,
}

impl EmbeddingGenerator {
    pub fn new(client: Arc<OpenAiClient>) -> Self {
        Self { client }
    }

    /// 記事の埋め込み入力はタイトル＋本文
    pub fn article_input(title: &str, content: &str) -> String {
        format!("{}\n\n{}", title, content)
    }

    pub async fn generate(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let char_count = text.chars().count();
        if char_count > MAX_EMBED_CHARS {
            tracing::warn!(
                "埋め込み入力が長すぎます ({}文字)。最初の{}文字のみ使用します",
                char_count,
                MAX_EMBED_CHARS
            );
        }
        let input = truncate_input(text);
        let vector = self.client.embed(&input).await?;
        if vector.len() != EMBEDDING_DIM {
            // モデルが替わった兆候
            tracing::warn!(
                "埋め込み次元が想定と異なります ({} != {})。全記事の再埋め込みを検討してください",
                vector.len(),
                EMBEDDING_DIM
            );
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_deterministic() {
        let a = content_hash("緑茶はカテキンが豊富です。");
        let b = content_hash("緑茶はカテキンが豊富です。");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_content_hash_detects_change() {
        let before = content_hash("ルイボスティーはノンカフェイン。");
        let after = content_hash("ルイボスティーはノンカフェインです。");
        assert_ne!(before, after);
    }

    #[test]
    fn test_truncate_short_input_unchanged() {
        let text = "疲れている夜にはカモミールティー。";
        assert_eq!(truncate_input(text), text);
    }

    #[test]
    fn test_truncate_long_multibyte_input() {
        let text = "茶".repeat(MAX_EMBED_CHARS + 500);
        let truncated = truncate_input(&text);
        assert_eq!(truncated.chars().count(), MAX_EMBED_CHARS);
    }

    #[test]
    fn test_article_input_joins_title_and_content() {
        let input = EmbeddingGenerator::article_input("緑茶の効能", "本文です。");
        assert!(input.starts_with("緑茶の効能\n\n"));
    }
}
