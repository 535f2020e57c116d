pub mod article_store;
pub mod embeddings;
pub mod run_log;
pub mod sync;

use std::sync::Arc;

use anyhow::Result;

use self::article_store::ArticleStore;
use self::embeddings::EmbeddingGenerator;
use crate::models::MatchedArticle;

/// 類似度の足切り閾値。厳しい方から順に試し、最初にヒットした段で打ち切る。
pub const THRESHOLD_LADDER: [f32; 4] = [0.75, 0.6, 0.5, 0.4];

pub const SEARCH_TOP_K: usize = 5;

/// 検索経路が落ちた時に返す最新記事の件数
const FALLBACK_RECENT_LIMIT: i64 = 3;

pub struct RagEngine {
    embeddings: EmbeddingGenerator,
    store: Arc<ArticleStore>,
}

impl RagEngine {
    pub fn new(embeddings: EmbeddingGenerator, store: Arc<ArticleStore>) -> Self {
        Self { embeddings, store }
    }

    /// 診断文を埋め込み、閾値ラダーで類似記事を検索する。
    /// 検索自体が失敗した場合は最新記事の非ランクサンプルに退避し、
    /// リクエスト全体は落とさない。全段ヒットなしなら空を返す。
    pub async fn retrieve(&self, condition: &str) -> Result<Vec<MatchedArticle>> {
        let query = match self.embeddings.generate(condition).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("クエリ埋め込みに失敗。最新記事フォールバックを使用: {}", e);
                return self.store.recent_articles(FALLBACK_RECENT_LIMIT).await;
            }
        };

        for threshold in THRESHOLD_LADDER {
            match self.store.search(&query, threshold, SEARCH_TOP_K).await {
                Ok(hits) if !hits.is_empty() => {
                    tracing::info!(
                        "類似検索ヒット: {}件 (threshold={})",
                        hits.len(),
                        threshold
                    );
                    return Ok(hits);
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!("類似検索エラー。最新記事フォールバックを使用: {}", e);
                    return self.store.recent_articles(FALLBACK_RECENT_LIMIT).await;
                }
            }
        }

        tracing::info!("全閾値でヒットなし: {}", condition);
        Ok(Vec::new())
    }
}
