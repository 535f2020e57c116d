use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::embeddings::content_hash;
use crate::models::{Article, ArticleDraft, MatchedArticle};

/// 記事と埋め込みを保持するコンテンツストア。
/// 類似検索は全件走査のコサイン類似度（記事数は高々数千件の想定）。
/// ストア側にベクトル索引があれば search の実装だけ差し替えられる。
pub struct ArticleStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct EmbeddedRow {
    id: Uuid,
    title: String,
    content: String,
    embedding: Vec<f32>,
}

/// 再埋め込みが必要か。embeddingが無い、または本文ハッシュが変わった場合のみ真。
/// メタデータだけの更新では埋め込みを作り直さない。
pub fn needs_embedding(stored_hash: Option<&str>, has_embedding: bool, current_hash: &str) -> bool {
    if !has_embedding {
        return true;
    }
    match stored_hash {
        Some(h) => h != current_hash,
        None => true,
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// クエリベクトルに対して閾値超えのヒットを類似度降順で最大 top_k 件返す
fn rank_matches(
    query: &[f32],
    rows: Vec<(Uuid, String, String, Vec<f32>)>,
    threshold: f32,
    top_k: usize,
) -> Vec<MatchedArticle> {
    let mut scored: Vec<MatchedArticle> = rows
        .into_iter()
        .filter_map(|(id, title, content, embedding)| {
            let score = cosine_similarity(query, &embedding);
            if score > threshold {
                Some(MatchedArticle {
                    id,
                    title,
                    content,
                    similarity: Some(score),
                })
            } else {
                None
            }
        })
        .collect();
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(top_k);
    scored
}

impl ArticleStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tea_articles (
                id UUID PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT 'health',
                tags TEXT[] NOT NULL DEFAULT '{}',
                source TEXT NOT NULL DEFAULT '',
                file_path TEXT UNIQUE,
                hash TEXT,
                embedding REAL[],
                embed_attempts INT NOT NULL DEFAULT 0,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_tea_articles_updated_at
            ON tea_articles(updated_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// file_path を自然キーとして insert または update。
    /// 本文が変わった場合は embed_attempts をリセットする。
    pub async fn upsert_article(&self, draft: &ArticleDraft) -> Result<Uuid> {
        if draft.file_path.is_some() {
            let (id,): (Uuid,) = sqlx::query_as(
                r#"
                INSERT INTO tea_articles (id, title, content, category, tags, source, file_path, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, now())
                ON CONFLICT (file_path) DO UPDATE SET
                    title = EXCLUDED.title,
                    content = EXCLUDED.content,
                    category = EXCLUDED.category,
                    tags = EXCLUDED.tags,
                    source = EXCLUDED.source,
                    embed_attempts = CASE
                        WHEN tea_articles.content IS DISTINCT FROM EXCLUDED.content THEN 0
                        ELSE tea_articles.embed_attempts
                    END,
                    updated_at = now()
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&draft.title)
            .bind(&draft.content)
            .bind(&draft.category)
            .bind(&draft.tags)
            .bind(&draft.source)
            .bind(&draft.file_path)
            .fetch_one(&self.pool)
            .await?;
            return Ok(id);
        }

        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO tea_articles (id, title, content, category, tags, source, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&draft.title)
        .bind(&draft.content)
        .bind(&draft.category)
        .bind(&draft.tags)
        .bind(&draft.source)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_article_by_path(&self, file_path: &str) -> Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>(
            "SELECT * FROM tea_articles WHERE file_path = $1",
        )
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(article)
    }

    /// 再埋め込み候補: 鮮度ウィンドウ内に更新され、かつ
    /// embedding が無いか本文ハッシュが変わった記事。
    /// リトライ上限に達した記事は恒久失敗として除外する。
    pub async fn articles_needing_embedding(
        &self,
        window_hours: i64,
        force: bool,
        max_attempts: i32,
    ) -> Result<Vec<Article>> {
        let cutoff = Utc::now() - Duration::hours(window_hours);
        let rows = sqlx::query_as::<_, Article>(
            r#"
            SELECT * FROM tea_articles
            WHERE ($1 OR updated_at >= $2) AND embed_attempts < $3
            ORDER BY updated_at DESC
            "#,
        )
        .bind(force)
        .bind(cutoff)
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows
            .into_iter()
            .filter(|a| {
                needs_embedding(
                    a.hash.as_deref(),
                    a.embedding.is_some(),
                    &content_hash(&a.content),
                )
            })
            .collect();
        Ok(candidates)
    }

    /// リトライ上限に達して恒久失敗扱いになった記事
    pub async fn permanently_failed_articles(&self, max_attempts: i32) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM tea_articles WHERE embed_attempts >= $1",
        )
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// embedding・hash・updated_at を単一文で更新する。
    /// 読み手が embedding と hash の不整合な組を観測しないための契約。
    pub async fn set_embedding(&self, id: Uuid, embedding: &[f32], hash: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tea_articles
            SET embedding = $2, hash = $3, embed_attempts = 0, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(embedding)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_embed_failure(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE tea_articles SET embed_attempts = embed_attempts + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// 全件走査のコサイン類似検索
    pub async fn search(
        &self,
        query: &[f32],
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<MatchedArticle>> {
        let rows = sqlx::query_as::<_, EmbeddedRow>(
            "SELECT id, title, content, embedding FROM tea_articles WHERE embedding IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let rows = rows
            .into_iter()
            .map(|r| (r.id, r.title, r.content, r.embedding))
            .collect();
        Ok(rank_matches(query, rows, threshold, top_k))
    }

    /// 検索経路が落ちた時の非ランクフォールバック（最新N件）
    pub async fn recent_articles(&self, limit: i64) -> Result<Vec<MatchedArticle>> {
        let rows: Vec<(Uuid, String, String)> = sqlx::query_as(
            "SELECT id, title, content FROM tea_articles ORDER BY updated_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, title, content)| MatchedArticle {
                id,
                title,
                content,
                similarity: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: u128, embedding: Vec<f32>) -> (Uuid, String, String, Vec<f32>) {
        (
            Uuid::from_u128(id),
            format!("記事{}", id),
            "本文".to_string(),
            embedding,
        )
    }

    #[test]
    fn test_cosine_similarity_identical_vectors() {
        let v = vec![0.3, 0.5, 0.2];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_magnitude_insensitive() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![10.0, 20.0, 30.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_similarity_mismatched_length() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_rank_matches_orders_by_similarity_desc() {
        let query = vec![1.0, 0.0];
        let rows = vec![
            row(1, vec![0.6, 0.8]),
            row(2, vec![1.0, 0.0]),
            row(3, vec![0.9, 0.43589]),
        ];
        let hits = rank_matches(&query, rows, 0.4, 5);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, Uuid::from_u128(2));
        let scores: Vec<f32> = hits.iter().map(|h| h.similarity.unwrap()).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_rank_matches_respects_top_k() {
        let query = vec![1.0, 0.0];
        let rows = (0..10).map(|i| row(i, vec![1.0, 0.01 * i as f32])).collect();
        let hits = rank_matches(&query, rows, 0.5, 3);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_threshold_monotonicity() {
        // 閾値を下げても、高い閾値で見つかった記事が消えないこと
        let query = vec![1.0, 0.0, 0.0];
        let rows: Vec<_> = vec![
            row(1, vec![1.0, 0.1, 0.0]),
            row(2, vec![0.7, 0.7, 0.1]),
            row(3, vec![0.2, 0.9, 0.4]),
            row(4, vec![0.0, 1.0, 1.0]),
        ];
        let strict = rank_matches(&query, rows.clone(), 0.75, 10);
        let loose = rank_matches(&query, rows, 0.4, 10);
        let loose_ids: Vec<Uuid> = loose.iter().map(|h| h.id).collect();
        for hit in &strict {
            assert!(loose_ids.contains(&hit.id));
        }
        assert!(loose.len() >= strict.len());
    }

    #[test]
    fn test_needs_embedding_missing_vector() {
        assert!(needs_embedding(Some("abc"), false, "abc"));
        assert!(needs_embedding(None, false, "abc"));
    }

    #[test]
    fn test_needs_embedding_hash_match_skips() {
        let h = content_hash("変わらない本文");
        assert!(!needs_embedding(Some(&h), true, &h));
    }

    #[test]
    fn test_needs_embedding_hash_drift() {
        let old = content_hash("旧本文");
        let new = content_hash("新本文");
        assert!(needs_embedding(Some(&old), true, &new));
    }
}
