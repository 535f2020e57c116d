use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{EmbeddingRun, ExecutionKind};

/// error_summary に載せる先頭エラーメッセージの上限
const ERROR_SUMMARY_LIMIT: usize = 100;

/// Embedding再生成ジョブの実行ログ。追記専用で、完了時に
/// 件数と失敗IDを記録する。削除はしない（運用者向けの観測用）。
pub struct RunLog {
    pool: PgPool,
}

pub fn summarize_errors(error_count: i32, first_error: Option<&str>) -> Option<String> {
    if error_count == 0 {
        return None;
    }
    let head: String = first_error
        .unwrap_or("不明なエラー")
        .chars()
        .take(ERROR_SUMMARY_LIMIT)
        .collect();
    Some(format!(
        "{}件の記事でエラーが発生しました。主なエラー: {}",
        error_count, head
    ))
}

impl RunLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embedding_runs (
                id UUID PRIMARY KEY,
                execution_kind TEXT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ,
                total_candidates INT NOT NULL DEFAULT 0,
                success_count INT NOT NULL DEFAULT 0,
                error_count INT NOT NULL DEFAULT 0,
                failed_article_ids UUID[] NOT NULL DEFAULT '{}',
                error_summary TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_embedding_runs_started_at
            ON embedding_runs(started_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 実行開始時に completed_at = NULL の行を作る
    pub async fn start_run(&self, kind: ExecutionKind, total_candidates: i32) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO embedding_runs (id, execution_kind, started_at, total_candidates)
            VALUES ($1, $2, now(), $3)
            "#,
        )
        .bind(id)
        .bind(kind.as_str())
        .bind(total_candidates)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// 所有する実行だけが完了時の確定値を書き込む
    pub async fn complete_run(
        &self,
        id: Uuid,
        success_count: i32,
        error_count: i32,
        failed_article_ids: &[Uuid],
        error_summary: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE embedding_runs
            SET completed_at = now(),
                success_count = $2,
                error_count = $3,
                failed_article_ids = $4,
                error_summary = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(success_count)
        .bind(error_count)
        .bind(failed_article_ids)
        .bind(error_summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// クラッシュ等で completed_at が残っていない実行を失敗として閉じる。
    /// 次の実行の開始時に呼ぶ。
    pub async fn close_dangling_runs(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE embedding_runs
            SET completed_at = now(),
                error_summary = '未完了のまま中断された実行を検出したため失敗として記録'
            WHERE completed_at IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;
        let closed = result.rows_affected();
        if closed > 0 {
            tracing::warn!("未完了の実行ログを{}件クローズしました", closed);
        }
        Ok(closed)
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<EmbeddingRun>> {
        let runs = sqlx::query_as::<_, EmbeddingRun>(
            "SELECT * FROM embedding_runs ORDER BY started_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    /// 直近の完了済み実行の完了時刻（24時間スキップ判定用）
    pub async fn last_completed_at(&self) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            SELECT completed_at FROM embedding_runs
            WHERE completed_at IS NOT NULL
            ORDER BY completed_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(t,)| t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_errors_none_without_errors() {
        assert_eq!(summarize_errors(0, Some("rate_limit")), None);
    }

    #[test]
    fn test_summarize_errors_truncates_first_message() {
        let long = "エラー".repeat(100);
        let summary = summarize_errors(3, Some(&long)).unwrap();
        assert!(summary.starts_with("3件の記事でエラーが発生しました"));
        assert!(summary.chars().count() < 140);
    }

    #[test]
    fn test_summarize_errors_without_message() {
        let summary = summarize_errors(1, None).unwrap();
        assert!(summary.contains("不明なエラー"));
    }
}
