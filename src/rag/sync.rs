use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::article_store::ArticleStore;
use super::embeddings::{content_hash, EmbeddingGenerator};
use super::run_log::{summarize_errors, RunLog};
use crate::models::ExecutionKind;
use crate::openai::ProviderError;

/// 恒久失敗とみなすまでの埋め込み試行回数
pub const MAX_EMBED_ATTEMPTS: i32 = 5;

/// 通常実行で対象にする更新鮮度ウィンドウ
pub const FRESHNESS_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub total_candidates: i32,
    pub success_count: i32,
    pub error_count: i32,
    pub failed_article_ids: Vec<Uuid>,
}

/// 記事の一括再埋め込みジョブ。同時に走る実行は一つだけ。
/// ドキュメント単位の失敗はバッチを止めず、実行ログに集計される。
pub struct SyncManager {
    store: Arc<ArticleStore>,
    embeddings: EmbeddingGenerator,
    run_log: RunLog,
    status: Mutex<SyncStatus>,
    cancel: AtomicBool,
}

impl SyncManager {
    pub fn new(store: Arc<ArticleStore>, embeddings: EmbeddingGenerator, run_log: RunLog) -> Self {
        Self {
            store,
            embeddings,
            run_log,
            status: Mutex::new(SyncStatus {
                is_syncing: false,
                last_synced_at: None,
                last_error: None,
            }),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn run_log(&self) -> &RunLog {
        &self.run_log
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.lock().await.clone()
    }

    /// 次のドキュメント境界で停止を要求する。実行中の埋め込み呼び出しは
    /// 中断しない。部分統計は通常どおり記録される。
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub async fn run(&self, kind: ExecutionKind, force: bool) -> Result<SyncReport> {
        {
            let mut status = self.status.lock().await;
            if status.is_syncing {
                anyhow::bail!("同期は既に実行中です");
            }
            status.is_syncing = true;
            status.last_error = None;
        }
        self.cancel.store(false, Ordering::SeqCst);

        // パニックしても is_syncing が必ず戻るよう catch_unwind で包む
        let result = std::panic::AssertUnwindSafe(self.do_sync(kind, force))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(report)) => {
                let mut status = self.status.lock().await;
                status.is_syncing = false;
                status.last_synced_at = Some(Utc::now());
                Ok(report)
            }
            Ok(Err(e)) => {
                let msg = format!("同期エラー: {}", e);
                tracing::error!("{}", msg);
                let mut status = self.status.lock().await;
                status.is_syncing = false;
                status.last_error = Some(msg.clone());
                Err(e)
            }
            Err(panic_info) => {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    format!("同期がパニックしました: {}", s)
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    format!("同期がパニックしました: {}", s)
                } else {
                    "同期が不明なパニックで停止しました".to_string()
                };
                tracing::error!("{}", msg);
                let mut status = self.status.lock().await;
                status.is_syncing = false;
                status.last_error = Some(msg.clone());
                Err(anyhow::anyhow!(msg))
            }
        };

        outcome
    }

    async fn do_sync(&self, kind: ExecutionKind, force: bool) -> Result<SyncReport> {
        // 前回クラッシュした実行が開きっぱなしなら失敗として閉じる
        self.run_log.close_dangling_runs().await?;

        let permanent = self
            .store
            .permanently_failed_articles(MAX_EMBED_ATTEMPTS)
            .await?;
        if !permanent.is_empty() {
            tracing::error!(
                "リトライ上限({}回)に達した記事が{}件あります。手動確認が必要です: {:?}",
                MAX_EMBED_ATTEMPTS,
                permanent.len(),
                permanent
            );
        }

        let candidates = self
            .store
            .articles_needing_embedding(FRESHNESS_WINDOW_HOURS, force, MAX_EMBED_ATTEMPTS)
            .await?;

        let total = candidates.len() as i32;
        let run_id = self.run_log.start_run(kind, total).await?;
        tracing::info!(
            "Embedding再生成ジョブ開始 ({}): 対象{}件",
            kind.as_str(),
            total
        );

        let mut success = 0i32;
        let mut errors = 0i32;
        let mut failed_ids: Vec<Uuid> = Vec::new();
        let mut first_error: Option<String> = None;

        for article in &candidates {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::warn!("同期のキャンセル要求を受理。残り{}件を中断します",
                    candidates.len() - (success + errors) as usize);
                break;
            }

            match self.embed_one(article.id, &article.title, &article.content).await {
                Ok(()) => {
                    tracing::info!("embedding更新: {}", article.title);
                    success += 1;
                }
                Err(e) => {
                    let msg = e.to_string();
                    tracing::warn!("embedding生成失敗 ({}): {}", article.title, msg);
                    if msg.contains("rate limited") {
                        tracing::warn!("レート制限エラー。次回実行時に再試行されます");
                    }
                    if let Err(db_err) = self.store.record_embed_failure(article.id).await {
                        tracing::error!("失敗回数の記録に失敗: {}", db_err);
                    }
                    if first_error.is_none() {
                        first_error = Some(msg);
                    }
                    failed_ids.push(article.id);
                    errors += 1;
                }
            }
        }

        let summary = summarize_errors(errors, first_error.as_deref());
        self.run_log
            .complete_run(run_id, success, errors, &failed_ids, summary.as_deref())
            .await?;

        tracing::info!(
            "Embedding再生成ジョブ完了: 成功{}件 / エラー{}件 / 対象{}件",
            success,
            errors,
            total
        );

        Ok(SyncReport {
            run_id,
            total_candidates: total,
            success_count: success,
            error_count: errors,
            failed_article_ids: failed_ids,
        })
    }

    async fn embed_one(&self, id: Uuid, title: &str, content: &str) -> Result<()> {
        let input = EmbeddingGenerator::article_input(title, content);
        let hash = content_hash(content);
        let vector = self
            .embeddings
            .generate(&input)
            .await
            .map_err(|e: ProviderError| anyhow::anyhow!(e))?;
        self.store.set_embedding(id, &vector, &hash).await?;
        Ok(())
    }
}
