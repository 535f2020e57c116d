use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// 保存済み記事。content がハッシュ・embedding の対象単位。
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Article {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub source: String,
    pub file_path: Option<String>,
    pub hash: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub embed_attempts: i32,
    pub updated_at: DateTime<Utc>,
}

/// 取り込み時の記事データ（id は upsert 側で解決）
#[derive(Debug, Clone)]
pub struct ArticleDraft {
    pub title: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub source: String,
    pub file_path: Option<String>,
}

/// 類似検索のヒット。similarity が None の場合はフォールバック（非ランク）取得。
#[derive(Debug, Clone)]
pub struct MatchedArticle {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub similarity: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub id: Uuid,
    pub title: String,
    pub excerpt: String,
}

impl MatchedArticle {
    pub fn summary(&self) -> ArticleSummary {
        let excerpt: String = self.content.chars().take(100).collect();
        ArticleSummary {
            id: self.id,
            title: self.title.clone(),
            excerpt: format!("{}...", excerpt),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    Manual,
    Scheduled,
}

impl ExecutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        }
    }
}

/// Embedding再生成ジョブの実行ログ（追記専用）
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingRun {
    pub id: Uuid,
    pub execution_kind: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_candidates: i32,
    pub success_count: i32,
    pub error_count: i32,
    pub failed_article_ids: Vec<Uuid>,
    pub error_summary: Option<String>,
}

/// 構造化された一杯の提案。全フィールド非空が契約。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub tea: String,
    pub reason: String,
    pub sweetener: String,
    pub snack: String,
    pub timing: String,
    pub brewing: String,
}

impl Suggestion {
    pub fn is_complete(&self) -> bool {
        !self.tea.trim().is_empty()
            && !self.reason.trim().is_empty()
            && !self.sweetener.trim().is_empty()
            && !self.snack.trim().is_empty()
            && !self.timing.trim().is_empty()
            && !self.brewing.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosisPhase {
    Collecting,
    Suggesting,
    Confirming,
}

impl Default for DiagnosisPhase {
    fn default() -> Self {
        Self::Collecting
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub text: String,
}

/// クライアント側が持ち回す対話状態
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnState {
    #[serde(default)]
    pub suggestion_count: u32,
    #[serde(default)]
    pub suggested_teas: Vec<String>,
    #[serde(default)]
    pub asked_followups: Vec<String>,
    #[serde(default)]
    pub phase: DiagnosisPhase,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnoseRequest {
    pub text: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    #[serde(default)]
    pub turn_state: TurnState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnoseResponse {
    pub assistant_messages: Vec<String>,
    pub suggestion: Option<Suggestion>,
    pub followup_question: Option<String>,
    pub phase: DiagnosisPhase,
    pub end: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuickDiagnosisRequest {
    pub answers: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickDiagnosisResponse {
    pub ai_recommendation: String,
    pub condition: String,
    pub matches: usize,
    pub articles: Vec<ArticleSummary>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnRequest {
    #[serde(default)]
    pub force_update: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnResponse {
    pub message: String,
    pub processed_count: i32,
    pub success_count: i32,
    pub error_count: i32,
    pub failed_article_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusResponse {
    pub is_syncing: bool,
    pub recent_runs: Vec<EmbeddingRun>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggestion_completeness() {
        let s = Suggestion {
            tea: "ほうじ茶".to_string(),
            reason: "香ばしくて飲みやすい".to_string(),
            sweetener: "はちみつ".to_string(),
            snack: "和菓子".to_string(),
            timing: "食後".to_string(),
            brewing: "90度のお湯で1分".to_string(),
        };
        assert!(s.is_complete());

        let mut partial = s.clone();
        partial.snack = "  ".to_string();
        assert!(!partial.is_complete());
    }

    #[test]
    fn test_matched_article_excerpt_is_char_safe() {
        let m = MatchedArticle {
            id: Uuid::new_v4(),
            title: "緑茶の効能".to_string(),
            content: "緑茶".repeat(200),
            similarity: Some(0.8),
        };
        let summary = m.summary();
        assert!(summary.excerpt.ends_with("..."));
        assert_eq!(summary.excerpt.chars().count(), 103);
    }

    #[test]
    fn test_turn_state_defaults() {
        let st: TurnState = serde_json::from_str("{}").unwrap();
        assert_eq!(st.suggestion_count, 0);
        assert!(st.suggested_teas.is_empty());
        assert_eq!(st.phase, DiagnosisPhase::Collecting);
    }
}
