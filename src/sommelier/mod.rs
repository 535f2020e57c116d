pub mod rules;

use std::collections::HashMap;
use std::sync::Arc;

use self::rules::{RecommendationStrategy, RuleBasedSommelier};
use crate::models::{MatchedArticle, Suggestion};
use crate::openai::{ChatMessage, OpenAiClient};

const SOMMELIER_SYSTEM: &str =
    "あなたは茶ソムリエです。ユーザーの体調や気分に合わせて最適なお茶・甘味料・お茶菓子を提案してください。";

/// 参考記事として引用する本文の文字数
const EXCERPT_CHARS: usize = 200;

/// 検索結果（あれば）と診断文から提案を組み立てるコンポーザ。
/// 生成呼び出しが使えない・壊れている場合は必ずルールベースの
/// 完全な提案に置き換える。ユーザーに生のエラーは見せない。
pub struct Sommelier {
    client: Arc<OpenAiClient>,
    fallback: RuleBasedSommelier,
}

/// 生成結果の構造化パース。コードフェンスを剥がし、
/// 全フィールド非空の場合のみ採用する。
pub fn parse_suggestion(raw: &str) -> Option<Suggestion> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();

    match serde_json::from_str::<Suggestion>(body) {
        Ok(s) if s.is_complete() => Some(s),
        Ok(_) => None,
        Err(_) => None,
    }
}

/// 回答マップを安定順で連結する（生成が使えない時の診断文）
pub fn join_answers(answers: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = answers.keys().collect();
    keys.sort();
    keys.iter()
        .map(|k| answers[*k].as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 提案をクイック診断の表示形式に展開する
pub fn render_suggestion(s: &Suggestion) -> String {
    format!(
        "【お茶】{}\n{}\n\n【甘味料】{}\n\n【お茶菓子】{}\n\n【飲み方】{}\n\n【おすすめタイミング】{}",
        s.tea, s.reason, s.sweetener, s.snack, s.brewing, s.timing
    )
}

fn context_block(matches: &[MatchedArticle]) -> String {
    if matches.is_empty() {
        return "（関連記事が見つかりませんでした）".to_string();
    }
    matches
        .iter()
        .map(|m| {
            let excerpt: String = m.content.chars().take(EXCERPT_CHARS).collect();
            format!("- {}: {}...", m.title, excerpt)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl Sommelier {
    pub fn new(client: Arc<OpenAiClient>) -> Self {
        Self {
            client,
            fallback: RuleBasedSommelier,
        }
    }

    /// 質問キーごとの回答から自然文の診断文を合成する。
    /// 生成が失敗したら回答の連結で代用する（近似で構わない変換）。
    pub async fn synthesize_condition(&self, answers: &HashMap<String, String>) -> String {
        let raw = join_answers(answers);
        if !self.client.is_configured() {
            return raw;
        }

        let answers_json = serde_json::to_string_pretty(answers).unwrap_or_else(|_| raw.clone());
        let prompt = format!(
            "以下のユーザーの質問と回答から、自然な日本語で診断文を生成してください。\n\n\
             質問と回答:\n{}\n\n\
             診断文の例:\n\
             - 「あなたは疲労気味で、目の疲れも感じており、リラックスしたい気分です」\n\
             - 「疲れている状態で、胃の調子を気にされており、集中力を高めたいと考えています」\n\n\
             診断文は、ユーザーの状態や希望を自然な文章で表現してください。簡潔で具体的な表現にしてください。",
            answers_json
        );

        let messages = [
            ChatMessage::system(
                "あなたは茶ソムリエです。ユーザーの質問と回答から、自然な日本語で診断文を生成してください。",
            ),
            ChatMessage::user(prompt),
        ];

        match self.client.chat_completion(&messages, 0.3, None).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => raw,
            Err(e) => {
                tracing::warn!("診断文の合成に失敗。回答の連結で代用します: {}", e);
                raw
            }
        }
    }

    /// 取得済み記事に根拠づけた自由文の提案。
    /// 生成が失敗してもルールベースの提案文を返し、エラーにはしない。
    pub async fn recommend(&self, condition: &str, matches: &[MatchedArticle]) -> String {
        if !self.client.is_configured() {
            return render_suggestion(&self.fallback.recommend(condition, &[]));
        }

        let prompt = format!(
            "あなたは茶ソムリエです。以下のユーザーの診断文と参考記事を基に、最適なお茶を自然な文章で提案してください。\n\n\
             ユーザーの診断文:\n{}\n\n\
             参考記事:\n{}\n\n\
             以下の点を含めて自然な文章で回答してください：\n\
             - おすすめのお茶の種類とブレンド\n\
             - 甘味料の提案\n\
             - お茶菓子の提案\n\
             - なぜこの組み合わせが良いかの理由\n\n\
             回答は日本語で、実用的で具体的な提案を自然な文章形式で行ってください。",
            condition,
            context_block(matches)
        );

        let messages = [ChatMessage::system(SOMMELIER_SYSTEM), ChatMessage::user(prompt)];

        match self.client.chat_completion(&messages, 0.7, None).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("提案の生成に失敗。ルールベースに切り替えます: {}", e);
                render_suggestion(&self.fallback.recommend(condition, &[]))
            }
        }
    }

    /// ガイド付き診断向けの厳密な構造化提案。
    /// 生成結果が壊れていたら完全なフォールバック提案で置き換える。
    /// 欠けたフィールドやnullを返すことはない。
    pub async fn suggest(
        &self,
        condition: &str,
        matches: &[MatchedArticle],
        exclude_teas: &[String],
    ) -> Suggestion {
        if !self.client.is_configured() {
            return self.fallback.recommend(condition, exclude_teas);
        }

        let exclude_note = if exclude_teas.is_empty() {
            String::new()
        } else {
            format!(
                "\n既に提案済みのお茶は避けてください: {}",
                exclude_teas.join("、")
            )
        };

        let prompt = format!(
            "あなたは茶ソムリエです。以下のユーザーの診断文と参考記事を基に、一杯の提案をJSONで返してください。\n\n\
             ユーザーの診断文:\n{}\n\n\
             参考記事:\n{}\n{}\n\
             回答形式（JSONオブジェクトのみ、全フィールド必須・非空）:\n\
             {{\n\
               \"tea\": \"おすすめのお茶の種類\",\n\
               \"reason\": \"なぜこのお茶が良いかの理由\",\n\
               \"sweetener\": \"おすすめの甘味料\",\n\
               \"snack\": \"おすすめのお茶菓子\",\n\
               \"timing\": \"おすすめの飲むタイミング\",\n\
               \"brewing\": \"淹れ方\"\n\
             }}",
            condition,
            context_block(matches),
            exclude_note
        );

        let messages = [ChatMessage::system(SOMMELIER_SYSTEM), ChatMessage::user(prompt)];

        let raw = match self.client.chat_completion(&messages, 0.7, None).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("構造化提案の生成に失敗: {}", e);
                return self.fallback.recommend(condition, exclude_teas);
            }
        };

        match parse_suggestion(&raw) {
            Some(s) if !exclude_teas.contains(&s.tea) => s,
            Some(s) => {
                tracing::warn!("提案済みのお茶が重複しました ({})。別候補に差し替えます", s.tea);
                self.fallback.recommend(condition, exclude_teas)
            }
            None => {
                tracing::warn!("構造化提案のパースに失敗。生レスポンス: {}", raw);
                self.fallback.recommend(condition, exclude_teas)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn valid_json() -> &'static str {
        r#"{"tea":"ルイボスティー","reason":"胃に優しい","sweetener":"蜂蜜","snack":"ナッツ","timing":"夜","brewing":"95度で3分"}"#
    }

    #[test]
    fn test_parse_suggestion_plain_json() {
        let s = parse_suggestion(valid_json()).unwrap();
        assert_eq!(s.tea, "ルイボスティー");
    }

    #[test]
    fn test_parse_suggestion_fenced_json() {
        let fenced = format!("```json\n{}\n```", valid_json());
        assert!(parse_suggestion(&fenced).is_some());
    }

    #[test]
    fn test_parse_suggestion_rejects_missing_field() {
        let partial = r#"{"tea":"緑茶","reason":"おいしい"}"#;
        assert!(parse_suggestion(partial).is_none());
    }

    #[test]
    fn test_parse_suggestion_rejects_empty_field() {
        let empty = r#"{"tea":"緑茶","reason":"","sweetener":"蜂蜜","snack":"和菓子","timing":"朝","brewing":"80度"}"#;
        assert!(parse_suggestion(empty).is_none());
    }

    #[test]
    fn test_parse_suggestion_rejects_garbage() {
        assert!(parse_suggestion("すみません、JSONでは返せません。").is_none());
    }

    #[test]
    fn test_join_answers_is_stable_and_nonempty() {
        let mut answers = HashMap::new();
        answers.insert("mood".to_string(), "疲れている".to_string());
        answers.insert("health".to_string(), "特にない".to_string());
        answers.insert("time".to_string(), "夜".to_string());
        answers.insert("preference".to_string(), "特にこだわりなし".to_string());
        answers.insert("situation".to_string(), "一人の時間".to_string());
        answers.insert("goal".to_string(), "リラックス".to_string());

        let a = join_answers(&answers);
        let b = join_answers(&answers);
        assert_eq!(a, b);
        assert!(!a.trim().is_empty());
        assert!(a.contains("疲れている"));
        assert!(a.contains("リラックス"));
    }

    #[test]
    fn test_render_suggestion_includes_all_fields() {
        let s = parse_suggestion(valid_json()).unwrap();
        let text = render_suggestion(&s);
        assert!(text.contains("【お茶】ルイボスティー"));
        assert!(text.contains("【甘味料】蜂蜜"));
        assert!(text.contains("【お茶菓子】ナッツ"));
        assert!(text.contains("【飲み方】95度で3分"));
        assert!(text.contains("【おすすめタイミング】夜"));
    }

    #[test]
    fn test_context_block_empty_matches() {
        assert_eq!(context_block(&[]), "（関連記事が見つかりませんでした）");
    }

    #[test]
    fn test_context_block_truncates_excerpt() {
        let matches = vec![MatchedArticle {
            id: Uuid::new_v4(),
            title: "プーアル茶と食後".to_string(),
            content: "脂".repeat(500),
            similarity: Some(0.7),
        }];
        let block = context_block(&matches);
        assert!(block.starts_with("- プーアル茶と食後: "));
        assert!(block.chars().count() < 250);
    }
}
