//! ガイド付き診断の対話ポリシー。
//! 提案は1セッション3回まで。終了フレーズは3回の提案が済むまで受理しない。

/// 1セッションあたりの提案回数上限
pub const MAX_SUGGESTIONS: u32 = 3;

const END_PATTERNS: &[&str] = &[
    "もう大丈夫",
    "大丈夫です",
    "最後と言った",
    "終わり",
    "結構です",
    "ありがとう",
    "十分です",
    "これでいい",
    "ない",
    "大丈夫",
    "ありません",
    "特にない",
];

const FOLLOWUP_QUESTIONS: &[&str] = &[
    "カフェインは控えたいですか？それとも気分転換に少し欲しいですか？",
    "温かいお茶と冷たいお茶、今の気分はどちらですか？",
    "甘いものと一緒に楽しみたいですか？",
    "香りの強いお茶はお好きですか？",
    "普段よく飲むお茶はありますか？",
];

pub const CLOSING_MESSAGE: &str =
    "承知いたしました。またのご来店をお待ちしております。お疲れ様でした。";

pub const CONTINUE_MESSAGE: &str =
    "もう少し詳しくお聞かせください。最適なお茶をご提案させていただきますので。";

pub const ANYTHING_ELSE_MESSAGE: &str = "他にも気になることがありますか？";

pub fn is_end_phrase(text: &str) -> bool {
    END_PATTERNS.iter().any(|p| text.contains(p))
}

pub fn is_low_energy(text: &str) -> bool {
    ["しんど", "つら", "疲れ", "だる", "きつ", "元気ない", "やる気", "無理", "重い"]
        .iter()
        .any(|p| text.contains(p))
}

/// 重複質問チェック用の正規化（句読点・空白を除去して小文字化）
pub fn norm(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '。' | '、' | '！' | '？') && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// まだ聞いていないフォローアップ質問を選ぶ。
/// 片方がもう片方を含む程度の言い換えも重複とみなす。
pub fn next_followup(asked: &[String]) -> Option<String> {
    FOLLOWUP_QUESTIONS
        .iter()
        .find(|q| {
            let nq = norm(q);
            !asked.iter().any(|a| {
                let na = norm(a);
                na == nq || na.contains(&nq) || nq.contains(&na)
            })
        })
        .map(|q| q.to_string())
}

/// 提案の前に挟む共感の一言
pub fn preamble(user_text: &str) -> String {
    if is_low_energy(user_text) {
        "お疲れのようですね。まずはやさしい一杯をご提案させていただきます。".to_string()
    } else {
        format!(
            "{}とのことですね。最適な組み合わせをご提案させていただきます！",
            user_text
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_phrase_detection() {
        assert!(is_end_phrase("もう大丈夫です"));
        assert!(is_end_phrase("ありがとうございました"));
        assert!(!is_end_phrase("眠れないので助けてほしい"));
    }

    #[test]
    fn test_norm_strips_punctuation_and_whitespace() {
        assert_eq!(norm("カフェインは 控えたい。"), norm("カフェインは控えたい"));
    }

    #[test]
    fn test_next_followup_skips_asked_questions() {
        let first = next_followup(&[]).unwrap();
        let second = next_followup(&[first.clone()]).unwrap();
        assert_ne!(norm(&first), norm(&second));
    }

    #[test]
    fn test_next_followup_detects_paraphrase_containment() {
        let asked = vec!["カフェインは控えたいですか".to_string()];
        let next = next_followup(&asked).unwrap();
        assert!(!next.contains("カフェイン"));
    }

    #[test]
    fn test_next_followup_exhausted() {
        let asked: Vec<String> = super::FOLLOWUP_QUESTIONS
            .iter()
            .map(|q| q.to_string())
            .collect();
        assert!(next_followup(&asked).is_none());
    }

    #[test]
    fn test_preamble_low_energy_variant() {
        let text = preamble("最近しんどくて眠れません");
        assert!(text.contains("やさしい一杯"));
        let normal = preamble("集中したいです");
        assert!(normal.contains("集中したいです"));
    }
}
