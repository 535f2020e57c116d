use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::Suggestion;

/// 埋め込み経路が使えない時の提案戦略。
/// 条件文へのキーワード一致だけで静的な知識テーブルから提案を選ぶ。
pub trait RecommendationStrategy {
    fn recommend(&self, condition: &str, exclude_teas: &[String]) -> Suggestion;
}

struct Rule {
    pattern: &'static Lazy<Regex>,
    tea: &'static str,
    reason: &'static str,
    sweetener: &'static str,
    snack: &'static str,
    timing: &'static str,
    brewing: &'static str,
}

static SLEEP_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"眠|寝|快眠|就寝|夜更かし").unwrap());
static RELAX_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"リラックス|ストレス|疲れ|疲労|しんど|だる|一人の時間").unwrap());
static FOCUS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"集中|仕事|勉強|朝|シャキ").unwrap());
static WARM_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"冷え|寒|胃|お腹|風邪").unwrap());
static REFRESH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"気分転換|リフレッシュ|香り|華やか").unwrap());
static DETOX_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"デトックス|すっきり|むくみ").unwrap());
static MEAL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ダイエット|脂|食事|食後|ラーメン").unwrap());

static RULES: &[Rule] = &[
    Rule {
        pattern: &SLEEP_PATTERN,
        tea: "ハーブティー（カモミール）",
        reason: "鎮静効果があり、心を落ち着かせてくれます",
        sweetener: "蜂蜜（自然な甘さで心を癒やす）",
        snack: "フルーツや軽いヨーグルト",
        timing: "就寝前のリラックスタイム",
        brewing: "90度のお湯で5-7分蒸らす",
    },
    Rule {
        pattern: &RELAX_PATTERN,
        tea: "ルイボスティー",
        reason: "カフェインフリーでリラックス効果があり、胃に優しいです",
        sweetener: "蜂蜜（温かいうちに少量）",
        snack: "アーモンドやクルミなどのナッツ",
        timing: "夕方から夜にかけて",
        brewing: "95度のお湯で3-5分蒸らす",
    },
    Rule {
        pattern: &FOCUS_PATTERN,
        tea: "抹茶",
        reason: "集中力を高め、リラックス効果もあります",
        sweetener: "黒砂糖（抹茶の苦味と相性抜群）",
        snack: "和菓子、特に生菓子",
        timing: "朝の集中したい時間",
        brewing: "70度のお湯で茶筅でよくかき混ぜる",
    },
    Rule {
        pattern: &WARM_PATTERN,
        tea: "生姜茶",
        reason: "体を温め、胃腸の調子を整えてくれます",
        sweetener: "黒砂糖（生姜の辛味と相性抜群）",
        snack: "温かいお粥や軽いスープ",
        timing: "朝食時や体が冷えた時",
        brewing: "90度のお湯で3分蒸らす",
    },
    Rule {
        pattern: &REFRESH_PATTERN,
        tea: "ジャスミンティー",
        reason: "香りが高く、気分をリフレッシュしてくれます",
        sweetener: "砂糖（香りを邪魔しない程度）",
        snack: "和菓子や軽いクッキー",
        timing: "午後のリラックスタイム",
        brewing: "80度のお湯で2-3分蒸らす",
    },
    Rule {
        pattern: &DETOX_PATTERN,
        tea: "レモングラスブレンド",
        reason: "すっきりとした飲み口で、気分を整えてくれます",
        sweetener: "ステビア（軽やかな甘み）",
        snack: "ドライフルーツ",
        timing: "日中の水分補給に",
        brewing: "95度のお湯で3分蒸らす",
    },
    Rule {
        pattern: &MEAL_PATTERN,
        tea: "ウーロン茶",
        reason: "すっきり飲みやすく、食事との相性が良いです",
        sweetener: "そのままがおすすめ（甘味を足すなら黒糖を少量）",
        snack: "ナッツや軽いせんべい",
        timing: "食事中や食後",
        brewing: "95度のお湯で1-2分蒸らす",
    },
];

// どのキーワードにも当たらない時の一杯
static DEFAULT_RULE: Rule = Rule {
    pattern: &RELAX_PATTERN,
    tea: "ほうじ茶",
    reason: "香ばしくカフェインが少なめで、どんな場面でも飲みやすいです",
    sweetener: "はちみつ",
    snack: "和菓子",
    timing: "いつでも",
    brewing: "90度のお湯で30秒ほど蒸らす",
};

impl Rule {
    fn suggestion(&self) -> Suggestion {
        Suggestion {
            tea: self.tea.to_string(),
            reason: self.reason.to_string(),
            sweetener: self.sweetener.to_string(),
            snack: self.snack.to_string(),
            timing: self.timing.to_string(),
            brewing: self.brewing.to_string(),
        }
    }
}

pub struct RuleBasedSommelier;

impl RecommendationStrategy for RuleBasedSommelier {
    /// 必ず完全な提案を返す。キーワード一致を優先し、除外リスト
    /// （同一セッションで提案済みのお茶）に当たったら次の候補へ回す。
    fn recommend(&self, condition: &str, exclude_teas: &[String]) -> Suggestion {
        let excluded = |tea: &str| exclude_teas.iter().any(|t| t == tea);

        for rule in RULES {
            if rule.pattern.is_match(condition) && !excluded(rule.tea) {
                return rule.suggestion();
            }
        }

        if !excluded(DEFAULT_RULE.tea) && RULES.iter().all(|r| !r.pattern.is_match(condition)) {
            return DEFAULT_RULE.suggestion();
        }

        for rule in RULES.iter().chain(std::iter::once(&DEFAULT_RULE)) {
            if !excluded(rule.tea) {
                return rule.suggestion();
            }
        }

        // 全候補が除外済み。回転させて返すしかない
        let idx = exclude_teas.len() % RULES.len();
        RULES[idx].suggestion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_keyword_selects_chamomile() {
        let s = RuleBasedSommelier.recommend("最近眠れないので落ち着きたい", &[]);
        assert_eq!(s.tea, "ハーブティー（カモミール）");
        assert!(s.is_complete());
    }

    #[test]
    fn test_focus_keyword_selects_matcha() {
        let s = RuleBasedSommelier.recommend("仕事に集中したい朝", &[]);
        assert_eq!(s.tea, "抹茶");
    }

    #[test]
    fn test_unmatched_condition_falls_back_to_default() {
        let s = RuleBasedSommelier.recommend("とくに理由はない", &[]);
        assert_eq!(s.tea, "ほうじ茶");
        assert!(s.is_complete());
    }

    #[test]
    fn test_excluded_tea_rotates_to_next_candidate() {
        let exclude = vec!["ルイボスティー".to_string()];
        let s = RuleBasedSommelier.recommend("疲れているのでリラックスしたい", &exclude);
        assert_ne!(s.tea, "ルイボスティー");
        assert!(s.is_complete());
    }

    #[test]
    fn test_three_turns_yield_three_distinct_teas() {
        let condition = "疲れている 特にない 夜 特にこだわりなし 一人の時間 リラックス";
        let mut exclude: Vec<String> = Vec::new();
        for _ in 0..3 {
            let s = RuleBasedSommelier.recommend(condition, &exclude);
            assert!(s.is_complete());
            assert!(!exclude.contains(&s.tea));
            exclude.push(s.tea);
        }
        assert_eq!(exclude.len(), 3);
    }

    #[test]
    fn test_all_excluded_still_returns_complete_suggestion() {
        let exclude: Vec<String> = RULES
            .iter()
            .map(|r| r.tea.to_string())
            .chain(std::iter::once("ほうじ茶".to_string()))
            .collect();
        let s = RuleBasedSommelier.recommend("眠れない", &exclude);
        assert!(s.is_complete());
    }
}
