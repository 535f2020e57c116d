use serde_yml::Value;

/// 記事ファイル先頭のYAMLフロントマター
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontMatter {
    pub title: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

/// `---` 区切りのフロントマターと本文に分割する。
/// フロントマターが無い・壊れている場合は全体を本文として扱う。
pub fn parse_article(raw: &str) -> (FrontMatter, String) {
    let Some(rest) = raw.strip_prefix("---") else {
        return (FrontMatter::default(), raw.to_string());
    };

    let Some(end) = rest.find("\n---") else {
        return (FrontMatter::default(), raw.to_string());
    };

    let yaml_block = &rest[..end];
    let body_start = end + "\n---".len();
    let body = rest[body_start..]
        .trim_start_matches(['\r', '\n'])
        .to_string();

    let front_matter = match serde_yml::from_str::<Value>(yaml_block) {
        Ok(value) => extract(&value),
        Err(e) => {
            tracing::warn!("フロントマターのパースに失敗: {}", e);
            FrontMatter::default()
        }
    };

    (front_matter, body)
}

fn extract(value: &Value) -> FrontMatter {
    let title = value
        .get("title")
        .and_then(Value::as_str)
        .map(str::to_string);
    let category = value
        .get("category")
        .and_then(Value::as_str)
        .map(str::to_string);
    let tags = value.get("tags").map(extract_tags).unwrap_or_default();
    FrontMatter { title, category, tags }
}

// tags は配列でもカンマ区切り文字列でも受ける（元データが揺れている）
fn extract_tags(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(seq) => seq
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_article_with_front_matter() {
        let raw = "---\ntitle: 緑茶と集中力\ncategory: health\ntags:\n  - 緑茶\n  - 集中\n---\n本文です。";
        let (fm, body) = parse_article(raw);
        assert_eq!(fm.title.as_deref(), Some("緑茶と集中力"));
        assert_eq!(fm.category.as_deref(), Some("health"));
        assert_eq!(fm.tags, vec!["緑茶", "集中"]);
        assert_eq!(body, "本文です。");
    }

    #[test]
    fn test_parse_article_comma_separated_tags() {
        let raw = "---\ntitle: ルイボス特集\ntags: ルイボス, ノンカフェイン\n---\n本文";
        let (fm, _) = parse_article(raw);
        assert_eq!(fm.tags, vec!["ルイボス", "ノンカフェイン"]);
    }

    #[test]
    fn test_parse_article_without_front_matter() {
        let raw = "フロントマターのない本文。";
        let (fm, body) = parse_article(raw);
        assert_eq!(fm, FrontMatter::default());
        assert_eq!(body, raw);
    }

    #[test]
    fn test_parse_article_unclosed_front_matter() {
        let raw = "---\ntitle: 壊れた記事";
        let (fm, body) = parse_article(raw);
        assert!(fm.title.is_none());
        assert_eq!(body, raw);
    }
}
