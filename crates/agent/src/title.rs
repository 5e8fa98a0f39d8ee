//! One-shot session title generation.

use maestro_domain::tool::Message;
use maestro_providers::{ChatRequest, LlmProvider};

/// Title used whenever generation fails or produces nothing usable.
pub const DEFAULT_TITLE: &str = "新对话";

/// Quotation marks stripped from model output, covering the locales the
/// models habitually quote titles in.
const QUOTE_CHARS: &[char] = &['"', '\'', '“', '”', '‘', '’', '「', '」', '『', '』', '《', '》'];

/// Strip surrounding quotation marks and whitespace.
pub(crate) fn clean_title(raw: &str) -> String {
    raw.trim().trim_matches(|c| QUOTE_CHARS.contains(&c)).trim().to_string()
}

/// Ask the model for a short session title. Any failure yields
/// [`DEFAULT_TITLE`]; this call never propagates an error.
pub async fn generate_title(provider: &dyn LlmProvider, utterance: &str) -> String {
    let prompt = format!(
        "Generate a title of 5 to 10 characters for the following message. \
         Reply with the title only: no punctuation, no quotation marks, no \
         explanation.\n\nMessage: {utterance}"
    );

    let req = ChatRequest {
        messages: vec![Message::user(prompt)],
        tools: Vec::new(),
        temperature: Some(0.3),
        max_tokens: Some(50),
        model: None,
    };

    match provider.chat(&req).await {
        Ok(resp) => {
            let title = clean_title(&resp.content);
            if title.is_empty() {
                DEFAULT_TITLE.to_string()
            } else {
                title
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "title generation failed");
            DEFAULT_TITLE.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ascii_and_cjk_quotes() {
        assert_eq!(clean_title("\"天气查询\""), "天气查询");
        assert_eq!(clean_title("「旅行计划」"), "旅行计划");
        assert_eq!(clean_title("『读书笔记』"), "读书笔记");
        assert_eq!(clean_title("  'Trip plan'  "), "Trip plan");
        assert_eq!(clean_title("“嵌套 ‘引号’ 外层”"), "嵌套 ‘引号’ 外层");
    }

    #[test]
    fn plain_titles_pass_through() {
        assert_eq!(clean_title("Weather chat"), "Weather chat");
    }

    #[test]
    fn all_quotes_collapse_to_empty() {
        assert_eq!(clean_title("\"\""), "");
    }
}
