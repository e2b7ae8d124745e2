//! Special Cases
//!
//! Keyword overrides that bypass knowledge-base scoring. Some intents
//! (greetings, thanks, farewells, distress) must never lose to noisy
//! similarity math, so they are answered from a fixed table.

use serde::{Deserialize, Serialize};

/// One keyword-triggered canned reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialCase {
    pub keywords: Vec<String>,
    pub response: String,
    pub score: f64,
    /// Label reported as the result source
    pub source: String,
}

impl SpecialCase {
    fn new(keywords: &[&str], response: &str, score: f64, source: &str) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            response: response.to_string(),
            score,
            source: source.to_string(),
        }
    }

    /// True if the normalized input mentions any keyword
    pub fn matches(&self, normalized: &str) -> bool {
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && normalized.contains(k.as_str()))
    }
}

/// Ordered override table; the first matching case wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialCases {
    cases: Vec<SpecialCase>,
}

impl SpecialCases {
    pub fn new(cases: Vec<SpecialCase>) -> Self {
        Self { cases }
    }

    /// Table with no overrides
    pub fn empty() -> Self {
        Self { cases: Vec::new() }
    }

    pub fn find(&self, normalized: &str) -> Option<&SpecialCase> {
        self.cases.iter().find(|c| c.matches(normalized))
    }

    pub fn cases(&self) -> &[SpecialCase] {
        &self.cases
    }
}

impl Default for SpecialCases {
    fn default() -> Self {
        Self::new(vec![
            SpecialCase::new(
                &["交租", "房租", "租金", "沒錢", "缺錢", "窮"],
                "我明白您的經濟壓力。建議您可以：1. 尋找兼職工作 2. 申請政府援助 3. 與房東協商 4. 尋求家人朋友幫助",
                0.95,
                "經濟建議",
            ),
            SpecialCase::new(
                &["😭", "哭", "淚", "傷心", "難過", "心情不好"],
                "我感受到您的心情。每個人都會有低落的時候，重要的是給自己時間和空間。您願意和我聊聊具體的情況嗎？",
                0.9,
                "情感支持",
            ),
            SpecialCase::new(
                &["你好", "您好", "hi", "hello", "嗨"],
                "您好！我是 Doubao AI，很高興為您服務。有什麼我可以幫助您的嗎？",
                0.95,
                "問候",
            ),
            SpecialCase::new(
                &["謝謝", "感謝", "多謝"],
                "不用客氣！能幫助您是我的榮幸。如果有其他需要，隨時告訴我。",
                0.9,
                "感謝回應",
            ),
            SpecialCase::new(
                &["bye", "再見", "拜拜", "88"],
                "再見！期待下次與您聊天。祝您有美好的一天！",
                0.9,
                "告別",
            ),
        ])
    }
}
