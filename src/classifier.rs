//! Keyword matching for idle users
//!
//! Picks the initial top-level state from free text. No NLU: a message
//! selects a state when one of its words is a keyword for it.

use crate::runtime::TopLevelState;

/// Lowercase words of a sentence with punctuation removed (apostrophes kept)
pub fn tokenize(sentence: &str) -> Vec<String> {
    sentence
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '\'')
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|word| !word.is_empty())
        .collect()
}

/// Whether any word of `text` matches one of `keywords`.
///
/// Contraction keywords such as `n't` also match words ending in them.
pub fn matches_any(text: &str, keywords: &[&str]) -> bool {
    tokenize(text).iter().any(|token| {
        keywords
            .iter()
            .any(|kw| token == kw || (kw.contains('\'') && token.ends_with(kw)))
    })
}

/// Ordered keyword table; the first state with a matching word wins
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<(TopLevelState, Vec<String>)>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        let table: [(TopLevelState, &[&str]); 6] = [
            (
                TopLevelState::ManageCampaign,
                &["campaign", "admin"],
            ),
            (
                TopLevelState::ClaimCoupon,
                &["code", "claim", "coupon"],
            ),
            (
                TopLevelState::InviteFriend,
                &["invite", "share", "friend", "friends"],
            ),
            (
                TopLevelState::Recommend,
                &[
                    "recommendation",
                    "recommendations",
                    "recommend",
                    "menu",
                    "suggestion",
                    "suggest",
                ],
            ),
            (
                TopLevelState::InitialInput,
                &["setting", "settings", "personal"],
            ),
            (TopLevelState::Feedback, &["feedback", "report", "digest"]),
        ];
        Self {
            rules: table
                .into_iter()
                .map(|(state, words)| (state, words.iter().map(|w| (*w).to_string()).collect()))
                .collect(),
        }
    }
}

impl KeywordClassifier {
    /// Classifier with no rules; every message stays unclassified
    #[allow(dead_code)] // Used in tests
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn classify(&self, text: &str) -> Option<TopLevelState> {
        let tokens = tokenize(text);
        self.rules
            .iter()
            .find(|(_, words)| tokens.iter().any(|t| words.contains(t)))
            .map(|(state, _)| *state)
    }
}
