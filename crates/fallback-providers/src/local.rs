//! Deterministic local generator used when every remote provider is
//! exhausted or skipped.
//!
//! Produces a templated answer from the question's ticker symbols and intent
//! words plus any supplied context values. It never fails and never returns
//! empty text.

use fallback_core::GenerationContext;
use std::fmt::Write;

/// Uppercase words that look like tickers but rarely are
const NOT_TICKERS: &[&str] = &[
    "AI", "AM", "AN", "AND", "ARE", "AS", "AT", "BE", "BY", "CEO", "DO", "FOR", "HOW", "IF", "IN",
    "IS", "IT", "ME", "MY", "NO", "NOT", "OF", "OK", "ON", "OR", "PM", "SO", "THE", "TO", "UP",
    "US", "USD", "WE", "WHAT", "WHY",
];

/// Question intent recognised from keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Analysis or outlook request
    Analysis,
    /// Current price or quote
    Price,
    /// Buy or sell decision
    Trade,
    /// Risk assessment
    Risk,
    /// News or sentiment
    News,
}

impl Intent {
    fn from_word(word: &str) -> Option<Self> {
        match word {
            "analyze" | "analyse" | "analysis" | "outlook" | "forecast" | "trend" => {
                Some(Self::Analysis)
            }
            "price" | "quote" | "worth" | "trading" | "cost" => Some(Self::Price),
            "buy" | "sell" | "hold" | "invest" | "trade" => Some(Self::Trade),
            "risk" | "risky" | "volatile" | "volatility" | "safe" => Some(Self::Risk),
            "news" | "sentiment" | "headlines" => Some(Self::News),
            _ => None,
        }
    }

    fn guidance(self) -> &'static str {
        match self {
            Self::Analysis => {
                "For an analysis, compare the recent trend against volume and key support and resistance levels."
            }
            Self::Price => "For pricing, check a live quote; the figures here may be delayed.",
            Self::Trade => {
                "This is not financial advice. Size any position to your risk tolerance and time horizon."
            }
            Self::Risk => {
                "To judge risk, look at recent volatility, drawdowns and how concentrated your exposure is."
            }
            Self::News => "For news and sentiment, review recent headlines from reliable sources.",
        }
    }
}

/// Keyword-aware fallback generator
#[derive(Debug, Clone, Default)]
pub struct LocalGenerator;

impl LocalGenerator {
    /// Create a new local generator
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build the fallback answer for a question
    #[must_use]
    pub fn answer(&self, message: &str, context: &GenerationContext) -> String {
        let tickers = extract_tickers(message);
        let intents = extract_intents(message);

        let mut out = String::from(
            "Our language model providers are temporarily unavailable, so this is an automated summary.",
        );

        if message.trim().is_empty() {
            out.push_str(" No question was provided; please ask again with some detail.");
        } else if tickers.is_empty() {
            out.push_str(" Your question has been noted.");
        } else {
            let _ = write!(out, " You asked about {}.", tickers.join(", "));
        }

        if !context.is_empty() {
            out.push_str(" Known data:");
            for (key, value) in context.iter() {
                let _ = write!(out, " {key}: {};", GenerationContext::display_value(value));
            }
        }

        for intent in &intents {
            out.push(' ');
            out.push_str(intent.guidance());
        }

        out.push_str(" Please try again shortly for a full answer.");
        out
    }
}

/// Uppercase 2-5 letter words (optionally `$`-prefixed), in order of first appearance
#[must_use]
pub fn extract_tickers(message: &str) -> Vec<String> {
    let mut tickers: Vec<String> = Vec::new();
    for raw in message.split_whitespace() {
        let word = raw
            .trim_start_matches('$')
            .trim_matches(|c: char| !c.is_ascii_alphanumeric());
        let is_ticker = (2..=5).contains(&word.len())
            && word.chars().all(|c| c.is_ascii_uppercase())
            && !NOT_TICKERS.contains(&word);
        if is_ticker && !tickers.iter().any(|t| t == word) {
            tickers.push(word.to_string());
        }
    }
    tickers
}

/// Intents mentioned in the message, in order of first appearance
#[must_use]
pub fn extract_intents(message: &str) -> Vec<Intent> {
    let mut intents = Vec::new();
    for raw in message.split_whitespace() {
        let word = raw
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if let Some(intent) = Intent::from_word(&word) {
            if !intents.contains(&intent) {
                intents.push(intent);
            }
        }
    }
    intents
}
