use std::collections::HashSet;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use pagecraft_core::config::ReviewConfig;
use pagecraft_core::error::Result;
use pagecraft_core::state::StateView;
use pagecraft_core::traits::QualityGate;
use pagecraft_core::types::{Feedback, GateVerdict};

use crate::schemas::{keys, ComparisonPage, FaqPage, ProductPage};

/// Phrases that suggest copy was lifted from a web search.
const EXTERNAL_SEARCH_PATTERNS: &[&str] = &[
    r"according to.*search",
    r"based on.*results",
    r"found on.*website",
    r"source:.*http",
    r"retrieved from",
    r"as per.*online",
];

const PLACEHOLDER_PATTERN: &str = r"\b(lorem ipsum|placeholder|todo|tbd|xxx)\b";

const MIN_QUESTION_CHARS: usize = 5;

/// Rule-based quality gate over the three generated pages.
///
/// Every failed check becomes one critique keyed by the page it concerns, so
/// the steps re-entered by the back-edge can tell which output to revise.
pub struct Reviewer {
    config: ReviewConfig,
    external: Vec<(regex::Regex, &'static str)>,
    placeholder: Option<regex::Regex>,
}

impl Reviewer {
    /// Compile the content patterns. Invalid patterns are skipped with a warning.
    pub fn new(config: ReviewConfig) -> Self {
        let external = EXTERNAL_SEARCH_PATTERNS
            .iter()
            .filter_map(|p| compile(p).map(|re| (re, *p)))
            .collect();
        Self {
            config,
            external,
            placeholder: compile(PLACEHOLDER_PATTERN),
        }
    }

    fn external_phrase(&self, text: &str) -> Option<&'static str> {
        let lower = text.to_lowercase();
        self.external
            .iter()
            .find(|(re, _)| re.is_match(&lower))
            .map(|(_, label)| *label)
    }

    fn placeholder_in(&self, text: &str) -> Option<String> {
        let lower = text.to_lowercase();
        self.placeholder
            .as_ref()
            .and_then(|re| re.find(&lower))
            .map(|m| m.as_str().to_string())
    }

    pub fn review_faq(&self, page: &FaqPage, fb: &mut Feedback) {
        let cfg = &self.config;
        if page.faqs.len() < cfg.min_faqs {
            fb.add(
                keys::FAQ_PAGE,
                format!(
                    "FAQ must contain at least {} questions, got {}",
                    cfg.min_faqs,
                    page.faqs.len()
                ),
            );
        }

        for (idx, faq) in page.faqs.iter().enumerate() {
            let n = idx + 1;
            let answer_chars = faq.answer.chars().count();
            if answer_chars < cfg.min_answer_chars {
                fb.add(
                    keys::FAQ_PAGE,
                    format!(
                        "FAQ #{} answer is too short ({} chars, minimum {})",
                        n, answer_chars, cfg.min_answer_chars
                    ),
                );
            }
            if faq.question.chars().count() < MIN_QUESTION_CHARS {
                fb.add(keys::FAQ_PAGE, format!("FAQ #{} question is too short", n));
            }
            if let Some(phrase) = self.external_phrase(&faq.answer) {
                fb.add(
                    keys::FAQ_PAGE,
                    format!("FAQ #{} answer contains external search indicator '{}'", n, phrase),
                );
            }
        }

        let categories: HashSet<_> = page.faqs.iter().map(|f| f.category).collect();
        if categories.len() < cfg.min_categories {
            fb.add(
                keys::FAQ_PAGE,
                format!(
                    "FAQ should cover at least {} categories, got {}",
                    cfg.min_categories,
                    categories.len()
                ),
            );
        }
    }

    pub fn review_product(&self, page: &ProductPage, fb: &mut Feedback) {
        let cfg = &self.config;
        let headline = &page.hero.headline;
        let len = headline.chars().count();
        if len < cfg.min_headline_chars {
            fb.add(
                keys::PRODUCT_PAGE,
                format!(
                    "Headline is too short ({} chars, minimum {})",
                    len, cfg.min_headline_chars
                ),
            );
        } else if len > cfg.max_headline_chars {
            fb.add(
                keys::PRODUCT_PAGE,
                format!(
                    "Headline is too long ({} chars, maximum {})",
                    len, cfg.max_headline_chars
                ),
            );
        }
        if let Some(phrase) = self.external_phrase(headline) {
            fb.add(
                keys::PRODUCT_PAGE,
                format!("Headline contains external search indicator '{}'", phrase),
            );
        }

        for text in [&page.meta.description, &page.usage] {
            if let Some(found) = self.placeholder_in(text) {
                fb.add(
                    keys::PRODUCT_PAGE,
                    format!("Page contains placeholder text '{}'", found),
                );
            }
        }

        // The meta description is the product description, clipped with "...".
        let description = page.meta.description.trim_end_matches("...").trim();
        let description_chars = description.chars().count();
        if description_chars < cfg.min_description_chars {
            fb.add(
                keys::PRODUCT_PAGE,
                format!(
                    "Product description is too short ({} chars, minimum {})",
                    description_chars, cfg.min_description_chars
                ),
            );
        }
        if let Some(phrase) = self.external_phrase(description) {
            fb.add(
                keys::PRODUCT_PAGE,
                format!("Product description contains external search indicator '{}'", phrase),
            );
        }

        let features = &page.features.data;
        if features.len() < cfg.min_features {
            fb.add(
                keys::PRODUCT_PAGE,
                format!(
                    "Features list must contain at least {} items, got {}",
                    cfg.min_features,
                    features.len()
                ),
            );
        }
        for (idx, feature) in features.iter().enumerate() {
            if feature.trim().chars().count() < cfg.min_feature_chars {
                fb.add(
                    keys::PRODUCT_PAGE,
                    format!("Feature #{} is too short: '{}'", idx + 1, feature),
                );
            }
        }
        let unique: HashSet<&String> = features.iter().collect();
        if unique.len() != features.len() {
            fb.add(keys::PRODUCT_PAGE, "Features list contains duplicates");
        }
    }

    pub fn review_comparison(&self, page: &ComparisonPage, fb: &mut Feedback) {
        let cfg = &self.config;
        if page.headers.len() < 3 {
            fb.add(
                keys::COMPARISON_PAGE,
                "Comparison must include at least 1 competitor",
            );
        }
        if page.rows.len() < cfg.min_comparison_rows {
            fb.add(
                keys::COMPARISON_PAGE,
                format!(
                    "Comparison table must have at least {} rows, got {}",
                    cfg.min_comparison_rows,
                    page.rows.len()
                ),
            );
        }

        let features: HashSet<&str> = page.rows.iter().map(|r| r.feature.as_str()).collect();
        if features.len() != page.rows.len() {
            fb.add(keys::COMPARISON_PAGE, "Comparison table contains duplicate features");
        }

        for (idx, row) in page.rows.iter().enumerate() {
            if row.values.iter().any(|v| v.trim().is_empty()) {
                fb.add(
                    keys::COMPARISON_PAGE,
                    format!("Comparison row #{} ({}) has empty values", idx + 1, row.feature),
                );
            }
        }
    }
}

impl QualityGate for Reviewer {
    fn review(&self, view: StateView) -> BoxFuture<'_, Result<GateVerdict>> {
        Box::pin(async move {
            let mut fb = Feedback::new();

            if let Some(page) = read_page::<FaqPage>(&view, keys::FAQ_PAGE, &mut fb) {
                self.review_faq(&page, &mut fb);
            }
            if let Some(page) = read_page::<ProductPage>(&view, keys::PRODUCT_PAGE, &mut fb) {
                self.review_product(&page, &mut fb);
            }
            if let Some(page) = read_page::<ComparisonPage>(&view, keys::COMPARISON_PAGE, &mut fb)
            {
                self.review_comparison(&page, &mut fb);
            }

            if fb.is_empty() {
                info!(loop_count = view.loop_count(), "Review passed");
                Ok(GateVerdict::Accept)
            } else {
                debug!(critiques = fb.critiques.len(), "Review failed");
                Ok(GateVerdict::Reject(fb))
            }
        })
    }
}

/// Missing or unreadable pages are critiques, not errors.
fn read_page<T: DeserializeOwned>(view: &StateView, key: &str, fb: &mut Feedback) -> Option<T> {
    let Some(value) = view.artifact(key) else {
        fb.add(key, "Page was not generated");
        return None;
    };
    match serde_json::from_value(value.clone()) {
        Ok(page) => Some(page),
        Err(e) => {
            fb.add(key, format!("Page could not be read: {}", e));
            None
        }
    }
}

fn compile(pattern: &str) -> Option<regex::Regex> {
    match regex::Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "Invalid review pattern, skipping");
            None
        }
    }
}
