//! Artifact shapes exchanged between the content steps.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Artifact keys written by the standard pipeline.
pub mod keys {
    pub const PRODUCT: &str = "product";
    pub const QUESTIONS: &str = "questions";
    pub const FAQ_PAGE: &str = "faq_page";
    pub const PRODUCT_PAGE: &str = "product_page";
    pub const COMPARISON_PAGE: &str = "comparison_page";

    /// The page artifacts, in output order.
    pub const PAGES: [&str; 3] = [FAQ_PAGE, PRODUCT_PAGE, COMPARISON_PAGE];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competitor {
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub benefits: Vec<String>,
    #[serde(default)]
    pub volume: Option<String>,
}

/// Normalized product record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category: String,
    pub price: Price,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub specs: BTreeMap<String, String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub competitors: Vec<Competitor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QuestionCategory {
    Usage,
    Informational,
    Safety,
    Purchase,
    Comparison,
}

impl fmt::Display for QuestionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuestionCategory::Usage => "Usage",
            QuestionCategory::Informational => "Informational",
            QuestionCategory::Safety => "Safety",
            QuestionCategory::Purchase => "Purchase",
            QuestionCategory::Comparison => "Comparison",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub category: QuestionCategory,
    pub question: String,
    pub answer: String,
}

impl Question {
    pub fn new(
        category: QuestionCategory,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            category,
            question: question.into(),
            answer: answer.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqPage {
    pub title: String,
    pub description: String,
    pub faqs: Vec<Question>,
    pub disclaimer: String,
    pub tone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hero {
    pub headline: String,
    pub subheadline: String,
    pub price: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section<T> {
    pub title: String,
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPage {
    pub meta: PageMeta,
    pub hero: Hero,
    pub features: Section<Vec<String>>,
    pub benefits: Vec<String>,
    pub specs: Section<BTreeMap<String, String>>,
    pub usage: String,
    pub cta: String,
    pub tone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub feature: String,
    /// One cell per column after the feature column: the product first, then
    /// each competitor in input order.
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonPage {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<ComparisonRow>,
    pub summary: String,
    pub tone: String,
}
