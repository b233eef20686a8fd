//! Page generators. Each one is a plain step over the normalized product,
//! run together in the `pages` parallel group.

use futures::future::BoxFuture;
use tracing::debug;

use pagecraft_core::error::Result;
use pagecraft_core::state::StateView;
use pagecraft_core::traits::Step;
use pagecraft_core::types::{Delta, StepOutput};

use crate::blocks;
use crate::schemas::{
    keys, ComparisonPage, ComparisonRow, FaqPage, Hero, PageMeta, Product, ProductPage, Question,
    Section,
};

const META_DESCRIPTION_CHARS: usize = 150;
const MAX_HEADLINE_CHARS: usize = 100;

pub struct FaqPageStep {
    tone: String,
}

impl FaqPageStep {
    pub fn new(tone: impl Into<String>) -> Self {
        Self { tone: tone.into() }
    }
}

impl Step for FaqPageStep {
    fn execute(&self, view: StateView) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            let product: Product = view.require(keys::PRODUCT)?;
            let questions: Vec<Question> = view.require(keys::QUESTIONS)?;
            let page = faq_page(&product, questions, &self.tone);
            debug!(faqs = page.faqs.len(), "Built FAQ page");
            Ok(StepOutput::success(
                Delta::new().with(keys::FAQ_PAGE, serde_json::to_value(&page)?),
            ))
        })
    }
}

pub fn faq_page(product: &Product, faqs: Vec<Question>, tone: &str) -> FaqPage {
    FaqPage {
        title: blocks::seo_title(&product.name, "FAQ"),
        description: format!("Frequently asked questions about the {}.", product.name),
        faqs,
        disclaimer: blocks::disclaimer().to_string(),
        tone: tone.to_string(),
    }
}

/// Product landing page. When the reviewer critiqued the previous version it
/// switches to the longer headline form.
pub struct ProductPageStep {
    tone: String,
}

impl ProductPageStep {
    pub fn new(tone: impl Into<String>) -> Self {
        Self { tone: tone.into() }
    }
}

impl Step for ProductPageStep {
    fn execute(&self, view: StateView) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            let product: Product = view.require(keys::PRODUCT)?;
            let revise = view
                .feedback()
                .is_some_and(|fb| fb.targets(keys::PRODUCT_PAGE));
            let page = product_page(&product, &self.tone, revise);
            debug!(revise, headline = %page.hero.headline, "Built product page");
            Ok(StepOutput::success(
                Delta::new().with(keys::PRODUCT_PAGE, serde_json::to_value(&page)?),
            ))
        })
    }
}

pub fn product_page(product: &Product, tone: &str, revise: bool) -> ProductPage {
    let subheadline = format!("Experience the future of {}", product.category);
    let headline = if revise {
        let long = format!("{}: Premium {}", product.name, product.category);
        truncate_chars(&long, MAX_HEADLINE_CHARS)
    } else {
        product.name.clone()
    };

    ProductPage {
        meta: PageMeta {
            title: blocks::seo_title(&product.name, &product.category),
            description: format!(
                "{}...",
                truncate_chars(&product.description, META_DESCRIPTION_CHARS)
            ),
        },
        hero: Hero {
            headline,
            subheadline,
            price: blocks::format_currency(product.price.amount, &product.price.currency),
        },
        features: Section {
            title: "Key Features".to_string(),
            data: product.features.clone(),
        },
        benefits: blocks::benefits(&product.features),
        specs: Section {
            title: "Technical Specifications".to_string(),
            data: product.specs.clone(),
        },
        usage: blocks::usage(product),
        cta: "Buy Now".to_string(),
        tone: tone.to_string(),
    }
}

pub struct ComparisonPageStep {
    tone: String,
}

impl ComparisonPageStep {
    pub fn new(tone: impl Into<String>) -> Self {
        Self { tone: tone.into() }
    }
}

impl Step for ComparisonPageStep {
    fn execute(&self, view: StateView) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            let product: Product = view.require(keys::PRODUCT)?;
            let page = comparison_page(&product, &self.tone);
            debug!(rows = page.rows.len(), columns = page.headers.len(), "Built comparison page");
            Ok(StepOutput::success(
                Delta::new().with(keys::COMPARISON_PAGE, serde_json::to_value(&page)?),
            ))
        })
    }
}

/// Side-by-side table: the product column first, then one column per
/// competitor. With no competitors the table only has the product column.
pub fn comparison_page(product: &Product, tone: &str) -> ComparisonPage {
    let competitors = &product.competitors;

    let mut headers = vec!["Feature".to_string(), product.name.clone()];
    headers.extend(competitors.iter().map(|c| c.name.clone()));

    let row = |feature: &str, ours: String, theirs: Vec<String>| {
        let mut values = vec![ours];
        values.extend(theirs);
        ComparisonRow {
            feature: feature.to_string(),
            values,
        }
    };

    let mut rows = vec![
        row(
            "Price",
            blocks::format_currency(product.price.amount, &product.price.currency),
            competitors
                .iter()
                .map(|c| blocks::format_currency(c.price, "USD"))
                .collect(),
        ),
        row(
            "Ingredients Comparison",
            blocks::key_ingredients(&product.features),
            competitors
                .iter()
                .map(|c| blocks::compare_ingredients(&product.features, &c.ingredients))
                .collect(),
        ),
        row(
            "Primary Benefit",
            "Radiance & Hydration".to_string(),
            competitors
                .iter()
                .map(|c| {
                    if c.benefits.is_empty() {
                        "N/A".to_string()
                    } else {
                        c.benefits.join(", ")
                    }
                })
                .collect(),
        ),
    ];

    if let Some(volume) = product.specs.get("volume") {
        rows.push(row(
            "Volume",
            volume.clone(),
            competitors
                .iter()
                .map(|c| c.volume.clone().unwrap_or_else(|| "N/A".to_string()))
                .collect(),
        ));
    }

    let summary = match competitors.first() {
        Some(first) => format!(
            "The {} offers superior value compared to {}.",
            product.name, first.name
        ),
        None => format!("No competitors were listed for the {}.", product.name),
    };

    ComparisonPage {
        title: format!("Compare {} vs Competitors", product.name),
        headers,
        rows,
        summary,
        tone: tone.to_string(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use pagecraft_core::state::State;
    use pagecraft_core::types::Feedback;
    use serde_json::json;

    use crate::schemas::{Competitor, Price, QuestionCategory};

    fn product() -> Product {
        Product {
            id: "GS-01".into(),
            name: "Glow".into(),
            category: "Skincare".into(),
            price: Price {
                amount: 1299.0,
                currency: "INR".into(),
            },
            features: vec!["Vitamin C".into(), "SPF 30".into()],
            specs: BTreeMap::from([("volume".to_string(), "30ml".to_string())]),
            description: "x".repeat(200),
            competitors: vec![
                Competitor {
                    name: "Rival".into(),
                    price: 39.99,
                    ingredients: vec!["Niacinamide".into()],
                    benefits: vec!["Brightening".into()],
                    volume: Some("50ml".into()),
                },
                Competitor {
                    name: "Budget".into(),
                    price: 5.8,
                    ingredients: vec![],
                    benefits: vec![],
                    volume: None,
                },
            ],
        }
    }

    fn view(feedback: Option<Feedback>) -> StateView {
        let mut state = State::new(json!({}), 3);
        state.apply(
            Delta::new()
                .with(keys::PRODUCT, serde_json::to_value(product()).unwrap())
                .with(
                    keys::QUESTIONS,
                    json!([{"category": "Usage", "question": "How?", "answer": "Like this."}]),
                ),
        );
        if let Some(fb) = feedback {
            state.set_feedback(fb);
        }
        let reads = vec![keys::PRODUCT.to_string(), keys::QUESTIONS.to_string()];
        StateView::new(Arc::new(state), Arc::from(reads))
    }

    #[test]
    fn product_page_blocks() {
        let page = product_page(&product(), "Persuasive", false);
        assert_eq!(page.hero.headline, "Glow");
        assert_eq!(page.hero.price, "1,299.00 INR");
        assert_eq!(page.meta.description.chars().count(), 153);
        assert_eq!(page.benefits[0], "Brightens and evens skin tone");
        assert_eq!(page.benefits[1], "Protects against UV damage");
        assert_eq!(page.cta, "Buy Now");
        assert_eq!(page.tone, "Persuasive");
    }

    #[test]
    fn revised_headline_is_longer_but_bounded() {
        let page = product_page(&product(), "Professional", true);
        assert_eq!(page.hero.headline, "Glow: Premium Skincare");

        let mut long = product();
        long.name = "N".repeat(120);
        let page = product_page(&long, "Professional", true);
        assert_eq!(page.hero.headline.chars().count(), 100);
    }

    #[test]
    fn comparison_rows_line_up_with_headers() {
        let page = comparison_page(&product(), "Analytical");
        assert_eq!(page.headers, ["Feature", "Glow", "Rival", "Budget"]);
        let features: Vec<&str> = page.rows.iter().map(|r| r.feature.as_str()).collect();
        assert_eq!(
            features,
            ["Price", "Ingredients Comparison", "Primary Benefit", "Volume"]
        );
        for row in &page.rows {
            assert_eq!(row.values.len(), page.headers.len() - 1);
        }
        assert_eq!(page.rows[0].values[1], "39.99 USD");
        assert_eq!(page.rows[1].values[2], "Vitamin C, SPF 30 VS N/A");
        assert_eq!(page.rows[3].values, ["30ml", "50ml", "N/A"]);
        assert!(page.summary.contains("compared to Rival"));
    }

    #[test]
    fn comparison_without_competitors_is_product_only() {
        let mut p = product();
        p.competitors.clear();
        let page = comparison_page(&p, "Analytical");
        assert_eq!(page.headers, ["Feature", "Glow"]);
        assert!(page.rows.iter().all(|r| r.values.len() == 1));
        assert!(page.summary.contains("No competitors"));
    }

    #[tokio::test]
    async fn faq_step_wraps_questions() {
        let output = FaqPageStep::new("Professional").execute(view(None)).await.unwrap();
        let page: FaqPage =
            serde_json::from_value(output.delta.get(keys::FAQ_PAGE).unwrap().clone()).unwrap();
        assert_eq!(page.title, "Glow | Best FAQ Review & Specs");
        assert_eq!(page.faqs.len(), 1);
        assert_eq!(page.faqs[0].category, QuestionCategory::Usage);
        assert!(page.disclaimer.starts_with("Disclaimer:"));
    }

    #[tokio::test]
    async fn product_step_revises_on_its_own_feedback() {
        let step = ProductPageStep::new("Persuasive");

        let fb = Feedback::new().with(keys::FAQ_PAGE, "too few");
        let output = step.execute(view(Some(fb))).await.unwrap();
        assert_eq!(output.delta.get(keys::PRODUCT_PAGE).unwrap()["hero"]["headline"], "Glow");
        assert!(!output.delta.clears_feedback());

        let fb = Feedback::new().with(keys::PRODUCT_PAGE, "headline too short");
        let output = step.execute(view(Some(fb))).await.unwrap();
        assert_eq!(
            output.delta.get(keys::PRODUCT_PAGE).unwrap()["hero"]["headline"],
            "Glow: Premium Skincare"
        );
    }

    #[tokio::test]
    async fn missing_product_fails_the_step() {
        let state = State::new(json!({}), 3);
        let view = StateView::new(Arc::new(state), Arc::from(vec![keys::PRODUCT.to_string()]));
        let err = ComparisonPageStep::new("Analytical").execute(view).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
