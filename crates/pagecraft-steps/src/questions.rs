use futures::future::BoxFuture;
use tracing::debug;

use pagecraft_core::error::Result;
use pagecraft_core::state::StateView;
use pagecraft_core::traits::Step;
use pagecraft_core::types::{Delta, Feedback, StepOutput};

use crate::blocks;
use crate::schemas::{keys, Product, Question, QuestionCategory};

/// Generates the categorised question set for the FAQ page.
///
/// On a re-entry whose feedback concerns the FAQ, an extended set is added.
/// The feedback is consumed here only when nothing else is being critiqued;
/// otherwise it stays visible to the page steps downstream.
pub struct QuestionGenerator;

impl Step for QuestionGenerator {
    fn execute(&self, view: StateView) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            let product: Product = view.require(keys::PRODUCT)?;
            let feedback = view.feedback();
            let extend = feedback.is_some_and(concerns_faq);

            let mut questions = base_questions(&product);
            if extend {
                questions.extend(extended_questions(&product));
            }
            debug!(count = questions.len(), extended = extend, "Generated questions");

            let mut delta = Delta::new().with(keys::QUESTIONS, serde_json::to_value(&questions)?);
            if feedback.is_some_and(only_faq) {
                delta = delta.clear_feedback();
            }
            Ok(StepOutput::success(delta))
        })
    }
}

fn is_faq_artifact(artifact: &str) -> bool {
    artifact == keys::FAQ_PAGE || artifact == keys::QUESTIONS
}

fn concerns_faq(feedback: &Feedback) -> bool {
    feedback.critiques.iter().any(|c| is_faq_artifact(&c.artifact))
}

fn only_faq(feedback: &Feedback) -> bool {
    !feedback.is_empty() && feedback.critiques.iter().all(|c| is_faq_artifact(&c.artifact))
}

pub fn base_questions(product: &Product) -> Vec<Question> {
    use QuestionCategory::*;

    let name = &product.name;
    let mut out = vec![Question::new(
        Usage,
        format!("How do I use {}?", name),
        blocks::usage(product),
    )];

    for feature in &product.features {
        out.push(Question::new(
            Usage,
            format!("How does the {} benefit my skin?", feature),
            format!(
                "The {} in {} helps to improve skin health and appearance by targeting specific concerns.",
                feature, name
            ),
        ));
        out.push(Question::new(
            Informational,
            format!("Is the {} suitable for sensitive skin?", feature),
            format!(
                "Yes, the {} used in {} is formulated to be gentle and effective for all skin types.",
                feature, name
            ),
        ));
    }

    for (key, value) in &product.specs {
        out.push(Question::new(
            Informational,
            format!("What is the {} of {}?", key, name),
            format!("The {} of {} is {}.", key, name, value),
        ));
    }

    out.extend([
        Question::new(
            Safety,
            format!("Is {} safe for daily use?", name),
            format!("Yes, {} is dermatologically tested and safe for daily application.", name),
        ),
        Question::new(
            Safety,
            "Are there any side effects?",
            "No common side effects have been reported. Patch test recommended.",
        ),
        Question::new(
            Safety,
            "Is it safe for pregnant women?",
            "Please consult your healthcare provider before using new skincare products during pregnancy.",
        ),
        Question::new(
            Purchase,
            format!("Where can I buy {}?", name),
            format!(
                "{} is available exclusively on our official website and select retail partners.",
                name
            ),
        ),
        Question::new(
            Purchase,
            "What is the return policy?",
            "We offer a 30-day money-back guarantee if you are not satisfied.",
        ),
        Question::new(
            Purchase,
            "Do you offer international shipping?",
            "Yes, we ship to over 50 countries worldwide.",
        ),
    ]);

    let highlight = product
        .features
        .first()
        .map(String::as_str)
        .unwrap_or("carefully selected actives");
    out.push(Question::new(
        Comparison,
        format!("How is {} better than competitors?", name),
        format!(
            "{} offers a unique blend of premium ingredients like {} at a competitive price.",
            name, highlight
        ),
    ));
    out
}

/// Additional questions used after the FAQ was critiqued.
pub fn extended_questions(product: &Product) -> Vec<Question> {
    use QuestionCategory::*;

    let name = &product.name;
    let price = blocks::format_currency(product.price.amount, &product.price.currency);
    let mut out = vec![
        Question::new(
            Usage,
            format!("How long does it take to see results with {}?", name),
            format!("Most users notice visible results from {} within four to six weeks of daily use.", name),
        ),
        Question::new(
            Usage,
            format!("Can I layer {} with other products?", name),
            format!("Yes, apply {} before heavier creams and follow with sunscreen during the day.", name),
        ),
        Question::new(
            Informational,
            format!("How should I store {}?", name),
            "Store in a cool, dry place away from direct sunlight and keep the cap tightly closed.",
        ),
        Question::new(
            Purchase,
            format!("How much does {} cost?", name),
            format!("{} is priced at {} through our official store.", name, price),
        ),
        Question::new(
            Safety,
            format!("Is {} tested on animals?", name),
            format!("No, {} is cruelty free and never tested on animals.", name),
        ),
    ];

    if let Some(competitor) = product.competitors.first() {
        out.push(Question::new(
            Comparison,
            format!("How does {} compare to {}?", name, competitor.name),
            format!(
                "{} costs {} while {} costs {}, and {} focuses on {}.",
                name,
                price,
                competitor.name,
                blocks::format_currency(competitor.price, "USD"),
                name,
                blocks::key_ingredients(&product.features),
            ),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use pagecraft_core::state::State;
    use pagecraft_core::types::Signal;
    use serde_json::json;

    use crate::schemas::{Competitor, Price};

    fn product() -> Product {
        Product {
            id: "GS-01".into(),
            name: "Glow Serum".into(),
            category: "Skincare".into(),
            price: Price {
                amount: 29.99,
                currency: "USD".into(),
            },
            features: vec!["Vitamin C".into(), "Hyaluronic Acid".into()],
            specs: BTreeMap::from([("volume".to_string(), "30ml".to_string())]),
            description: String::new(),
            competitors: vec![Competitor {
                name: "Rival".into(),
                price: 39.99,
                ingredients: vec![],
                benefits: vec![],
                volume: None,
            }],
        }
    }

    fn view_with(feedback: Option<Feedback>) -> StateView {
        let mut state = State::new(json!({}), 3);
        state.apply(Delta::new().with(keys::PRODUCT, serde_json::to_value(product()).unwrap()));
        if let Some(fb) = feedback {
            state.set_feedback(fb);
        }
        StateView::new(Arc::new(state), Arc::from(vec![keys::PRODUCT.to_string()]))
    }

    fn questions_of(output: &StepOutput) -> Vec<Question> {
        serde_json::from_value(output.delta.get(keys::QUESTIONS).unwrap().clone()).unwrap()
    }

    #[test]
    fn base_set_covers_every_category() {
        let questions = base_questions(&product());
        // usage + 2 per feature + 1 per spec + 3 safety + 3 purchase + comparison
        assert_eq!(questions.len(), 1 + 4 + 1 + 3 + 3 + 1);
        for category in [
            QuestionCategory::Usage,
            QuestionCategory::Informational,
            QuestionCategory::Safety,
            QuestionCategory::Purchase,
            QuestionCategory::Comparison,
        ] {
            assert!(questions.iter().any(|q| q.category == category));
        }
        assert_eq!(questions[5].answer, "The volume of Glow Serum is 30ml.");
    }

    #[test]
    fn comparison_answer_survives_no_features() {
        let mut p = product();
        p.features.clear();
        let last = base_questions(&p).pop().unwrap();
        assert!(last.answer.contains("carefully selected actives"));
    }

    #[tokio::test]
    async fn first_pass_leaves_feedback_alone() {
        let output = QuestionGenerator.execute(view_with(None)).await.unwrap();
        assert_eq!(output.signal, Signal::Success);
        assert_eq!(questions_of(&output).len(), 13);
        assert!(!output.delta.clears_feedback());
    }

    #[tokio::test]
    async fn faq_feedback_extends_and_is_consumed() {
        let fb = Feedback::new().with(keys::FAQ_PAGE, "needs at least 15 questions");
        let output = QuestionGenerator.execute(view_with(Some(fb))).await.unwrap();
        assert_eq!(questions_of(&output).len(), 13 + 6);
        assert!(output.delta.clears_feedback());
    }

    #[tokio::test]
    async fn mixed_feedback_is_left_for_the_pages() {
        let fb = Feedback::new()
            .with(keys::FAQ_PAGE, "needs at least 15 questions")
            .with(keys::PRODUCT_PAGE, "headline too short");
        let output = QuestionGenerator.execute(view_with(Some(fb))).await.unwrap();
        assert_eq!(questions_of(&output).len(), 19);
        assert!(!output.delta.clears_feedback());

        let fb = Feedback::new().with(keys::COMPARISON_PAGE, "empty cell");
        let output = QuestionGenerator.execute(view_with(Some(fb))).await.unwrap();
        assert_eq!(questions_of(&output).len(), 13);
        assert!(!output.delta.clears_feedback());
    }
}
