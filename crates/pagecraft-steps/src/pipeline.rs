use std::time::Duration;

use tracing::info;

use pagecraft_core::config::AppConfig;
use pagecraft_core::error::ConfigError;
use pagecraft_engine::graph::{Edge, Graph, GraphBuilder, Node};
use pagecraft_engine::retry::RetryPolicy;

use crate::pages::{ComparisonPageStep, FaqPageStep, ProductPageStep};
use crate::parser::ParserStep;
use crate::questions::QuestionGenerator;
use crate::reviewer::Reviewer;
use crate::schemas::keys;

/// Node names of the standard content pipeline.
pub mod nodes {
    pub const PARSER: &str = "parser";
    pub const QGEN: &str = "qgen";
    pub const PAGES: &str = "pages";
    pub const REVIEWER: &str = "reviewer";
}

/// The standard content pipeline:
///
/// ```text
/// parser -> qgen -> pages{faq_page, product_page, comparison_page} -> reviewer
///            ^                                                          |
///            +------------------- reject (bounded) ---------------------+
/// ```
///
/// The reviewer's back-edge target is `pipeline.retry_entry`. The iteration
/// budget is raised when needed so that it always covers `max_loops` passes.
pub fn content_pipeline(config: &AppConfig) -> Result<Graph, ConfigError> {
    let retry = |name: &str| RetryPolicy::from_config(&config.retry.for_step(name));
    let tone = config.pipeline.tone.as_str();

    let floor = transitions_needed(config.pipeline.max_loops, &config.pipeline.retry_entry);
    let max_transitions = config.pipeline.max_transitions.max(floor);
    if max_transitions > config.pipeline.max_transitions {
        info!(
            configured = config.pipeline.max_transitions,
            max_transitions,
            max_loops = config.pipeline.max_loops,
            "Raised iteration budget to cover the loop budget"
        );
    }

    let mut builder = GraphBuilder::new(nodes::PARSER)
        .node(
            Node::step(nodes::PARSER, ParserStep)
                .with_writes([keys::PRODUCT])
                .with_retry(retry(nodes::PARSER)),
        )
        .node(
            Node::step(nodes::QGEN, QuestionGenerator)
                .with_reads([keys::PRODUCT])
                .with_writes([keys::QUESTIONS])
                .with_retry(retry(nodes::QGEN)),
        )
        .node(
            Node::step(keys::FAQ_PAGE, FaqPageStep::new(tone))
                .with_reads([keys::PRODUCT, keys::QUESTIONS])
                .with_writes([keys::FAQ_PAGE])
                .with_retry(retry(keys::FAQ_PAGE)),
        )
        .node(
            Node::step(keys::PRODUCT_PAGE, ProductPageStep::new(tone))
                .with_reads([keys::PRODUCT])
                .with_writes([keys::PRODUCT_PAGE])
                .with_retry(retry(keys::PRODUCT_PAGE)),
        )
        .node(
            Node::step(keys::COMPARISON_PAGE, ComparisonPageStep::new(tone))
                .with_reads([keys::PRODUCT])
                .with_writes([keys::COMPARISON_PAGE])
                .with_retry(retry(keys::COMPARISON_PAGE)),
        )
        .node(Node::parallel(nodes::PAGES, keys::PAGES))
        .node(
            Node::gate(
                nodes::REVIEWER,
                Reviewer::new(config.review.clone()),
                config.pipeline.retry_entry.as_str(),
            )
            .with_reads(keys::PAGES)
            .with_retry(retry(nodes::REVIEWER)),
        )
        .edge(Edge::on_success(nodes::PARSER, nodes::QGEN))
        .edge(Edge::on_success(nodes::QGEN, nodes::PAGES))
        .edge(Edge::on_success(nodes::PAGES, nodes::REVIEWER))
        .max_loops(config.pipeline.max_loops)
        .max_transitions(max_transitions);

    if config.pipeline.timeout_secs > 0 {
        builder = builder.timeout(Duration::from_secs(config.pipeline.timeout_secs));
    }
    builder.build()
}

/// Dispatches of a run that uses every back-edge. The first pass runs all
/// four top-level nodes and each loop re-runs from `retry_entry` to the
/// reviewer.
fn transitions_needed(max_loops: u32, retry_entry: &str) -> u32 {
    let per_loop = match retry_entry {
        nodes::QGEN => 3,
        nodes::PAGES => 2,
        _ => 4,
    };
    4u32.saturating_add(max_loops.saturating_mul(per_loop))
}
