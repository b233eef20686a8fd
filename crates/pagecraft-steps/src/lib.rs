//! Content steps of the Pagecraft pipeline: a product record goes in, FAQ,
//! product and comparison pages come out, checked by a reviewer gate.

pub mod blocks;
pub mod pages;
pub mod parser;
pub mod pipeline;
pub mod questions;
pub mod reviewer;
pub mod schemas;

pub use pages::{ComparisonPageStep, FaqPageStep, ProductPageStep};
pub use parser::ParserStep;
pub use pipeline::content_pipeline;
pub use questions::QuestionGenerator;
pub use reviewer::Reviewer;
pub use schemas::keys;
