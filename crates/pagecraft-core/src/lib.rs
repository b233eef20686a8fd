pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{ConfigError, PagecraftError, Result};
pub use event::EventBus;
pub use state::{State, StateView, Transition};
pub use traits::{QualityGate, Step};
pub use types::*;
