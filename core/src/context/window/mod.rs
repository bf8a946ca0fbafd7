pub mod manager;
pub mod token_counter;

pub use manager::{ContextBudget, ContextSelection, WindowManager};
pub use token_counter::{CharEstimateCounter, TokenCounter};
