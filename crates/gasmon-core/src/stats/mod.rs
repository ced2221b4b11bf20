pub mod evalerror;
pub mod stats;
pub mod ttest;

pub use evalerror::{EvalError, EvalResult};
pub use ttest::{evaluate, Evaluation, CRITICAL_T_VALUE};
