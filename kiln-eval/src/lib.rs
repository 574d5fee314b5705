//! KILN Eval - Cached Evaluation
//!
//! Runs the configuration evaluator as a subprocess, memoizes its output in a
//! cache store and hands back result trees or typed values.
//!
//! ```ignore
//! use kiln_eval::{Kiln, KilnConfig};
//!
//! let mut kiln = Kiln::new(KilnConfig::from_env());
//! let user: User = kiln.eval_as("config/user.pkl")?;
//! ```

pub mod discovery;
pub mod evaluator;
pub mod orchestrator;

pub use discovery::{discover_modules, MODULE_EXTENSION};
pub use evaluator::{CommandEvaluator, Evaluator, Invocation, OutputFormat};
pub use orchestrator::{Kiln, DOCUMENT_SEPARATOR};

pub use kiln_core::{
    impl_castable, CacheError, CastError, EvalError, KilnConfig, KilnError, KilnResult,
    ResultTree, Value,
};
