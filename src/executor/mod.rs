pub mod context;
pub mod executor;
pub mod ddl;
pub mod dml;
pub mod update;
pub mod delete;
pub mod query;
pub mod sort;

pub use context::{ExecutionContext, Evaluator};
pub use executor::{Executor, ExecutorPipeline};
