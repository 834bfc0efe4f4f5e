use super::ExecutionContext;
use super::ddl::{CreateTableExecutor, DropTableExecutor};
use super::delete::DeleteExecutor;
use super::dml::InsertExecutor;
use super::query::QueryExecutor;
use super::update::UpdateExecutor;
use crate::core::{DbError, Result};
use crate::parser::ast::Statement;
use crate::result::QueryResult;

pub trait Executor: Send + Sync {
    /// Executor name, for diagnostics
    fn name(&self) -> &'static str;

    fn can_handle(&self, stmt: &Statement) -> bool;

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult>;
}

pub struct ExecutorPipeline {
    executors: Vec<Box<dyn Executor>>,
}

impl ExecutorPipeline {
    pub fn new() -> Self {
        Self {
            executors: Vec::new(),
        }
    }

    /// Pipeline with an executor for every supported statement.
    pub fn standard() -> Self {
        let mut pipeline = Self::new();
        pipeline.register(Box::new(CreateTableExecutor));
        pipeline.register(Box::new(DropTableExecutor));
        pipeline.register(Box::new(InsertExecutor));
        pipeline.register(Box::new(UpdateExecutor));
        pipeline.register(Box::new(DeleteExecutor));
        pipeline.register(Box::new(QueryExecutor));
        pipeline
    }

    pub fn register(&mut self, executor: Box<dyn Executor>) {
        self.executors.push(executor);
    }

    pub fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        for executor in &self.executors {
            if executor.can_handle(stmt) {
                log::trace!("{} handles statement", executor.name());
                return executor.execute(stmt, ctx);
            }
        }

        Err(DbError::UnsupportedOperation(
            "No executor found for statement".into(),
        ))
    }
}

impl Default for ExecutorPipeline {
    fn default() -> Self {
        Self::standard()
    }
}
