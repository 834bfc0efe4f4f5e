use super::{ExecutionContext, Executor};
use crate::core::Result;
use crate::parser::ast::{DeleteStmt, Statement};
use crate::result::QueryResult;

pub struct DeleteExecutor;

impl Executor for DeleteExecutor {
    fn name(&self) -> &'static str {
        "DELETE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Delete(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Delete(delete) = stmt else {
            unreachable!();
        };

        self.execute_delete(delete, ctx)
    }
}

impl DeleteExecutor {
    fn execute_delete(&self, delete: &DeleteStmt, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let evaluator = ctx.evaluator();
        let table = ctx.image.table_mut(&delete.table_name)?;
        let schema = table.schema().clone();

        // Find rows to delete
        let mut keys = Vec::new();
        for (key, row) in table.rows() {
            let should_delete = match &delete.selection {
                Some(condition) => evaluator.matches(condition, &schema, row, &delete.table_name)?,
                None => true,
            };
            if should_delete {
                keys.push(key.clone());
            }
        }

        let deleted = keys.iter().filter(|key| table.delete(key)).count();
        Ok(QueryResult::affected(deleted))
    }
}
