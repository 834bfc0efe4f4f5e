use super::{ExecutionContext, Executor};
use crate::core::{DbError, Result};
use crate::parser::ast::{Statement, UpdateStmt};
use crate::result::QueryResult;

pub struct UpdateExecutor;

impl Executor for UpdateExecutor {
    fn name(&self) -> &'static str {
        "UPDATE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Update(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Update(update) = stmt else {
            unreachable!();
        };

        self.execute_update(update, ctx)
    }
}

impl UpdateExecutor {
    fn execute_update(&self, update: &UpdateStmt, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let evaluator = ctx.evaluator();
        let table = ctx.image.table_mut(&update.table_name)?;
        let schema = table.schema().clone();

        let targets = update
            .assignments
            .iter()
            .map(|a| {
                schema
                    .find_column_index(&a.column)
                    .map(|idx| (idx, &a.value))
                    .ok_or_else(|| DbError::ColumnNotFound(a.column.clone(), update.table_name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        // Compute every new row against the old values before writing any.
        let mut changes = Vec::new();
        for (key, row) in table.rows() {
            if let Some(condition) = &update.selection {
                if !evaluator.matches(condition, &schema, row, &update.table_name)? {
                    continue;
                }
            }

            let mut new_row = row.clone();
            for (idx, expr) in &targets {
                new_row[*idx] = evaluator.eval(expr, &schema, row, &update.table_name)?;
            }
            changes.push((key.clone(), new_row));
        }

        let updated = changes.len();
        for (key, new_row) in changes {
            table.update(&key, new_row)?;
        }

        Ok(QueryResult::affected(updated))
    }
}
