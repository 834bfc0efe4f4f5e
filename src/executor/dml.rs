use super::{ExecutionContext, Executor};
use crate::core::{DbError, Result, Value};
use crate::parser::ast::{InsertStmt, Statement};
use crate::result::QueryResult;

pub struct InsertExecutor;

impl Executor for InsertExecutor {
    fn name(&self) -> &'static str {
        "INSERT"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Insert(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Insert(insert) = stmt else {
            unreachable!();
        };

        self.execute_insert(insert, ctx)
    }
}

impl InsertExecutor {
    fn execute_insert(&self, insert: &InsertStmt, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let evaluator = ctx.evaluator();
        let table = ctx.image.table_mut(&insert.table_name)?;
        let schema = table.schema().clone();

        // Positions of the listed columns; None means "all, in table order".
        let positions = match &insert.columns {
            Some(columns) => Some(
                columns
                    .iter()
                    .map(|name| {
                        schema.find_column_index(name).ok_or_else(|| {
                            DbError::ColumnNotFound(name.clone(), insert.table_name.clone())
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };
        let expected = positions
            .as_ref()
            .map(|p| p.len())
            .unwrap_or_else(|| schema.column_count());

        let mut inserted = 0;
        for exprs in &insert.values {
            if exprs.len() != expected {
                return Err(DbError::ExecutionError(format!(
                    "INSERT into '{}' expects {} values, got {}",
                    insert.table_name,
                    expected,
                    exprs.len()
                )));
            }

            let values = exprs
                .iter()
                .map(|expr| evaluator.eval_constant(expr))
                .collect::<Result<Vec<_>>>()?;

            let row = match &positions {
                Some(positions) => {
                    let mut row = vec![Value::Null; schema.column_count()];
                    for (pos, value) in positions.iter().zip(values) {
                        row[*pos] = value;
                    }
                    row
                }
                None => values,
            };

            table.insert(row)?;
            inserted += 1;
        }

        Ok(QueryResult::affected(inserted))
    }
}
