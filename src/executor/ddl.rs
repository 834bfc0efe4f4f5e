use super::{ExecutionContext, Executor};
use crate::core::{DbError, Result};
use crate::parser::ast::{CreateTableStmt, DropTableStmt, Statement};
use crate::result::QueryResult;
use std::collections::HashSet;

pub struct CreateTableExecutor;

impl Executor for CreateTableExecutor {
    fn name(&self) -> &'static str {
        "CREATE_TABLE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::CreateTable(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::CreateTable(create) = stmt else {
            unreachable!();
        };

        self.execute_create_table(create, ctx)
    }
}

impl CreateTableExecutor {
    fn execute_create_table(
        &self,
        create: &CreateTableStmt,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<QueryResult> {
        if ctx.image.has_table(&create.table_name) {
            if create.if_not_exists {
                return Ok(QueryResult::empty());
            }
            return Err(DbError::TableExists(create.table_name.clone()));
        }

        let mut seen = HashSet::new();
        for column in &create.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(DbError::ExecutionError(format!(
                    "Duplicate column '{}' in table '{}'",
                    column.name, create.table_name
                )));
            }
        }

        ctx.image
            .create_table(&create.table_name, create.columns.clone())?;
        Ok(QueryResult::empty())
    }
}

pub struct DropTableExecutor;

impl Executor for DropTableExecutor {
    fn name(&self) -> &'static str {
        "DROP_TABLE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::DropTable(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::DropTable(drop) = stmt else {
            unreachable!();
        };

        self.execute_drop_table(drop, ctx)
    }
}

impl DropTableExecutor {
    fn execute_drop_table(
        &self,
        drop: &DropTableStmt,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<QueryResult> {
        if !ctx.image.has_table(&drop.table_name) && drop.if_exists {
            return Ok(QueryResult::empty());
        }

        ctx.image.drop_table(&drop.table_name)?;
        Ok(QueryResult::empty())
    }
}
