use super::sort::sort_rows;
use super::{ExecutionContext, Executor};
use crate::core::Result;
use crate::parser::ast::{QueryStmt, SelectItem, Statement};
use crate::result::QueryResult;

pub struct QueryExecutor;

impl Executor for QueryExecutor {
    fn name(&self) -> &'static str {
        "SELECT"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Query(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Query(query) = stmt else {
            unreachable!();
        };

        self.execute_query(query, ctx)
    }
}

impl QueryExecutor {
    fn execute_query(&self, query: &QueryStmt, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let evaluator = ctx.evaluator();
        let table = ctx.image.table(&query.table_name)?;
        let schema = table.schema();

        // Scan in primary key order, then filter
        let mut rows = Vec::new();
        for (_, row) in table.rows() {
            if let Some(condition) = &query.selection {
                if !evaluator.matches(condition, schema, row, &query.table_name)? {
                    continue;
                }
            }
            rows.push(row.clone());
        }

        sort_rows(&mut rows, &query.order_by, schema, &query.table_name, &evaluator)?;

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        // Projection
        let mut columns = Vec::new();
        for item in &query.projection {
            match item {
                SelectItem::Wildcard => columns.extend(schema.column_names()),
                SelectItem::Expr { label, .. } => columns.push(label.clone()),
            }
        }

        let projected = rows
            .iter()
            .map(|row| -> Result<_> {
                let mut out = Vec::with_capacity(columns.len());
                for item in &query.projection {
                    match item {
                        SelectItem::Wildcard => out.extend(row.iter().cloned()),
                        SelectItem::Expr { expr, .. } => {
                            out.push(evaluator.eval(expr, schema, row, &query.table_name)?)
                        }
                    }
                }
                Ok(out)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(QueryResult::new(columns, projected))
    }
}

#[cfg(test)]
mod tests {
    use crate::core::Value;
    use crate::executor::{ExecutionContext, ExecutorPipeline};
    use crate::parser::SqlParserAdapter;
    use crate::result::QueryResult;
    use crate::storage::image::DatasetImage;

    fn run(image: &mut DatasetImage, sql: &str, params: &[Value]) -> QueryResult {
        let stmt = SqlParserAdapter::new().parse_one(sql).unwrap();
        let mut ctx = ExecutionContext::new(image, params);
        ExecutorPipeline::standard().execute(&stmt, &mut ctx).unwrap()
    }

    fn seeded() -> DatasetImage {
        let mut image = DatasetImage::new();
        run(&mut image, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)", &[]);
        run(
            &mut image,
            "INSERT INTO users VALUES (1, 'alice', 30), (2, 'bob', 25), (3, 'carol', NULL)",
            &[],
        );
        image
    }

    #[test]
    fn test_select_where_order_limit() {
        let mut image = seeded();
        let result = run(
            &mut image,
            "SELECT name FROM users WHERE age IS NOT NULL ORDER BY age LIMIT 1",
            &[],
        );
        assert_eq!(result.columns, vec!["name".to_string()]);
        assert_eq!(result.rows, vec![vec![Value::Text("bob".into())]]);
    }

    #[test]
    fn test_update_and_delete_with_params() {
        let mut image = seeded();
        let updated = run(
            &mut image,
            "UPDATE users SET age = age + 1 WHERE id = $1",
            &[Value::Integer(1)],
        );
        assert_eq!(updated.rows_affected, 1);

        let deleted = run(&mut image, "DELETE FROM users WHERE age IS NULL", &[]);
        assert_eq!(deleted.rows_affected, 1);

        let result = run(&mut image, "SELECT * FROM users", &[]);
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.get(0, "age"), Some(&Value::Integer(31)));
    }

    #[test]
    fn test_insert_with_column_list_fills_nulls() {
        let mut image = seeded();
        run(&mut image, "INSERT INTO users (name, id) VALUES ('dave', 4)", &[]);
        let result = run(&mut image, "SELECT age FROM users WHERE id = 4", &[]);
        assert_eq!(result.rows, vec![vec![Value::Null]]);
    }
}
