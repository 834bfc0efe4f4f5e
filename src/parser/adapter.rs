// ============================================================================
// src/parser/adapter.rs - sqlparser AST -> dataset statement AST
// ============================================================================

use sqlparser::ast as sql_ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use crate::core::{Column, DataType, DbError, Result, Value};
use crate::parser::ast::*;

pub struct SqlParserAdapter {
    dialect: PostgreSqlDialect,
}

impl SqlParserAdapter {
    pub fn new() -> Self {
        Self {
            dialect: PostgreSqlDialect {},
        }
    }

    pub fn parse(&self, sql: &str) -> Result<Vec<Statement>> {
        let external_stmts = Parser::parse_sql(&self.dialect, sql)
            .map_err(|e| DbError::ParseError(e.to_string()))?;

        external_stmts
            .into_iter()
            .map(|stmt| self.convert_statement(stmt))
            .collect()
    }

    /// Parse exactly one statement.
    pub fn parse_one(&self, sql: &str) -> Result<Statement> {
        let mut stmts = self.parse(sql)?;
        match stmts.len() {
            1 => Ok(stmts.remove(0)),
            0 => Err(DbError::ParseError("Empty statement".into())),
            n => Err(DbError::UnsupportedOperation(format!(
                "Expected a single statement, got {}",
                n
            ))),
        }
    }

    fn convert_statement(&self, stmt: sql_ast::Statement) -> Result<Statement> {
        match stmt {
            sql_ast::Statement::CreateTable(create) => {
                Ok(Statement::CreateTable(self.convert_create_table(create)?))
            }
            sql_ast::Statement::Drop { object_type, names, if_exists, .. } => {
                if let sql_ast::ObjectType::Table = object_type {
                    Ok(Statement::DropTable(self.convert_drop_table(names, if_exists)?))
                } else {
                    Err(DbError::UnsupportedOperation(format!(
                        "Only DROP TABLE supported, got: {:?}",
                        object_type
                    )))
                }
            }
            sql_ast::Statement::Insert(insert) => {
                Ok(Statement::Insert(self.convert_insert(insert)?))
            }
            sql_ast::Statement::Query(query) => {
                Ok(Statement::Query(self.convert_query(*query)?))
            }
            sql_ast::Statement::Delete(delete) => {
                Ok(Statement::Delete(self.convert_delete(delete)?))
            }
            sql_ast::Statement::Update { table, assignments, selection, .. } => {
                Ok(Statement::Update(self.convert_update(table, assignments, selection)?))
            }
            _ => Err(DbError::UnsupportedOperation(format!(
                "Statement type not supported: {}",
                stmt
            ))),
        }
    }

    fn convert_create_table(&self, create: sql_ast::CreateTable) -> Result<CreateTableStmt> {
        let table_name = extract_table_name(&create.name)?;
        let columns = create
            .columns
            .into_iter()
            .map(|col| self.convert_column_def(col))
            .collect::<Result<Vec<_>>>()?;

        if columns.is_empty() {
            return Err(DbError::ParseError(format!(
                "Table '{}' must have at least one column",
                table_name
            )));
        }

        Ok(CreateTableStmt {
            table_name,
            columns,
            if_not_exists: create.if_not_exists,
        })
    }

    fn convert_column_def(&self, col: sql_ast::ColumnDef) -> Result<Column> {
        let data_type = self.convert_data_type(&col.data_type)?;
        let mut column = Column::new(col.name.value, data_type);

        for opt in &col.options {
            if matches!(opt.option, sql_ast::ColumnOption::NotNull) {
                column = column.not_null();
            } else if opt.option.to_string().to_uppercase().starts_with("PRIMARY KEY") {
                column = column.primary_key();
            }
        }

        Ok(column)
    }

    fn convert_data_type(&self, dt: &sql_ast::DataType) -> Result<DataType> {
        match dt {
            sql_ast::DataType::Int(_)
            | sql_ast::DataType::Integer(_)
            | sql_ast::DataType::BigInt(_) => Ok(DataType::Integer),

            sql_ast::DataType::Text
            | sql_ast::DataType::Varchar(_)
            | sql_ast::DataType::Char(_)
            | sql_ast::DataType::String(_) => Ok(DataType::Text),

            sql_ast::DataType::Blob(_)
            | sql_ast::DataType::Bytea => Ok(DataType::Blob),

            sql_ast::DataType::Boolean
            | sql_ast::DataType::Bool => Ok(DataType::Boolean),

            sql_ast::DataType::Float(_)
            | sql_ast::DataType::Double(_)
            | sql_ast::DataType::Real => Err(DbError::UnsupportedOperation(format!(
                "Floating point column type {} is not deterministic",
                dt
            ))),

            _ => Err(DbError::TypeMismatch(format!(
                "Unsupported data type: {}",
                dt
            ))),
        }
    }

    fn convert_drop_table(&self, names: Vec<sql_ast::ObjectName>, if_exists: bool) -> Result<DropTableStmt> {
        if names.len() != 1 {
            return Err(DbError::UnsupportedOperation(
                "Only single table DROP supported".into()
            ));
        }

        Ok(DropTableStmt {
            table_name: extract_table_name(&names[0])?,
            if_exists,
        })
    }

    fn convert_insert(&self, insert: sql_ast::Insert) -> Result<InsertStmt> {
        let table_name = insert.table.to_string();

        let columns = if insert.columns.is_empty() {
            None
        } else {
            Some(insert.columns.into_iter().map(|id| id.value).collect())
        };

        let Some(source) = insert.source else {
            return Err(DbError::ParseError("INSERT requires a VALUES clause".into()));
        };
        let sql_ast::SetExpr::Values(vals) = *source.body else {
            return Err(DbError::UnsupportedOperation(
                "Only VALUES clause supported".into()
            ));
        };

        let values = vals
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|expr| self.convert_expr(expr))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(InsertStmt {
            table_name,
            columns,
            values,
        })
    }

    fn convert_query(&self, query: sql_ast::Query) -> Result<QueryStmt> {
        let order_by = self.convert_order_by(query.order_by)?;
        let limit = self.convert_limit_clause(&query.limit_clause)?;

        let sql_ast::SetExpr::Select(select) = *query.body else {
            return Err(DbError::UnsupportedOperation(
                "Only SELECT queries supported".into()
            ));
        };
        let select = *select;

        if select.from.len() != 1 || !select.from[0].joins.is_empty() {
            return Err(DbError::UnsupportedOperation(
                "SELECT must read from exactly one table".into()
            ));
        }
        let table_name = match &select.from[0].relation {
            sql_ast::TableFactor::Table { name, .. } => extract_table_name(name)?,
            _ => return Err(DbError::UnsupportedOperation(
                "Complex table references not supported".into()
            )),
        };

        let projection = select
            .projection
            .into_iter()
            .map(|item| self.convert_select_item(item))
            .collect::<Result<Vec<_>>>()?;

        let selection = select
            .selection
            .map(|expr| self.convert_expr(expr))
            .transpose()?;

        Ok(QueryStmt {
            projection,
            table_name,
            selection,
            order_by,
            limit,
        })
    }

    fn convert_select_item(&self, item: sql_ast::SelectItem) -> Result<SelectItem> {
        match item {
            sql_ast::SelectItem::Wildcard(_) => Ok(SelectItem::Wildcard),
            sql_ast::SelectItem::UnnamedExpr(expr) => {
                let label = match &expr {
                    sql_ast::Expr::Identifier(ident) => ident.value.clone(),
                    sql_ast::Expr::CompoundIdentifier(idents) => idents
                        .last()
                        .map(|i| i.value.clone())
                        .unwrap_or_default(),
                    other => other.to_string(),
                };
                Ok(SelectItem::Expr {
                    expr: self.convert_expr(expr)?,
                    label,
                })
            }
            sql_ast::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectItem::Expr {
                expr: self.convert_expr(expr)?,
                label: alias.value,
            }),
            _ => Err(DbError::UnsupportedOperation(
                "Unsupported select item".into()
            )),
        }
    }

    fn convert_order_by(&self, order_by: Option<sql_ast::OrderBy>) -> Result<Vec<OrderByExpr>> {
        let Some(order_by) = order_by else {
            return Ok(Vec::new());
        };

        match order_by.kind {
            sql_ast::OrderByKind::Expressions(exprs) => exprs
                .into_iter()
                .map(|order| {
                    Ok(OrderByExpr {
                        expr: self.convert_expr(order.expr)?,
                        descending: order.options.asc.map(|asc| !asc).unwrap_or(false),
                    })
                })
                .collect(),
            sql_ast::OrderByKind::All(_) => Err(DbError::UnsupportedOperation(
                "ORDER BY ALL not supported".into()
            )),
        }
    }

    fn convert_limit_clause(&self, limit_clause: &Option<sql_ast::LimitClause>) -> Result<Option<usize>> {
        let Some(clause) = limit_clause else {
            return Ok(None);
        };

        let limit = match clause {
            sql_ast::LimitClause::LimitOffset { limit: None, .. } => return Ok(None),
            sql_ast::LimitClause::LimitOffset { limit: Some(expr), .. } => expr,
            sql_ast::LimitClause::OffsetCommaLimit { limit, .. } => limit,
        };

        match limit {
            sql_ast::Expr::Value(value_with_span) => match &value_with_span.value {
                sql_ast::Value::Number(n, _) => n
                    .parse::<usize>()
                    .map(Some)
                    .map_err(|_| DbError::ParseError(format!("Invalid LIMIT value: {}", n))),
                other => Err(DbError::UnsupportedOperation(format!(
                    "Only numeric LIMIT supported, got: {}",
                    other
                ))),
            },
            _ => Err(DbError::UnsupportedOperation(
                "Only numeric LIMIT supported".into()
            )),
        }
    }

    fn convert_update(
        &self,
        table: sql_ast::TableWithJoins,
        assignments: Vec<sql_ast::Assignment>,
        selection: Option<sql_ast::Expr>,
    ) -> Result<UpdateStmt> {
        let table_name = match table.relation {
            sql_ast::TableFactor::Table { name, .. } => extract_table_name(&name)?,
            _ => return Err(DbError::UnsupportedOperation(
                "Complex table references not supported in UPDATE".into()
            )),
        };

        let assignments = assignments
            .into_iter()
            .map(|assign| {
                let column = match assign.target {
                    sql_ast::AssignmentTarget::ColumnName(col_name) if col_name.0.len() == 1 => {
                        col_name.0[0].to_string()
                    }
                    _ => return Err(DbError::UnsupportedOperation(
                        "Only simple column names supported in UPDATE".into()
                    )),
                };

                Ok(Assignment {
                    column,
                    value: self.convert_expr(assign.value)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let selection = selection
            .map(|expr| self.convert_expr(expr))
            .transpose()?;

        Ok(UpdateStmt {
            table_name,
            assignments,
            selection,
        })
    }

    fn convert_delete(&self, delete: sql_ast::Delete) -> Result<DeleteStmt> {
        let tables = match delete.from {
            sql_ast::FromTable::WithFromKeyword(tables) => tables,
            sql_ast::FromTable::WithoutKeyword(tables) => tables,
        };
        let Some(first) = tables.first() else {
            return Err(DbError::ParseError("DELETE requires a table name".into()));
        };
        let table_name = match &first.relation {
            sql_ast::TableFactor::Table { name, .. } => extract_table_name(name)?,
            _ => return Err(DbError::UnsupportedOperation(
                "Complex table references not supported in DELETE".into()
            )),
        };

        let selection = delete
            .selection
            .map(|expr| self.convert_expr(expr))
            .transpose()?;

        Ok(DeleteStmt {
            table_name,
            selection,
        })
    }

    fn convert_expr(&self, expr: sql_ast::Expr) -> Result<Expr> {
        match expr {
            sql_ast::Expr::Identifier(ident) => Ok(Expr::Column(ident.value)),
            sql_ast::Expr::CompoundIdentifier(idents) => idents
                .into_iter()
                .last()
                .map(|i| Expr::Column(i.value))
                .ok_or_else(|| DbError::ParseError("Empty identifier".into())),
            sql_ast::Expr::Value(val) => self.convert_value(val.value),
            sql_ast::Expr::Nested(inner) => self.convert_expr(*inner),
            sql_ast::Expr::IsNull(inner) => Ok(Expr::IsNull {
                expr: Box::new(self.convert_expr(*inner)?),
                negated: false,
            }),
            sql_ast::Expr::IsNotNull(inner) => Ok(Expr::IsNull {
                expr: Box::new(self.convert_expr(*inner)?),
                negated: true,
            }),
            sql_ast::Expr::UnaryOp { op, expr } => {
                let inner = self.convert_expr(*expr)?;
                match op {
                    sql_ast::UnaryOperator::Not => Ok(Expr::Not(Box::new(inner))),
                    sql_ast::UnaryOperator::Minus => Ok(match inner {
                        Expr::Literal(Value::Integer(i)) => Expr::Literal(Value::Integer(-i)),
                        other => Expr::Negate(Box::new(other)),
                    }),
                    sql_ast::UnaryOperator::Plus => Ok(inner),
                    other => Err(DbError::UnsupportedOperation(format!(
                        "Unsupported unary operator: {}",
                        other
                    ))),
                }
            }
            sql_ast::Expr::BinaryOp { left, op, right } => Ok(Expr::BinaryOp {
                left: Box::new(self.convert_expr(*left)?),
                op: self.convert_binary_op(&op)?,
                right: Box::new(self.convert_expr(*right)?),
            }),
            other => Err(DbError::UnsupportedOperation(format!(
                "Unsupported expression: {}",
                other
            ))),
        }
    }

    fn convert_value(&self, val: sql_ast::Value) -> Result<Expr> {
        let value = match val {
            sql_ast::Value::Number(n, _) => match n.parse::<i64>() {
                Ok(i) => Value::Integer(i),
                Err(_) => {
                    return Err(DbError::UnsupportedOperation(format!(
                        "Non-integer numeric literal {} is not deterministic",
                        n
                    )))
                }
            },
            sql_ast::Value::SingleQuotedString(s) | sql_ast::Value::DoubleQuotedString(s) => {
                Value::Text(s)
            }
            sql_ast::Value::HexStringLiteral(s) => Value::Blob(
                hex::decode(&s).map_err(|e| DbError::ParseError(format!("Invalid hex literal: {}", e)))?,
            ),
            sql_ast::Value::Boolean(b) => Value::Boolean(b),
            sql_ast::Value::Null => Value::Null,
            sql_ast::Value::Placeholder(p) => return parse_placeholder(&p),
            other => {
                return Err(DbError::UnsupportedOperation(format!(
                    "Unsupported value: {}",
                    other
                )))
            }
        };
        Ok(Expr::Literal(value))
    }

    fn convert_binary_op(&self, op: &sql_ast::BinaryOperator) -> Result<BinaryOp> {
        use sql_ast::BinaryOperator as SqlOp;

        match op {
            SqlOp::Plus => Ok(BinaryOp::Add),
            SqlOp::Minus => Ok(BinaryOp::Subtract),
            SqlOp::Multiply => Ok(BinaryOp::Multiply),

            SqlOp::Eq => Ok(BinaryOp::Eq),
            SqlOp::NotEq => Ok(BinaryOp::NotEq),
            SqlOp::Lt => Ok(BinaryOp::Lt),
            SqlOp::LtEq => Ok(BinaryOp::LtEq),
            SqlOp::Gt => Ok(BinaryOp::Gt),
            SqlOp::GtEq => Ok(BinaryOp::GtEq),

            SqlOp::And => Ok(BinaryOp::And),
            SqlOp::Or => Ok(BinaryOp::Or),

            _ => Err(DbError::UnsupportedOperation(format!(
                "Unsupported binary operator: {}",
                op
            ))),
        }
    }
}

impl Default for SqlParserAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_placeholder(p: &str) -> Result<Expr> {
    let index = p
        .strip_prefix('$')
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|n| *n >= 1)
        .ok_or_else(|| DbError::ParseError(format!("Unsupported placeholder '{}', use $1, $2, ...", p)))?;
    Ok(Expr::Placeholder(index - 1))
}

fn extract_table_name(name: &sql_ast::ObjectName) -> Result<String> {
    name.0
        .last()
        .map(|ident| ident.to_string())
        .ok_or_else(|| DbError::ParseError("Invalid table name".into()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_table_with_primary_key() {
        let adapter = SqlParserAdapter::new();
        let stmt = adapter
            .parse_one("CREATE TABLE foo (id INTEGER PRIMARY KEY, name TEXT NOT NULL, data BLOB)")
            .unwrap();

        let Statement::CreateTable(create) = stmt else {
            panic!("Expected CreateTable");
        };
        assert_eq!(create.table_name, "foo");
        assert!(create.columns[0].primary_key);
        assert!(!create.columns[0].nullable);
        assert!(!create.columns[1].nullable);
        assert_eq!(create.columns[2].data_type, DataType::Blob);
    }

    #[test]
    fn test_parse_rejects_float_column() {
        let adapter = SqlParserAdapter::new();
        let err = adapter.parse_one("CREATE TABLE foo (x REAL)").unwrap_err();
        assert!(matches!(err, DbError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_parse_rejects_float_literal() {
        let adapter = SqlParserAdapter::new();
        let err = adapter.parse_one("INSERT INTO foo VALUES (1.5)").unwrap_err();
        assert!(matches!(err, DbError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_parse_insert_with_placeholders() {
        let adapter = SqlParserAdapter::new();
        let stmt = adapter
            .parse_one("INSERT INTO foo (id, name) VALUES ($1, $2), (-3, 'x')")
            .unwrap();

        let Statement::Insert(insert) = stmt else {
            panic!("Expected Insert");
        };
        assert_eq!(insert.columns, Some(vec!["id".to_string(), "name".to_string()]));
        assert_eq!(insert.values[0][0], Expr::Placeholder(0));
        assert_eq!(insert.values[0][1], Expr::Placeholder(1));
        assert_eq!(insert.values[1][0], Expr::Literal(Value::Integer(-3)));
    }

    #[test]
    fn test_parse_select_with_order_and_limit() {
        let adapter = SqlParserAdapter::new();
        let stmt = adapter
            .parse_one("SELECT name, id AS ident FROM foo WHERE id > 1 ORDER BY name DESC LIMIT 5")
            .unwrap();

        let Statement::Query(query) = stmt else {
            panic!("Expected Query");
        };
        assert_eq!(query.table_name, "foo");
        assert_eq!(query.projection.len(), 2);
        assert!(matches!(&query.projection[1], SelectItem::Expr { label, .. } if label == "ident"));
        assert!(query.selection.is_some());
        assert_eq!(query.order_by.len(), 1);
        assert!(query.order_by[0].descending);
        assert_eq!(query.limit, Some(5));
    }

    #[test]
    fn test_parse_update_and_delete() {
        let adapter = SqlParserAdapter::new();
        let stmts = adapter
            .parse("UPDATE foo SET name = 'y' WHERE id = 1; DELETE FROM foo WHERE name IS NULL")
            .unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0], Statement::Update(u) if u.assignments[0].column == "name"));
        assert!(matches!(&stmts[1], Statement::Delete(d) if d.selection.is_some()));
        assert!(!stmts[0].is_read_only());
    }

    #[test]
    fn test_parse_one_rejects_batches() {
        let adapter = SqlParserAdapter::new();
        assert!(adapter.parse_one("SELECT * FROM a; SELECT * FROM b").is_err());
    }
}
