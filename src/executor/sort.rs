// ============================================================================
// src/executor/sort.rs - ORDER BY
// ============================================================================
//
// - Multi-column, stable (rows equal on every key keep primary key order)
// - NULLS LAST for ASC, NULLS FIRST for DESC
// - Values of different types order by type rank, so sorting never fails
//   halfway through and every replica gets the same order
//
// ============================================================================

use crate::core::{Result, Row, Schema, Value};
use crate::executor::Evaluator;
use crate::parser::ast::OrderByExpr;
use std::cmp::Ordering;

/// Sort `rows` in place by `order_by`, evaluating each key once per row.
pub fn sort_rows(
    rows: &mut Vec<Row>,
    order_by: &[OrderByExpr],
    schema: &Schema,
    table: &str,
    evaluator: &Evaluator<'_>,
) -> Result<()> {
    if order_by.is_empty() {
        return Ok(());
    }

    let mut keyed = rows
        .drain(..)
        .map(|row| -> Result<_> {
            let keys = order_by
                .iter()
                .map(|o| evaluator.eval(&o.expr, schema, &row, table))
                .collect::<Result<Vec<_>>>()?;
            Ok((keys, row))
        })
        .collect::<Result<Vec<_>>>()?;

    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, order_by));
    rows.extend(keyed.into_iter().map(|(_, row)| row));
    Ok(())
}

fn compare_keys(a: &[Value], b: &[Value], order_by: &[OrderByExpr]) -> Ordering {
    for ((left, right), order) in a.iter().zip(b.iter()).zip(order_by) {
        let ord = left.compare(right).unwrap_or_else(|_| left.cmp(right));
        let ord = if order.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
