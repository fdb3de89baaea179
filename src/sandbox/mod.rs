//! Evaluates a job's transform against its fetched [`Table`].
//!
//! Per spec.md §9 option (c): rather than embedding a scripting language
//! (no such crate appears anywhere in the retrieval pack, and the corpus's
//! own rule is not to fabricate a dependency that isn't there), a
//! transform is the JSON-array source text of a small, closed pipeline
//! DSL — an ordered list of named operations. The interpreter has no I/O,
//! network, or process primitives in its vocabulary at all, so there is
//! nothing for a capability check to deny; evaluation still runs under a
//! hard wall-clock deadline because a user-supplied operation list (e.g.
//! many `sort`s over a huge table) can still be slow.

use crate::error::SandboxError;
use crate::table::{Cell, Table};
use serde::Deserialize;
use std::time::Duration;

/// One step of a transform pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Operation {
    /// Keep only rows where `column`'s value satisfies `cmp` against `value`.
    Filter {
        column: String,
        cmp: Comparison,
        value: serde_json::Value,
    },
    /// Project down to the listed columns, in the given order.
    Select { columns: Vec<String> },
    /// Sort rows by `column`.
    Sort {
        column: String,
        #[serde(default)]
        order: SortOrder,
    },
    /// Tag the pipeline's grouping key for a following `Aggregate`.
    GroupBy { columns: Vec<String> },
    /// Reduce (optionally grouped) rows to one row per group.
    Aggregate {
        column: String,
        func: AggregateFn,
        #[serde(rename = "as")]
        as_name: String,
    },
    /// Keep only the first `n` rows.
    Limit { n: usize },
    /// Rename a column in place, preserving its position.
    Rename { from: String, to: String },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum AggregateFn {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

/// Parse and run `transform` against `input`, enforcing `timeout` as a
/// hard wall-clock deadline (spec.md §4.3).
///
/// # Errors
///
/// Returns [`SandboxError::Transform`] if `transform` fails to parse or an
/// operation references an unknown column; [`SandboxError::Timeout`] if
/// evaluation exceeds `timeout`.
pub async fn run(transform: &str, input: Table, timeout: Duration) -> Result<Table, SandboxError> {
    let transform = transform.to_string();
    let handle = tokio::task::spawn_blocking(move || evaluate(&transform, input));

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(_join_error)) => Err(SandboxError::Transform {
            cause: "transform task panicked".to_string(),
        }),
        Err(_elapsed) => Err(SandboxError::Timeout),
    }
}

fn evaluate(transform: &str, input: Table) -> Result<Table, SandboxError> {
    let operations: Vec<Operation> =
        serde_json::from_str(transform).map_err(|err| SandboxError::Transform {
            cause: format!("invalid transform: {err}"),
        })?;

    let mut table = input;
    let mut pending_group: Option<Vec<String>> = None;

    for op in operations {
        table = match op {
            Operation::Filter { column, cmp, value } => apply_filter(table, &column, cmp, &value)?,
            Operation::Select { columns } => apply_select(table, &columns)?,
            Operation::Sort { column, order } => apply_sort(table, &column, order)?,
            Operation::GroupBy { columns } => {
                pending_group = Some(columns);
                table
            }
            Operation::Aggregate {
                column,
                func,
                as_name,
            } => apply_aggregate(table, pending_group.take(), &column, func, &as_name)?,
            Operation::Limit { n } => {
                table.rows.truncate(n);
                table
            }
            Operation::Rename { from, to } => apply_rename(table, &from, &to)?,
        };
    }

    Ok(table)
}

fn column_index(table: &Table, name: &str) -> Result<usize, SandboxError> {
    table
        .columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| SandboxError::Transform {
            cause: format!("unknown column: {name}"),
        })
}

fn apply_filter(
    table: Table,
    column: &str,
    cmp: Comparison,
    value: &serde_json::Value,
) -> Result<Table, SandboxError> {
    let idx = column_index(&table, column)?;
    let needle = Cell::from(value);

    let rows = table
        .rows
        .into_iter()
        .filter(|row| matches_comparison(&row[idx], cmp, &needle))
        .collect();

    Ok(Table {
        columns: table.columns,
        rows,
    })
}

fn matches_comparison(cell: &Cell, cmp: Comparison, needle: &Cell) -> bool {
    match cmp {
        Comparison::Eq => cell == needle,
        Comparison::Ne => cell != needle,
        Comparison::Contains => cell
            .to_csv_field()
            .contains(&needle.to_csv_field()),
        Comparison::Gt | Comparison::Gte | Comparison::Lt | Comparison::Lte => {
            match (cell.as_f64(), needle.as_f64()) {
                (Some(a), Some(b)) => match cmp {
                    Comparison::Gt => a > b,
                    Comparison::Gte => a >= b,
                    Comparison::Lt => a < b,
                    Comparison::Lte => a <= b,
                    Comparison::Eq | Comparison::Ne | Comparison::Contains => unreachable!(),
                },
                _ => false,
            }
        }
    }
}

fn apply_select(table: Table, columns: &[String]) -> Result<Table, SandboxError> {
    let indices: Result<Vec<usize>, SandboxError> = columns
        .iter()
        .map(|c| column_index(&table, c))
        .collect();
    let indices = indices?;

    let rows = table
        .rows
        .into_iter()
        .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
        .collect();

    Ok(Table {
        columns: columns.to_vec(),
        rows,
    })
}

fn apply_sort(mut table: Table, column: &str, order: SortOrder) -> Result<Table, SandboxError> {
    let idx = column_index(&table, column)?;

    table.rows.sort_by(|a, b| {
        let ordering = compare_cells(&a[idx], &b[idx]);
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });

    Ok(table)
}

fn compare_cells(a: &Cell, b: &Cell) -> std::cmp::Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.to_csv_field().cmp(&b.to_csv_field()),
    }
}

fn apply_rename(mut table: Table, from: &str, to: &str) -> Result<Table, SandboxError> {
    let idx = column_index(&table, from)?;
    table.columns[idx] = to.to_string();
    Ok(table)
}

fn apply_aggregate(
    table: Table,
    group_columns: Option<Vec<String>>,
    column: &str,
    func: AggregateFn,
    as_name: &str,
) -> Result<Table, SandboxError> {
    let value_idx = column_index(&table, column)?;
    let group_columns = group_columns.unwrap_or_default();
    let group_indices: Result<Vec<usize>, SandboxError> = group_columns
        .iter()
        .map(|c| column_index(&table, c))
        .collect();
    let group_indices = group_indices?;

    let mut groups: Vec<(Vec<Cell>, Vec<f64>)> = Vec::new();
    for row in &table.rows {
        let key: Vec<Cell> = group_indices.iter().map(|&i| row[i].clone()).collect();
        let value = row[value_idx].as_f64().unwrap_or(0.0);

        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => groups.push((key, vec![value])),
        }
    }

    let mut columns = group_columns.clone();
    columns.push(as_name.to_string());

    let rows = groups
        .into_iter()
        .map(|(key, values)| {
            let aggregate = match func {
                AggregateFn::Sum => values.iter().sum::<f64>(),
                AggregateFn::Avg => values.iter().sum::<f64>() / values.len() as f64,
                AggregateFn::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
                AggregateFn::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                AggregateFn::Count => values.len() as f64,
            };

            let mut row = key;
            row.push(match func {
                AggregateFn::Count => Cell::Int(aggregate as i64),
                _ => Cell::Float(aggregate),
            });
            row
        })
        .collect();

    Ok(Table { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_table() -> Table {
        Table::from_json(&json!([
            {"region": "east", "amount": 10},
            {"region": "east", "amount": 20},
            {"region": "west", "amount": 5},
        ]))
        .unwrap()
    }

    #[tokio::test]
    async fn filter_keeps_matching_rows() {
        let transform = r#"[{"op":"filter","column":"region","cmp":"eq","value":"east"}]"#;
        let result = run(transform, sample_table(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn group_by_and_aggregate_sums_per_group() {
        let transform = r#"[
            {"op":"group_by","columns":["region"]},
            {"op":"aggregate","column":"amount","func":"sum","as":"total"}
        ]"#;
        let result = run(transform, sample_table(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["region", "total"]);
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn limit_truncates_rows() {
        let transform = r#"[{"op":"limit","n":1}]"#;
        let result = run(transform, sample_table(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn unknown_column_is_a_transform_error() {
        let transform = r#"[{"op":"select","columns":["nope"]}]"#;
        let err = run(transform, sample_table(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Transform { .. }));
    }

    #[tokio::test]
    async fn invalid_json_transform_is_rejected() {
        let err = run("not json", sample_table(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Transform { .. }));
    }

    #[tokio::test]
    async fn rename_preserves_column_position_and_data() {
        let transform = r#"[{"op":"rename","from":"region","to":"area"}]"#;
        let result = run(transform, sample_table(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["area", "amount"]);
        assert_eq!(result.len(), 3);
    }
}
