use crate::table::{Row, RowExt, Table, Value};
use crate::utils::split_list;
use log::warn;
use std::collections::HashMap;

const PART_SEP: &str = "::";
const LIST_SEP: char = ';';

/// Source-specific reshaping applied to a raw file before identity building.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    /// The first `n` lines form one header, joined column-wise by a space.
    Stack(usize),
    /// Long label/value rows into one column per label.
    Pivot { label: String, value: String },
    /// Listed columns into `variable`/`value` rows.
    Melt {
        variable: String,
        value: String,
        columns: Vec<String>,
    },
    /// A date-range cell keeps its first part.
    DateSplit { column: String, delimiter: String },
    /// Keep rows whose column is one of `values`.
    FilterCol { column: String, values: Vec<String> },
}

impl Transform {
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.trim().split(PART_SEP).collect();
        let transform = match parts.as_slice() {
            ["Stack", n] => Transform::Stack(n.trim().parse().ok()?),
            ["Pivot", label, value] => Transform::Pivot {
                label: label.trim().to_string(),
                value: value.trim().to_string(),
            },
            ["Melt", variable, value, columns] => Transform::Melt {
                variable: variable.trim().to_string(),
                value: value.trim().to_string(),
                columns: split_list(columns),
            },
            ["DateSplit", column, delimiter] => Transform::DateSplit {
                column: column.trim().to_string(),
                delimiter: delimiter.to_string(),
            },
            ["FilterCol", column, values] => Transform::FilterCol {
                column: column.trim().to_string(),
                values: split_list(values),
            },
            _ => return None,
        };
        Some(transform)
    }

    pub fn apply(&self, table: Table) -> Table {
        match self {
            Transform::Stack(_) => table,
            Transform::Pivot { label, value } => pivot(table, label, value),
            Transform::Melt {
                variable,
                value,
                columns,
            } => melt(table, variable, value, columns),
            Transform::DateSplit { column, delimiter } => date_split(table, column, delimiter),
            Transform::FilterCol { column, values } => {
                let mut table = table;
                table
                    .rows
                    .retain(|r| values.iter().any(|v| *v == r.rendered(column)));
                table
            }
        }
    }
}

/// `;`-separated list of transforms; unknown entries are skipped.
pub fn parse_transforms(cell: &str) -> Vec<Transform> {
    cell.split(LIST_SEP)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter_map(|t| {
            let parsed = Transform::parse(t);
            if parsed.is_none() {
                warn!("Ignoring unknown transform '{}'", t);
            }
            parsed
        })
        .collect()
}

pub fn header_rows(transforms: &[Transform]) -> usize {
    transforms
        .iter()
        .find_map(|t| match t {
            Transform::Stack(n) => Some((*n).max(1)),
            _ => None,
        })
        .unwrap_or(1)
}

/// Turns trimmed lines into a table. With a stacked header, blank header
/// cells inherit their left neighbour before the lines are joined.
pub fn grid_to_table(mut grid: Vec<Vec<String>>, header_rows: usize) -> Table {
    let header_rows = header_rows.min(grid.len());
    if header_rows == 0 {
        return Table::default();
    }
    let body = grid.split_off(header_rows);
    let width = grid.iter().chain(body.iter()).map(Vec::len).max().unwrap_or(0);

    let mut headers = vec![String::new(); width];
    for line in &grid {
        let mut carried = String::new();
        for (i, header) in headers.iter_mut().enumerate() {
            let cell = line.get(i).map(|c| c.trim()).unwrap_or("");
            if !cell.is_empty() {
                carried = cell.to_string();
            }
            let piece = if header_rows > 1 { carried.as_str() } else { cell };
            if !piece.is_empty() {
                if !header.is_empty() {
                    header.push(' ');
                }
                header.push_str(piece);
            }
        }
    }
    for (i, header) in headers.iter_mut().enumerate() {
        if header.is_empty() {
            *header = format!("Unnamed {}", i);
        }
    }

    let records = body
        .into_iter()
        .filter(|line| line.iter().any(|c| !c.trim().is_empty()))
        .map(|mut line| {
            line.resize(width, String::new());
            line
        })
        .collect();
    Table::from_records(headers, records)
}

fn pivot(table: Table, label: &str, value: &str) -> Table {
    let id_columns: Vec<String> = table
        .columns
        .iter()
        .filter(|c| *c != label && *c != value)
        .cloned()
        .collect();

    let mut out = Table::new(id_columns.clone());
    let mut positions: HashMap<Vec<String>, usize> = HashMap::new();
    for row in table.rows {
        let key: Vec<String> = id_columns.iter().map(|c| row.rendered(c)).collect();
        let idx = *positions.entry(key).or_insert_with(|| {
            let base: Row = id_columns
                .iter()
                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or_default()))
                .collect();
            out.push(base);
            out.len() - 1
        });

        let column = row.rendered(label);
        if column.is_empty() {
            continue;
        }
        out.ensure_column(&column);
        let incoming = row.get(value).cloned().unwrap_or_default();
        let target = &mut out.rows[idx];
        let merged = match (target.number(&column), incoming.as_f64()) {
            (Some(a), Some(b)) => Value::Number(a + b),
            _ => incoming,
        };
        target.insert(column, merged);
    }
    out
}

fn melt(table: Table, variable: &str, value: &str, columns: &[String]) -> Table {
    let id_columns: Vec<String> = table
        .columns
        .iter()
        .filter(|c| !columns.contains(c))
        .cloned()
        .collect();

    let mut out_columns = id_columns.clone();
    out_columns.push(variable.to_string());
    out_columns.push(value.to_string());
    let mut out = Table::new(out_columns);

    for row in &table.rows {
        for column in columns.iter().filter(|c| table.has_column(c)) {
            let mut melted: Row = id_columns
                .iter()
                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or_default()))
                .collect();
            melted.insert(variable.to_string(), Value::Text(column.clone()));
            melted.insert(
                value.to_string(),
                row.get(column).cloned().unwrap_or_default(),
            );
            out.push(melted);
        }
    }
    out
}

fn date_split(mut table: Table, column: &str, delimiter: &str) -> Table {
    for row in &mut table.rows {
        let cell = row.rendered(column);
        if let Some((first, _)) = cell.split_once(delimiter) {
            row.insert(column.to_string(), Value::text(first.trim()));
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(lines: &[&[&str]]) -> Vec<Vec<String>> {
        lines
            .iter()
            .map(|l| l.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_parse_list_skips_unknown() {
        let transforms = parse_transforms("Stack::2; Bogus::x ;FilterCol::Country::US|CA");
        assert_eq!(transforms.len(), 2);
        assert_eq!(header_rows(&transforms), 2);
        assert_eq!(header_rows(&[]), 1);
    }

    #[test]
    fn test_stacked_header_inherits_left_cells() {
        let table = grid_to_table(
            grid(&[
                &["", "Video", ""],
                &["Date", "Views", "Completes"],
                &["2023-01-01", "5", "2"],
                &["", "", ""],
            ]),
            2,
        );
        assert_eq!(table.columns, vec!["Date", "Video Views", "Video Completes"]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_pivot_sums_duplicate_labels() {
        let table = grid_to_table(
            grid(&[
                &["Date", "Metric", "Amount"],
                &["2023-01-01", "Clicks", "3"],
                &["2023-01-01", "Impressions", "100"],
                &["2023-01-01", "Clicks", "2"],
                &["2023-01-02", "Clicks", "7"],
            ]),
            1,
        );
        let pivoted = Transform::parse("Pivot::Metric::Amount").unwrap().apply(table);

        assert_eq!(pivoted.len(), 2);
        assert_eq!(pivoted.rows[0].number("Clicks"), Some(5.0));
        assert_eq!(pivoted.rows[0].number("Impressions"), Some(100.0));
        assert_eq!(pivoted.rows[1].number("Clicks"), Some(7.0));
    }

    #[test]
    fn test_melt_and_date_split() {
        let table = grid_to_table(
            grid(&[
                &["Range", "Mobile", "Desktop"],
                &["2023-01-01 to 2023-01-07", "4", "6"],
            ]),
            1,
        );
        let melted = Transform::parse("Melt::Device::Clicks::Mobile|Desktop")
            .unwrap()
            .apply(table);
        let split = Transform::parse("DateSplit::Range::to").unwrap().apply(melted);

        assert_eq!(split.len(), 2);
        assert_eq!(split.rows[1].rendered("Device"), "Desktop");
        assert_eq!(split.rows[1].number("Clicks"), Some(6.0));
        assert_eq!(split.rows[0].rendered("Range"), "2023-01-01");
    }
}
