use std::{collections::BTreeMap, fmt};

use async_graphql::SimpleObject;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Integer,
    Float,
    Text,
    Boolean,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Column {
    pub(crate) name: String,
    pub(crate) kind: ColumnKind,
}

impl Column {
    pub(crate) fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl Cell {
    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(v) => v.parse().ok(),
            Self::Null | Self::Bool(_) => None,
        }
    }

    pub(crate) fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(v) => Some(v.round() as i64),
            Self::Text(v) => v.parse().ok(),
            Self::Null | Self::Bool(_) => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{}", round2(*v)),
            Self::Text(v) => f.write_str(v),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Ordered rows with named, typed columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Table {
    pub(crate) columns: Vec<Column>,
    pub(crate) rows: Vec<Vec<Cell>>,
}

impl Table {
    pub(crate) fn new(columns: Vec<Column>, rows: Vec<Vec<Cell>>) -> Self {
        Self { columns, rows }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    /// Index of `name`, ignoring case since the warehouse upper-cases
    /// unquoted identifiers.
    pub(crate) fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub(crate) fn column(&self, name: &str) -> impl Iterator<Item = &Cell> {
        let idx = self.column_index(name);
        self.rows
            .iter()
            .filter_map(move |row| idx.and_then(|i| row.get(i)))
    }

    pub(crate) fn sum(&self, name: &str) -> i64 {
        self.column(name).filter_map(Cell::as_i64).sum()
    }

    /// Appends a column computed from each row.
    pub(crate) fn push_column(&mut self, column: Column, f: impl Fn(&[Cell]) -> Cell) {
        for row in &mut self.rows {
            let cell = f(row);
            row.push(cell);
        }
        self.columns.push(column);
    }

    /// Keeps only the named columns, in the given order. Unknown names are
    /// dropped.
    pub(crate) fn select(&self, names: &[&str]) -> Table {
        let picked: Vec<usize> = names
            .iter()
            .filter_map(|name| self.column_index(name))
            .collect();
        Table {
            columns: picked.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| {
                    picked
                        .iter()
                        .map(|&i| row.get(i).cloned().unwrap_or(Cell::Null))
                        .collect()
                })
                .collect(),
        }
    }
}

/// `numerator / denominator`, or 0 when nothing was counted.
pub(crate) fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Headline indicators of the analytics query.
#[derive(Clone, Copy, Debug, Default, PartialEq, SimpleObject)]
pub(crate) struct Overview {
    pub(crate) searches: i64,
    pub(crate) sessions: i64,
    pub(crate) clicks: i64,
    pub(crate) ctr: f64,
    pub(crate) kg_result_rate: f64,
}

impl Overview {
    /// Sums the daily rows, weighting per-day rates by that day's searches.
    pub(crate) fn from_table(table: &Table) -> Self {
        let searches = table.sum("SEARCHES");
        Self {
            searches,
            sessions: table.sum("SESSIONS"),
            clicks: table.sum("CLICKS"),
            ctr: weighted_rate(table, "CTR", "SEARCHES"),
            kg_result_rate: weighted_rate(table, "KG_RESULT_RATE", "SEARCHES"),
        }
    }
}

/// Average of `rate` weighted by `weight`, rounded to two decimals.
pub(crate) fn weighted_rate(table: &Table, rate: &str, weight: &str) -> f64 {
    let (Some(r), Some(w)) = (table.column_index(rate), table.column_index(weight)) else {
        return 0.0;
    };
    let (dot, total) = table.rows.iter().fold((0.0, 0.0), |(dot, total), row| {
        let rate = row.get(r).and_then(Cell::as_f64).unwrap_or(0.0);
        let weight = row.get(w).and_then(Cell::as_f64).unwrap_or(0.0);
        (dot + rate * weight, total + weight)
    });
    round2(ratio(dot, total))
}

#[derive(Clone, Debug, Default, PartialEq, SimpleObject)]
pub(crate) struct DailyPoint {
    pub(crate) date: String,
    pub(crate) searches: i64,
    pub(crate) sessions: i64,
    pub(crate) clicks: i64,
}

/// Per-date totals, ordered by date.
pub(crate) fn daily_series(table: &Table) -> Vec<DailyPoint> {
    let Some(date) = table.column_index("DATE") else {
        return Vec::new();
    };
    let idx = |name| table.column_index(name);
    let (searches, sessions, clicks) = (idx("SEARCHES"), idx("SESSIONS"), idx("CLICKS"));
    let value = |row: &[Cell], i: Option<usize>| {
        i.and_then(|i| row.get(i))
            .and_then(Cell::as_i64)
            .unwrap_or(0)
    };

    let mut by_date: BTreeMap<String, DailyPoint> = BTreeMap::new();
    for row in &table.rows {
        let key = row.get(date).map(ToString::to_string).unwrap_or_default();
        let point = by_date.entry(key.clone()).or_insert_with(|| DailyPoint {
            date: key,
            ..DailyPoint::default()
        });
        point.searches += value(row, searches);
        point.sessions += value(row, sessions);
        point.clicks += value(row, clicks);
    }
    by_date.into_values().collect()
}
