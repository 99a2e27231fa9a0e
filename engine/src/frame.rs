//! Small typed frame the direct-query pipeline operates on.
//!
//! A frame carries named dimension columns plus the fixed value/time columns.
//! Rows are owned and operations return new frames (or mutate in place where
//! the pipeline allows it); per-cluster loads for one query bind in arbitrary
//! order, so every operation here is insensitive to input row order up to the
//! final time sort.

use crate::errors::EngineError;
use backends::kv::RawRow;
use indexmap::IndexMap;
use serde::Deserialize;

pub const VALUE_COLUMN: &str = "value";
pub const TIME_COLUMN: &str = "time";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOp {
    Eq,
    Ne,
}

/// One dimension-equality condition; `values` is the accepted (Eq) or
/// rejected (Ne) value set.
#[derive(Clone, Debug, Deserialize)]
pub struct DimCondition {
    pub dimension: String,
    pub operator: ConditionOp,
    pub values: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Sum,
    #[serde(alias = "avg")]
    Mean,
    Min,
    Max,
    Count,
}

impl AggregateFunction {
    fn reduce(&self, values: &[f64]) -> f64 {
        match self {
            AggregateFunction::Sum => values.iter().sum(),
            AggregateFunction::Mean => values.iter().sum::<f64>() / values.len() as f64,
            AggregateFunction::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AggregateFunction::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggregateFunction::Count => values.len() as f64,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameRow {
    /// Dimension values, aligned with `Frame::dims`.
    pub dims: Vec<String>,
    pub value: f64,
    pub time: i64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    pub dims: Vec<String>,
    pub rows: Vec<FrameRow>,
}

impl Frame {
    /// Empty frame with the declared dimension columns.
    pub fn new(dims: Vec<String>) -> Self {
        Frame { dims, rows: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Vertically appends another frame's rows. Both sides must share this
    /// frame's schema; loads built via `from_raw_rows` against the same
    /// dimension list always do.
    pub fn bind(&mut self, other: Frame) {
        self.rows.extend(other.rows);
    }

    /// Parses raw tabular rows into the declared schema. The value column
    /// accepts numbers or numeric strings; dimension columns stringify and
    /// default to empty when absent.
    pub fn from_raw_rows(dims: &[String], raw: &[RawRow]) -> Result<Frame, EngineError> {
        let mut frame = Frame::new(dims.to_vec());
        for row in raw {
            let value = parse_f64(row.get(VALUE_COLUMN)).ok_or_else(|| {
                EngineError::InvalidColumn {
                    column: VALUE_COLUMN.into(),
                    message: format!("{:?}", row.get(VALUE_COLUMN)),
                }
            })?;
            let time = parse_i64(row.get(TIME_COLUMN)).ok_or_else(|| {
                EngineError::InvalidColumn {
                    column: TIME_COLUMN.into(),
                    message: format!("{:?}", row.get(TIME_COLUMN)),
                }
            })?;
            let dims = dims
                .iter()
                .map(|dim| stringify(row.get(dim)))
                .collect();
            frame.rows.push(FrameRow { dims, value, time });
        }
        Ok(frame)
    }

    /// Closed time-range filter: `start <= time <= end` (seconds).
    pub fn filter_time(mut self, start: i64, end: i64) -> Frame {
        self.rows.retain(|row| row.time >= start && row.time <= end);
        self
    }

    /// Disjunction of conjunctions: each OR branch filters independently and
    /// the non-empty branch results are vertically combined. A row matching
    /// several branches appears once per branch; duplicates are accepted, not
    /// removed.
    pub fn filter_conditions(self, branches: &[Vec<DimCondition>]) -> Frame {
        if branches.is_empty() {
            return self;
        }

        let mut merged = Frame::new(self.dims.clone());
        for branch in branches {
            let kept: Vec<FrameRow> = self
                .rows
                .iter()
                .filter(|row| branch.iter().all(|cond| self.matches(row, cond)))
                .cloned()
                .collect();
            merged.rows.extend(kept);
        }
        merged
    }

    fn matches(&self, row: &FrameRow, cond: &DimCondition) -> bool {
        let Some(index) = self.dims.iter().position(|dim| *dim == cond.dimension) else {
            // A condition on an undeclared dimension matches nothing.
            return false;
        };
        let contained = cond.values.iter().any(|value| *value == row.dims[index]);
        match cond.operator {
            ConditionOp::Eq => contained,
            ConditionOp::Ne => !contained,
        }
    }

    /// Rounds the time column down to the window size (seconds). A zero
    /// window leaves times untouched.
    pub fn round_time(&mut self, window_secs: i64) {
        if window_secs <= 0 {
            return;
        }
        for row in &mut self.rows {
            row.time = row.time.div_euclid(window_secs) * window_secs;
        }
    }

    /// Groups by the named dimension columns plus the time column and
    /// reduces the value column. Group order follows first appearance; the
    /// output frame carries only the grouping dimensions.
    pub fn group_aggregate(&self, key_dims: &[String], function: AggregateFunction) -> Frame {
        let indices: Vec<Option<usize>> = key_dims
            .iter()
            .map(|key| self.dims.iter().position(|dim| dim == key))
            .collect();

        let mut groups: IndexMap<(Vec<String>, i64), Vec<f64>> = IndexMap::new();
        for row in &self.rows {
            let key: Vec<String> = indices
                .iter()
                .map(|index| match index {
                    Some(i) => row.dims[*i].clone(),
                    None => String::new(),
                })
                .collect();
            groups.entry((key, row.time)).or_default().push(row.value);
        }

        let mut out = Frame::new(key_dims.to_vec());
        for ((dims, time), values) in groups {
            out.rows.push(FrameRow {
                dims,
                value: function.reduce(&values),
                time,
            });
        }
        out
    }

    /// Stable ascending sort on the time column.
    pub fn sort_by_time(&mut self) {
        self.rows.sort_by_key(|row| row.time);
    }
}

fn parse_f64(value: Option<&serde_json::Value>) -> Option<f64> {
    match value? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_i64(value: Option<&serde_json::Value>) -> Option<i64> {
    match value? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn stringify(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}
