//! Reconstructs complete logical rows from an accumulated chunk sequence.
//!
//! The decoders keep each chunk's `QueryResult`/`Row` as a distinct entry;
//! this module is the downstream merge step. It is a pure function over the
//! accumulator so it can be exercised without any transport.

use super::{QueryResult, Response, Row};
use indexmap::IndexMap;

/// Merges identically-keyed partial rows into one logical row per group.
///
/// Rows merge by `name`+`tags` identity within a statement, concatenating
/// `values` in arrival order. A merged row stays `partial` unless the last
/// contributing row was complete, so a truncated sequence remains visibly
/// incomplete. Group and statement ordering follow first appearance.
pub fn merge_partials(response: &Response) -> Response {
    let mut statements: IndexMap<u32, IndexMap<String, Row>> = IndexMap::new();
    let mut errors: IndexMap<u32, String> = IndexMap::new();

    for result in &response.results {
        let rows = statements.entry(result.statement_id).or_default();
        if let Some(error) = &result.error {
            errors.entry(result.statement_id).or_insert_with(|| error.clone());
        }
        for row in &result.series {
            match rows.entry(row.group_key()) {
                indexmap::map::Entry::Occupied(mut entry) => {
                    let merged = entry.get_mut();
                    merged.values.extend(row.values.iter().cloned());
                    merged.partial = row.partial;
                }
                indexmap::map::Entry::Vacant(entry) => {
                    entry.insert(row.clone());
                }
            }
        }
    }

    Response {
        results: statements
            .into_iter()
            .map(|(statement_id, rows)| QueryResult {
                statement_id,
                series: rows.into_values().collect(),
                partial: false,
                error: errors.shift_remove(&statement_id),
            })
            .collect(),
        error: response.error.clone(),
    }
}
