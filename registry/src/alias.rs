use crate::store::RegistryStore;
use crate::types::TableInfo;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

const INDEX_PLACEHOLDER: &str = "{index}";
const TIME_PLACEHOLDER: &str = "{time}";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ResolveError {
    #[error("storage not found for table {0}")]
    StorageNotFound(String),

    #[error("no aliases found for table {0} in the requested window")]
    NoAliasesFound(String),

    #[error("invalid date format {format:?} configured for table {table}")]
    InvalidDateFormat { table: String, format: String },
}

/// Resolves a logical table plus a time window into the concrete index
/// aliases a physical query should address.
#[derive(Clone)]
pub struct AliasResolver {
    store: Arc<RegistryStore>,
}

impl AliasResolver {
    pub fn new(store: Arc<RegistryStore>) -> Self {
        AliasResolver { store }
    }

    /// Computes candidate aliases for `[start, end)`.
    ///
    /// Fuzzy mode skips date math and returns a single wildcard pattern.
    /// Windowed mode walks the range in the table's configured step,
    /// collapses runs of identical date tokens, and keeps only candidates the
    /// live backend actually serves; absent candidates are dropped silently
    /// rather than failing the query for a single missing day.
    pub fn resolve(
        &self,
        table_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        fuzzy: bool,
    ) -> Result<Vec<String>, ResolveError> {
        let table = self
            .store
            .table(table_id)
            .ok_or_else(|| ResolveError::StorageNotFound(table_id.to_string()))?;

        if fuzzy {
            return Ok(vec![render_alias(&table, "*")]);
        }

        let items: Vec<Item<'_>> = StrftimeItems::new(&table.date_format).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            return Err(ResolveError::InvalidDateFormat {
                table: table_id.to_string(),
                format: table.date_format.clone(),
            });
        }

        // A zero step would never advance the cursor; fall back to daily.
        let step_hours = if table.date_step_hours == 0 {
            24
        } else {
            table.date_step_hours
        };
        let step = Duration::hours(i64::from(step_hours));

        let mut tokens: Vec<String> = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let token = cursor.format_with_items(items.iter()).to_string();
            if tokens.last() != Some(&token) {
                tokens.push(token);
            }
            cursor += step;
        }

        let known = self.store.aliases(table_id);
        let mut resolved = Vec::with_capacity(tokens.len());
        for token in tokens {
            let candidate = render_alias(&table, &token);
            match &known {
                Some(set) if set.contains(&candidate) => resolved.push(candidate),
                _ => {
                    tracing::debug!(
                        table = table_id,
                        candidate = candidate.as_str(),
                        "alias candidate absent from catalogue, dropped"
                    );
                }
            }
        }

        if resolved.is_empty() {
            return Err(ResolveError::NoAliasesFound(table_id.to_string()));
        }
        Ok(resolved)
    }
}

fn render_alias(table: &TableInfo, time_token: &str) -> String {
    table
        .alias_format
        .replace(INDEX_PLACEHOLDER, &table.index_name())
        .replace(TIME_PLACEHOLDER, time_token)
}
