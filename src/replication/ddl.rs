//! MySQL statement text for the corrective actions of a migration.

pub use crate::db::mysql::quote;
use crate::models::{
    schema::{ColumnDefinition, ForeignKeyRef, IndexDefinition},
    value::quote_string,
};

const DEFAULT_GENERATED: &str = "DEFAULT_GENERATED";

/// Where an added column goes relative to the existing target columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnPosition {
    First,
    After(String),
}

impl ColumnPosition {
    pub fn to_sql(&self) -> String {
        match self {
            ColumnPosition::First => "FIRST".to_string(),
            ColumnPosition::After(column) => format!("AFTER {}", quote(column)),
        }
    }
}

/// Places `column` after the nearest preceding source column that already
/// exists in the target, or first when there is none.
///
/// Returns `None` when `column` is not part of the source order.
pub fn resolve_position(
    source_order: &[String],
    target_order: &[String],
    column: &str,
) -> Option<ColumnPosition> {
    let index = source_order.iter().position(|c| c == column)?;

    let position = source_order[..index]
        .iter()
        .rev()
        .find(|previous| target_order.contains(previous))
        .map_or(ColumnPosition::First, |previous| {
            ColumnPosition::After(previous.clone())
        });

    Some(position)
}

fn is_timestamp_sentinel(default: &str) -> bool {
    let lowered = default.trim().to_lowercase();
    lowered == "now()"
        || lowered == "current_timestamp"
        || (lowered.starts_with("current_timestamp(") && lowered.ends_with(')'))
        || lowered == "localtimestamp"
        || lowered == "localtime"
}

/// Column definition as it follows the column name in ADD/MODIFY clauses.
pub fn column_definition(column: &ColumnDefinition) -> String {
    let mut definition = column.data_type.clone();

    if !column.is_nullable {
        definition.push_str(" NOT NULL");
    }

    let generated_default = column
        .extra
        .split_whitespace()
        .any(|word| word.eq_ignore_ascii_case(DEFAULT_GENERATED));

    if let Some(default) = &column.default {
        if is_timestamp_sentinel(default) {
            definition.push_str(&format!(" DEFAULT {}", default));
        } else if generated_default {
            definition.push_str(&format!(" DEFAULT ({})", default));
        } else {
            definition.push_str(&format!(" DEFAULT {}", quote_string(default)));
        }
    }

    let extra: Vec<&str> = column
        .extra
        .split_whitespace()
        .filter(|word| !word.eq_ignore_ascii_case(DEFAULT_GENERATED))
        .collect();
    if !extra.is_empty() {
        definition.push(' ');
        definition.push_str(&extra.join(" "));
    }

    definition
}

pub fn add_column(table: &str, column: &ColumnDefinition, position: Option<&ColumnPosition>) -> String {
    let mut statement = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote(table),
        quote(&column.name),
        column_definition(column)
    );
    if let Some(position) = position {
        statement.push(' ');
        statement.push_str(&position.to_sql());
    }
    statement
}

pub fn drop_column(table: &str, column: &str) -> String {
    format!("ALTER TABLE {} DROP COLUMN {}", quote(table), quote(column))
}

/// MODIFY restates the whole column, so `column` must carry every attribute
/// the column should keep, not only the new type.
pub fn modify_column(table: &str, column: &ColumnDefinition) -> String {
    format!(
        "ALTER TABLE {} MODIFY COLUMN {} {}",
        quote(table),
        quote(&column.name),
        column_definition(column)
    )
}

pub fn add_foreign_key(table: &str, constraint: &str, fk: &ForeignKeyRef) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({})",
        quote(table),
        quote(constraint),
        quote(&fk.column),
        quote(&fk.referenced_table),
        quote(&fk.referenced_column)
    )
}

pub fn drop_foreign_key(table: &str, constraint: &str) -> String {
    format!(
        "ALTER TABLE {} DROP FOREIGN KEY {}",
        quote(table),
        quote(constraint)
    )
}

/// `fk_<table>_<column>`
pub fn foreign_key_name(table: &str, fk: &ForeignKeyRef) -> String {
    format!("fk_{}_{}", table, fk.column)
}

/// `fk_<table>_<column>_<referenced table>`, used for keys restored after creation.
pub fn deferred_foreign_key_name(table: &str, fk: &ForeignKeyRef) -> String {
    format!("fk_{}_{}_{}", table, fk.column, fk.referenced_table)
}

pub fn create_index(table: &str, index: &IndexDefinition) -> String {
    let columns: Vec<String> = index.columns.iter().map(|c| quote(c)).collect();
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.is_unique { "UNIQUE " } else { "" },
        quote(&index.name),
        quote(table),
        columns.join(", ")
    )
}

pub fn drop_index(table: &str, index_name: &str) -> String {
    format!("DROP INDEX {} ON {}", quote(index_name), quote(table))
}

/// Removes every foreign-key clause from a `SHOW CREATE TABLE` statement and
/// repairs the commas left dangling by the removal.
pub fn strip_foreign_keys(statement: &str) -> String {
    let kept: Vec<&str> = statement
        .lines()
        .filter(|line| !line.to_uppercase().contains("FOREIGN KEY"))
        .collect();

    collapse_commas(&kept.join("\n"))
}

/// Rewrites `, )` to `)` and `, ,` to `,`, ignoring whitespace between them.
fn collapse_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            match chars.get(j) {
                Some(')') => {
                    // The whitespace run is dropped together with the comma.
                    out.push(')');
                    i = j + 1;
                    continue;
                }
                Some(',') => {
                    // Keep scanning from the second comma.
                    i = j;
                    continue;
                }
                _ => {}
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    out
}
