//! Structural comparison of two table snapshots.
//!
//! Everything here is pure: both snapshots are fetched beforehand, so the
//! comparison can be exercised with literal fixtures.

use std::collections::{HashMap, HashSet};

use crate::models::{
    plan::SchemaDifference,
    schema::{ColumnDefinition, ForeignKeyRef, TableSchema},
};

/// Every difference that would have to be applied to `target` to match `source`.
pub fn diff(source: &TableSchema, target: &TableSchema) -> Vec<SchemaDifference> {
    let mut differences = diff_columns(&source.columns, &target.columns);
    differences.extend(diff_foreign_keys(&source.foreign_keys, &target.foreign_keys));
    differences.extend(diff_indexes(source, target));
    differences
}

pub fn diff_columns(
    source: &[ColumnDefinition],
    target: &[ColumnDefinition],
) -> Vec<SchemaDifference> {
    let mut differences = Vec::new();

    let target_by_name: HashMap<&str, &ColumnDefinition> =
        target.iter().map(|c| (c.name.as_str(), c)).collect();
    let source_names: HashSet<&str> = source.iter().map(|c| c.name.as_str()).collect();

    for column in source {
        if !target_by_name.contains_key(column.name.as_str()) {
            differences.push(SchemaDifference::MissingColumn(column.clone()));
        }
    }

    for column in target {
        if !source_names.contains(column.name.as_str()) {
            differences.push(SchemaDifference::ExtraColumn(column.name.clone()));
        }
    }

    for source_col in source {
        let Some(target_col) = target_by_name.get(source_col.name.as_str()) else {
            continue;
        };

        if source_col.data_type != target_col.data_type {
            differences.push(SchemaDifference::TypeMismatch {
                column: source_col.name.clone(),
                source_type: source_col.data_type.clone(),
                target_type: target_col.data_type.clone(),
            });
        }

        if source_col.is_nullable != target_col.is_nullable {
            differences.push(SchemaDifference::NullabilityMismatch {
                column: source_col.name.clone(),
                source_nullable: source_col.is_nullable,
                target_nullable: target_col.is_nullable,
            });
        }

        if source_col.default != target_col.default {
            differences.push(SchemaDifference::DefaultMismatch {
                column: source_col.name.clone(),
                source_default: source_col.default.clone(),
                target_default: target_col.default.clone(),
            });
        }
    }

    let source_order: Vec<String> = source.iter().map(|c| c.name.clone()).collect();
    let target_order: Vec<String> = target.iter().map(|c| c.name.clone()).collect();
    if source_order != target_order {
        differences.push(SchemaDifference::ColumnOrderMismatch {
            source_order,
            target_order,
        });
    }

    differences
}

/// Foreign keys compared as `(column, referenced table, referenced column)` sets.
pub fn diff_foreign_keys(
    source: &[ForeignKeyRef],
    target: &[ForeignKeyRef],
) -> Vec<SchemaDifference> {
    let source_keys: HashSet<_> = source.iter().map(ForeignKeyRef::key).collect();
    let target_keys: HashSet<_> = target.iter().map(ForeignKeyRef::key).collect();

    let mut differences = Vec::new();
    let mut seen = HashSet::new();
    for fk in source {
        if !target_keys.contains(&fk.key()) && seen.insert(fk.key()) {
            differences.push(SchemaDifference::MissingForeignKey(fk.clone()));
        }
    }

    seen.clear();
    for fk in target {
        if !source_keys.contains(&fk.key()) && seen.insert(fk.key()) {
            differences.push(SchemaDifference::ExtraForeignKey(fk.clone()));
        }
    }

    differences
}

/// Indexes compared by name. `PRIMARY` is reported like any other index.
pub fn diff_indexes(source: &TableSchema, target: &TableSchema) -> Vec<SchemaDifference> {
    let missing = source
        .indexes
        .values()
        .filter(|idx| !target.indexes.contains_key(&idx.name))
        .cloned()
        .map(SchemaDifference::MissingIndex);

    let extra = target
        .indexes
        .values()
        .filter(|idx| !source.indexes.contains_key(&idx.name))
        .cloned()
        .map(SchemaDifference::ExtraIndex);

    missing.chain(extra).collect()
}

/// Foreign keys present in `source` but not in `target`.
pub fn missing_foreign_keys<'a>(
    source: &'a [ForeignKeyRef],
    target: &[ForeignKeyRef],
) -> Vec<&'a ForeignKeyRef> {
    let mut seen = HashSet::new();
    let mut missing = Vec::new();
    for fk in source {
        if !target.iter().any(|t| t.matches(fk)) && seen.insert(fk.key()) {
            missing.push(fk);
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schema::IndexDefinition;
    use std::collections::BTreeMap;

    fn col(name: &str, data_type: &str, nullable: bool, default: Option<&str>) -> ColumnDefinition {
        ColumnDefinition {
            name: name.to_string(),
            data_type: data_type.to_string(),
            is_nullable: nullable,
            default: default.map(str::to_string),
            extra: String::new(),
            ordinal: 0,
        }
    }

    fn fk(column: &str, table: &str, constraint: &str) -> ForeignKeyRef {
        ForeignKeyRef {
            column: column.to_string(),
            referenced_table: table.to_string(),
            referenced_column: "id".to_string(),
            constraint_name: constraint.to_string(),
        }
    }

    fn index(name: &str, columns: &[&str], unique: bool) -> (String, IndexDefinition) {
        (
            name.to_string(),
            IndexDefinition {
                name: name.to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
                is_unique: unique,
            },
        )
    }

    fn table(
        columns: Vec<ColumnDefinition>,
        foreign_keys: Vec<ForeignKeyRef>,
        indexes: Vec<(String, IndexDefinition)>,
    ) -> TableSchema {
        TableSchema {
            table_name: "users".to_string(),
            columns,
            foreign_keys,
            indexes: indexes.into_iter().collect::<BTreeMap<_, _>>(),
            row_count: 0,
        }
    }

    fn users_source() -> TableSchema {
        table(
            vec![
                col("id", "int", false, None),
                col("name", "varchar(100)", true, None),
                col("email", "varchar(255)", false, None),
                col("created_at", "timestamp", true, Some("CURRENT_TIMESTAMP")),
            ],
            vec![fk("team_id", "teams", "users_ibfk_1")],
            vec![
                index("PRIMARY", &["id"], true),
                index("idx_name_email", &["name", "email"], false),
            ],
        )
    }

    fn missing_columns(diffs: &[SchemaDifference]) -> Vec<String> {
        diffs
            .iter()
            .filter_map(|d| match d {
                SchemaDifference::MissingColumn(c) => Some(c.name.clone()),
                _ => None,
            })
            .collect()
    }

    fn extra_columns(diffs: &[SchemaDifference]) -> Vec<String> {
        diffs
            .iter()
            .filter_map(|d| match d {
                SchemaDifference::ExtraColumn(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_identical_schemas_have_no_differences() {
        let schema = users_source();
        assert!(diff(&schema, &schema).is_empty());
    }

    #[test]
    fn test_missing_and_extra_columns() {
        let source = users_source();
        let target = table(
            vec![
                col("id", "int", false, None),
                col("name", "varchar(100)", true, None),
                col("legacy_flag", "tinyint(1)", true, None),
            ],
            source.foreign_keys.clone(),
            source.indexes.clone().into_iter().collect(),
        );

        let diffs = diff(&source, &target);
        assert_eq!(missing_columns(&diffs), vec!["email", "created_at"]);
        assert_eq!(extra_columns(&diffs), vec!["legacy_flag"]);
        assert!(diffs
            .iter()
            .any(|d| matches!(d, SchemaDifference::ColumnOrderMismatch { .. })));
    }

    #[test]
    fn test_one_column_can_yield_three_differences() {
        let source = table(vec![col("age", "int", false, Some("0"))], vec![], vec![]);
        let target = table(vec![col("age", "bigint", true, None)], vec![], vec![]);

        let diffs = diff(&source, &target);
        assert_eq!(diffs.len(), 3);
        assert_eq!(
            diffs[0],
            SchemaDifference::TypeMismatch {
                column: "age".to_string(),
                source_type: "int".to_string(),
                target_type: "bigint".to_string(),
            }
        );
        assert!(matches!(
            diffs[1],
            SchemaDifference::NullabilityMismatch {
                source_nullable: false,
                target_nullable: true,
                ..
            }
        ));
        assert!(matches!(diffs[2], SchemaDifference::DefaultMismatch { .. }));
    }

    #[test]
    fn test_column_order_is_a_single_entry() {
        let source = table(
            vec![col("a", "int", true, None), col("b", "int", true, None)],
            vec![],
            vec![],
        );
        let target = table(
            vec![col("b", "int", true, None), col("a", "int", true, None)],
            vec![],
            vec![],
        );

        let diffs = diff(&source, &target);
        assert_eq!(
            diffs,
            vec![SchemaDifference::ColumnOrderMismatch {
                source_order: vec!["a".to_string(), "b".to_string()],
                target_order: vec!["b".to_string(), "a".to_string()],
            }]
        );
    }

    #[test]
    fn test_foreign_keys_ignore_constraint_names() {
        let source = vec![fk("team_id", "teams", "users_ibfk_1")];
        let target = vec![fk("team_id", "teams", "fk_users_team_id")];
        assert!(diff_foreign_keys(&source, &target).is_empty());

        let target = vec![fk("org_id", "orgs", "fk_users_org_id")];
        let diffs = diff_foreign_keys(&source, &target);
        assert_eq!(diffs.len(), 2);
        assert!(matches!(&diffs[0], SchemaDifference::MissingForeignKey(f) if f.column == "team_id"));
        assert!(matches!(&diffs[1], SchemaDifference::ExtraForeignKey(f) if f.column == "org_id"));
    }

    #[test]
    fn test_index_differences_carry_members() {
        let source = users_source();
        let target = table(
            source.columns.clone(),
            source.foreign_keys.clone(),
            vec![index("idx_legacy", &["name"], false)],
        );

        let diffs = diff(&source, &target);
        let missing: Vec<&IndexDefinition> = diffs
            .iter()
            .filter_map(|d| match d {
                SchemaDifference::MissingIndex(idx) => Some(idx),
                _ => None,
            })
            .collect();
        assert_eq!(missing.len(), 2);
        assert!(missing.iter().any(|idx| idx.is_primary()));
        let composite = missing.iter().find(|idx| idx.name == "idx_name_email").unwrap();
        assert_eq!(composite.columns, vec!["name", "email"]);
        assert!(diffs
            .iter()
            .any(|d| matches!(d, SchemaDifference::ExtraIndex(idx) if idx.name == "idx_legacy")));
    }

    #[test]
    fn test_missing_set_mirrors_extra_set_when_reversed() {
        let a = users_source();
        let b = table(
            vec![col("id", "int", false, None), col("nickname", "varchar(20)", true, None)],
            vec![fk("org_id", "orgs", "b_ibfk_1")],
            vec![index("idx_nick", &["nickname"], false)],
        );

        let forward = diff(&a, &b);
        let backward = diff(&b, &a);

        let mut missing = missing_columns(&forward);
        let mut extra = extra_columns(&backward);
        missing.sort();
        extra.sort();
        assert_eq!(missing, extra);

        let missing_fks: Vec<_> = forward
            .iter()
            .filter_map(|d| match d {
                SchemaDifference::MissingForeignKey(f) => Some(f.column.clone()),
                _ => None,
            })
            .collect();
        let extra_fks: Vec<_> = backward
            .iter()
            .filter_map(|d| match d {
                SchemaDifference::ExtraForeignKey(f) => Some(f.column.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(missing_fks, extra_fks);

        let missing_idx: Vec<_> = forward
            .iter()
            .filter_map(|d| match d {
                SchemaDifference::MissingIndex(i) => Some(i.name.clone()),
                _ => None,
            })
            .collect();
        let extra_idx: Vec<_> = backward
            .iter()
            .filter_map(|d| match d {
                SchemaDifference::ExtraIndex(i) => Some(i.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(missing_idx, extra_idx);
    }

    #[test]
    fn test_missing_foreign_keys_helper() {
        let source = vec![fk("a_id", "a", "x"), fk("b_id", "b", "y")];
        let target = vec![fk("a_id", "a", "z")];
        let missing = missing_foreign_keys(&source, &target);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].column, "b_id");
    }
}
