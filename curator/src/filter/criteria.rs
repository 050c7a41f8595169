use regex::Regex;
use serde::Deserialize;

use super::{FilterBuilder, FilterError, sql};
use crate::db::SqlValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriterionModifier {
    Equals,
    NotEquals,
    Includes,
    IncludesAll,
    Excludes,
    GreaterThan,
    LessThan,
    IsNull,
    NotNull,
    MatchesRegex,
    NotMatchesRegex,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StringCriterion {
    pub value: String,
    pub modifier: CriterionModifier,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntCriterion {
    pub value: i64,
    pub modifier: CriterionModifier,
}

/// A membership criterion over related IDs, e.g. "tagged with any of".
#[derive(Debug, Clone, Deserialize)]
pub struct MultiCriterion {
    pub value: Vec<i64>,
    pub modifier: CriterionModifier,
}

/// String matching per modifier. EQUALS and NOT_EQUALS use LIKE semantics;
/// INCLUDES and EXCLUDES run the word-split search; IS_NULL and NOT_NULL
/// treat an empty-after-trim string the same as true NULL. Regex patterns
/// are validated before binding, recording an error on the node instead of
/// emitting a partial clause.
pub fn handle_string_criterion(f: &mut FilterBuilder, criterion: &StringCriterion, column: &str) {
    match criterion.modifier {
        CriterionModifier::Includes => {
            let (clause, args) = sql::get_search_binding(&[column], &criterion.value, false);
            f.add_where(clause, args);
        }
        CriterionModifier::Excludes => {
            let (clause, args) = sql::get_search_binding(&[column], &criterion.value, true);
            f.add_where(clause, args);
        }
        CriterionModifier::Equals => {
            f.add_where(format!("{column} LIKE ?"), vec![criterion.value.clone().into()]);
        }
        CriterionModifier::NotEquals => {
            f.add_where(
                format!("{column} NOT LIKE ?"),
                vec![criterion.value.clone().into()],
            );
        }
        CriterionModifier::MatchesRegex => {
            if Regex::new(&criterion.value).is_err() {
                f.set_error(FilterError::InvalidRegex(criterion.value.clone()));
                return;
            }
            f.add_where(format!("{column} regexp ?"), vec![criterion.value.clone().into()]);
        }
        CriterionModifier::NotMatchesRegex => {
            if Regex::new(&criterion.value).is_err() {
                f.set_error(FilterError::InvalidRegex(criterion.value.clone()));
                return;
            }
            f.add_where(
                format!("{column} NOT regexp ?"),
                vec![criterion.value.clone().into()],
            );
        }
        CriterionModifier::IsNull => {
            f.add_where(format!("({column} IS NULL OR TRIM({column}) = '')"), vec![]);
        }
        CriterionModifier::NotNull => {
            f.add_where(
                format!("({column} IS NOT NULL AND TRIM({column}) != '')"),
                vec![],
            );
        }
        _ => {
            let (clause, count) = sql::get_simple_criterion_clause(criterion.modifier);
            if count == 1 {
                f.add_where(
                    format!("{column} {clause}"),
                    vec![criterion.value.clone().into()],
                );
            } else {
                f.add_where(format!("{column} {clause}"), vec![]);
            }
        }
    }
}

pub fn handle_int_criterion(f: &mut FilterBuilder, criterion: &IntCriterion, column: &str) {
    let (clause, count) = sql::get_simple_criterion_clause(criterion.modifier);
    if count == 1 {
        f.add_where(format!("{column} {clause}"), vec![criterion.value.into()]);
    } else {
        f.add_where(format!("{column} {clause}"), vec![]);
    }
}

pub fn handle_bool_criterion(f: &mut FilterBuilder, value: bool, column: &str) {
    let literal = if value { "1" } else { "0" };
    f.add_where(format!("{column} = {literal}"), vec![]);
}

/// Schema shape of a many-to-many association, used to compile membership
/// criteria. All identifiers come from a fixed internal map; user input is
/// only ever bound as parameters.
pub struct MultiCriterionHandler {
    pub primary_table: &'static str,
    pub foreign_table: &'static str,
    pub join_table: &'static str,
    pub primary_fk: &'static str,
    pub foreign_fk: &'static str,
}

impl MultiCriterionHandler {
    /// INCLUDES compiles to a foreign-id IN list; INCLUDES_ALL adds a HAVING
    /// distinct-count check so every listed ID must be present; EXCLUDES uses
    /// a correlated NOT EXISTS subquery so a row is excluded even when it
    /// also carries non-excluded associations.
    pub fn apply(&self, f: &mut FilterBuilder, criterion: &MultiCriterion) {
        if criterion.value.is_empty() {
            return;
        }

        let args: Vec<SqlValue> = criterion.value.iter().map(|id| (*id).into()).collect();
        let in_binding = sql::get_in_binding(criterion.value.len());

        match criterion.modifier {
            CriterionModifier::Includes => {
                if self.join_table.is_empty() {
                    f.add_where(
                        format!("{}.{} IN {in_binding}", self.primary_table, self.foreign_fk),
                        args,
                    );
                    return;
                }
                self.add_joins(f);
                f.add_where(
                    format!("{}.id IN {in_binding}", self.foreign_table),
                    args,
                );
            }
            CriterionModifier::IncludesAll => {
                if self.join_table.is_empty() {
                    f.add_where(
                        format!("{}.{} IN {in_binding}", self.primary_table, self.foreign_fk),
                        args,
                    );
                    return;
                }
                self.add_joins(f);
                f.add_where(
                    format!("{}.id IN {in_binding}", self.foreign_table),
                    args,
                );
                f.add_having(
                    format!(
                        "count(distinct {}.id) IS {}",
                        self.foreign_table,
                        criterion.value.len()
                    ),
                    vec![],
                );
            }
            CriterionModifier::Excludes => {
                let clause = if !self.join_table.is_empty() {
                    format!(
                        "not exists (select {jt}.{pfk} from {jt} where {jt}.{pfk} = {pt}.id and {jt}.{ffk} in {in_binding})",
                        jt = self.join_table,
                        pfk = self.primary_fk,
                        pt = self.primary_table,
                        ffk = self.foreign_fk,
                    )
                } else {
                    // direct foreign-key column, no join table
                    format!(
                        "not exists (select s.id from {pt} as s where s.id = {pt}.id and s.{ffk} in {in_binding})",
                        pt = self.primary_table,
                        ffk = self.foreign_fk,
                    )
                };
                f.add_where(clause, args);
            }
            _ => {}
        }
    }

    fn add_joins(&self, f: &mut FilterBuilder) {
        f.add_join(
            self.join_table,
            "",
            format!(
                "{jt}.{pfk} = {pt}.id",
                jt = self.join_table,
                pfk = self.primary_fk,
                pt = self.primary_table
            ),
        );
        f.add_join(
            self.foreign_table,
            "",
            format!(
                "{ft}.id = {jt}.{ffk}",
                ft = self.foreign_table,
                jt = self.join_table,
                ffk = self.foreign_fk
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE_TAGS: MultiCriterionHandler = MultiCriterionHandler {
        primary_table: "scenes",
        foreign_table: "tags",
        join_table: "scenes_tags",
        primary_fk: "scene_id",
        foreign_fk: "tag_id",
    };

    #[test]
    fn equals_uses_like_semantics() {
        let mut f = FilterBuilder::new();
        handle_string_criterion(
            &mut f,
            &StringCriterion {
                value: "abc".to_string(),
                modifier: CriterionModifier::Equals,
            },
            "scenes.title",
        );
        let (clause, args) = f.generate_where_clauses();
        assert_eq!(clause, "(scenes.title LIKE ?)");
        assert_eq!(args, vec!["abc".into()]);
    }

    #[test]
    fn is_null_also_matches_empty_string() {
        let mut f = FilterBuilder::new();
        handle_string_criterion(
            &mut f,
            &StringCriterion {
                value: String::new(),
                modifier: CriterionModifier::IsNull,
            },
            "scenes.details",
        );
        let (clause, args) = f.generate_where_clauses();
        assert_eq!(
            clause,
            "((scenes.details IS NULL OR TRIM(scenes.details) = ''))"
        );
        assert!(args.is_empty());
    }

    #[test]
    fn invalid_regex_records_error_without_partial_clause() {
        let mut f = FilterBuilder::new();
        handle_string_criterion(
            &mut f,
            &StringCriterion {
                value: "(unclosed".to_string(),
                modifier: CriterionModifier::MatchesRegex,
            },
            "scenes.path",
        );
        assert!(matches!(f.validate(), Err(FilterError::InvalidRegex(_))));
        let (clause, _) = f.generate_where_clauses();
        assert!(clause.is_empty());
    }

    #[test]
    fn includes_joins_and_binds_id_list() {
        let mut f = FilterBuilder::new();
        SCENE_TAGS.apply(
            &mut f,
            &MultiCriterion {
                value: vec![5, 7],
                modifier: CriterionModifier::Includes,
            },
        );
        let (clause, args) = f.generate_where_clauses();
        assert_eq!(clause, "(tags.id IN (?, ?))");
        assert_eq!(args, vec![5.into(), 7.into()]);
        assert_eq!(f.get_all_joins().len(), 2);
    }

    #[test]
    fn includes_all_adds_having_count() {
        let mut f = FilterBuilder::new();
        SCENE_TAGS.apply(
            &mut f,
            &MultiCriterion {
                value: vec![1, 2, 3],
                modifier: CriterionModifier::IncludesAll,
            },
        );
        let (having, _) = f.generate_having_clauses();
        assert_eq!(having, "(count(distinct tags.id) IS 3)");
    }

    #[test]
    fn excludes_uses_correlated_not_exists() {
        let mut f = FilterBuilder::new();
        SCENE_TAGS.apply(
            &mut f,
            &MultiCriterion {
                value: vec![9],
                modifier: CriterionModifier::Excludes,
            },
        );
        let (clause, args) = f.generate_where_clauses();
        assert_eq!(
            clause,
            "(not exists (select scenes_tags.scene_id from scenes_tags where scenes_tags.scene_id = scenes.id and scenes_tags.tag_id in (?)))"
        );
        assert_eq!(args, vec![9.into()]);
        // no join needed for the subquery form
        assert!(f.get_all_joins().is_empty());
    }

    #[test]
    fn empty_id_list_adds_nothing() {
        let mut f = FilterBuilder::new();
        SCENE_TAGS.apply(
            &mut f,
            &MultiCriterion {
                value: vec![],
                modifier: CriterionModifier::Includes,
            },
        );
        let (clause, _) = f.generate_where_clauses();
        assert!(clause.is_empty());
    }
}
