use std::sync::OnceLock;

use rand::Rng;

use crate::db::SqlValue;

pub fn select_distinct_ids(table_name: &str) -> String {
    format!("SELECT DISTINCT {table_name}.id FROM {table_name} ")
}

pub fn get_pagination(page: u32, per_page: u32) -> String {
    let offset = page.saturating_sub(1) * per_page;
    format!(" LIMIT {per_page} OFFSET {offset} ")
}

/// Process-wide fallback seed for random sort, drawn once so repeated
/// queries within a run page consistently.
fn random_sort_seed() -> f64 {
    static SEED: OnceLock<f64> = OnceLock::new();
    *SEED.get_or_init(|| rand::rng().random::<f64>())
}

pub fn get_sort(sort: &str, direction: &str, table_name: &str) -> String {
    let direction = if direction == "DESC" { "DESC" } else { "ASC" };

    const RANDOM_SEED_PREFIX: &str = "random_";

    if let Some(relation) = sort.strip_suffix("_count") {
        return format!(" ORDER BY COUNT(distinct {relation}.id) {direction}");
    }
    if sort == "filesize" {
        return format!(" ORDER BY cast({table_name}.size as integer) {direction}");
    }
    if let Some(seed_str) = sort.strip_prefix(RANDOM_SEED_PREFIX) {
        let seed = format!("0.{seed_str}")
            .parse::<f64>()
            .unwrap_or_else(|_| random_sort_seed());
        return get_random_sort(table_name, direction, seed);
    }
    if sort == "random" {
        return get_random_sort(table_name, direction, random_sort_seed());
    }

    let col_name = format!("{table_name}.{sort}");
    let additional = if table_name == "scenes" {
        ", bitrate DESC, framerate DESC, scenes.rating DESC, scenes.duration DESC"
    } else {
        ""
    };
    if sort == "name" {
        return format!(" ORDER BY {col_name} COLLATE NOCASE {direction}{additional}");
    }
    if sort == "title" {
        return format!(" ORDER BY {col_name} COLLATE NOCASE {direction}{additional}");
    }
    format!(" ORDER BY {col_name} {direction}{additional}")
}

/// Deterministic pseudo-random order for a fixed seed, so pagination stays
/// stable across pages. https://stackoverflow.com/a/24511461
fn get_random_sort(table_name: &str, direction: &str, seed: f64) -> String {
    let col_name = format!("{table_name}.id");
    format!(
        " ORDER BY (substr({col_name} * {seed:.16}, length({col_name}) + 2)) {direction}"
    )
}

/// Builds a LIKE-based search over the given columns. The query is split
/// on spaces, matching any word, unless wrapped in double quotes, in which
/// case the whole phrase is matched verbatim. With `not` set the clauses
/// become NOT LIKE, ANDed instead of ORed.
pub fn get_search_binding(columns: &[&str], q: &str, not: bool) -> (String, Vec<SqlValue>) {
    let mut like_clauses: Vec<String> = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();

    let (not_str, binary_type) = if not { (" NOT", " AND ") } else { ("", " OR ") };

    let trimmed = q.trim_matches('"');
    if trimmed == q {
        for word in q.split(' ') {
            for column in columns {
                like_clauses.push(format!("{column}{not_str} LIKE ?"));
                args.push(format!("%{word}%").into());
            }
        }
    } else {
        for column in columns {
            like_clauses.push(format!("{column}{not_str} LIKE ?"));
            args.push(format!("%{trimmed}%").into());
        }
    }

    (format!("({})", like_clauses.join(binary_type)), args)
}

pub fn get_in_binding(length: usize) -> String {
    let bindings = vec!["?"; length].join(", ");
    format!("({bindings})")
}

/// The operator half of a simple comparison clause and how many arguments
/// it consumes.
pub fn get_simple_criterion_clause(modifier: super::criteria::CriterionModifier) -> (&'static str, usize) {
    use super::criteria::CriterionModifier::*;
    match modifier {
        Equals => ("= ?", 1),
        NotEquals => ("!= ?", 1),
        GreaterThan => ("> ?", 1),
        LessThan => ("< ?", 1),
        IsNull => ("IS NULL", 0),
        NotNull => ("IS NOT NULL", 0),
        _ => ("= ?", 1),
    }
}
