use serde::Deserialize;
use sqlx::SqliteConnection;

use super::{
    FilterBuilder,
    criteria::{
        IntCriterion, MultiCriterion, MultiCriterionHandler, StringCriterion, handle_bool_criterion,
        handle_int_criterion, handle_string_criterion,
    },
    query::QueryBuilder,
    sql,
};
use crate::error::Result;

const SCENE_TAGS: MultiCriterionHandler = MultiCriterionHandler {
    primary_table: "scenes",
    foreign_table: "tags",
    join_table: "scenes_tags",
    primary_fk: "scene_id",
    foreign_fk: "tag_id",
};

const SCENE_PERFORMERS: MultiCriterionHandler = MultiCriterionHandler {
    primary_table: "scenes",
    foreign_table: "performers",
    join_table: "performers_scenes",
    primary_fk: "scene_id",
    foreign_fk: "performer_id",
};

// studio is a direct column on scenes, so no join table
const SCENE_STUDIOS: MultiCriterionHandler = MultiCriterionHandler {
    primary_table: "scenes",
    foreign_table: "studios",
    join_table: "",
    primary_fk: "id",
    foreign_fk: "studio_id",
};

/// Recursive criteria tree for scene queries. At most one of `and`, `or`,
/// `not` may be set per node.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SceneFilter {
    pub and: Option<Box<SceneFilter>>,
    pub or: Option<Box<SceneFilter>>,
    pub not: Option<Box<SceneFilter>>,

    pub path: Option<StringCriterion>,
    pub details: Option<StringCriterion>,
    pub rating: Option<IntCriterion>,
    pub organized: Option<bool>,
    pub tags: Option<MultiCriterion>,
    pub performers: Option<MultiCriterion>,
    pub studios: Option<MultiCriterion>,
}

/// Free-text search, sorting, and pagination shared by all find queries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FindFilter {
    pub q: Option<String>,
    pub page: u32,
    pub per_page: u32,
    pub sort: Option<String>,
    pub direction: Option<String>,
}

impl Default for FindFilter {
    fn default() -> Self {
        Self {
            q: None,
            page: 1,
            per_page: 25,
            sort: None,
            direction: None,
        }
    }
}

pub fn make_scene_filter(scene_filter: &SceneFilter) -> FilterBuilder {
    let mut f = FilterBuilder::new();

    if let Some(sub) = &scene_filter.and {
        f.and(make_scene_filter(sub));
    }
    if let Some(sub) = &scene_filter.or {
        f.or(make_scene_filter(sub));
    }
    if let Some(sub) = &scene_filter.not {
        f.not(make_scene_filter(sub));
    }

    if let Some(criterion) = &scene_filter.path {
        handle_string_criterion(&mut f, criterion, "scenes.path");
    }
    if let Some(criterion) = &scene_filter.details {
        handle_string_criterion(&mut f, criterion, "scenes.details");
    }
    if let Some(criterion) = &scene_filter.rating {
        handle_int_criterion(&mut f, criterion, "scenes.rating");
    }
    if let Some(value) = scene_filter.organized {
        handle_bool_criterion(&mut f, value, "scenes.organized");
    }
    if let Some(criterion) = &scene_filter.tags {
        SCENE_TAGS.apply(&mut f, criterion);
    }
    if let Some(criterion) = &scene_filter.performers {
        SCENE_PERFORMERS.apply(&mut f, criterion);
    }
    if let Some(criterion) = &scene_filter.studios {
        SCENE_STUDIOS.apply(&mut f, criterion);
    }

    f
}

/// Finds scene IDs matching the criteria tree, with the total count
/// ignoring pagination.
pub async fn scene_query(
    conn: &mut SqliteConnection,
    scene_filter: &SceneFilter,
    find_filter: &FindFilter,
) -> Result<(Vec<i64>, i64)> {
    let mut query = QueryBuilder::new("scenes");

    if let Some(q) = find_filter.q.as_deref().filter(|q| !q.is_empty()) {
        let (clause, args) = sql::get_search_binding(
            &["scenes.title", "scenes.details", "scenes.path"],
            q,
            false,
        );
        query.add_where(clause);
        for arg in args {
            query.add_arg(arg);
        }
    }

    let filter = make_scene_filter(scene_filter);
    query.add_filter(&filter);

    let sort = find_filter.sort.as_deref().unwrap_or("path");
    let direction = find_filter.direction.as_deref().unwrap_or("ASC");
    query.sort_and_pagination = format!(
        "{}{}",
        sql::get_sort(sort, direction, "scenes"),
        sql::get_pagination(find_filter.page, find_filter.per_page)
    );

    query.execute_find(conn).await
}
