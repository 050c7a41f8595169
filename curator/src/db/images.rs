use sqlx::SqliteConnection;

use crate::{
    error::Result,
    models::{ImagePartial, ImageRecord},
};

const IMAGE_COLUMNS: &str = "id, path, checksum, title, rating, organized, width, height, size, \
     file_mod_time, created_at, updated_at";

pub async fn find(conn: &mut SqliteConnection, id: i64) -> Result<Option<ImageRecord>> {
    let image = sqlx::query_as::<_, ImageRecord>(&format!(
        "SELECT {IMAGE_COLUMNS} FROM images WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(image)
}

pub async fn find_by_path(conn: &mut SqliteConnection, path: &str) -> Result<Option<ImageRecord>> {
    let image = sqlx::query_as::<_, ImageRecord>(&format!(
        "SELECT {IMAGE_COLUMNS} FROM images WHERE path = ?1"
    ))
    .bind(path)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(image)
}

pub async fn find_by_checksum(
    conn: &mut SqliteConnection,
    checksum: &str,
) -> Result<Option<ImageRecord>> {
    let image = sqlx::query_as::<_, ImageRecord>(&format!(
        "SELECT {IMAGE_COLUMNS} FROM images WHERE checksum = ?1"
    ))
    .bind(checksum)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(image)
}

pub async fn create(conn: &mut SqliteConnection, image: &ImageRecord) -> Result<ImageRecord> {
    let row = sqlx::query_as::<_, ImageRecord>(&format!(
        r#"
INSERT INTO images (path, checksum, title, rating, organized, width, height, size, file_mod_time,
                    created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
RETURNING {IMAGE_COLUMNS}
        "#
    ))
    .bind(&image.path)
    .bind(&image.checksum)
    .bind(&image.title)
    .bind(image.rating)
    .bind(image.organized)
    .bind(image.width)
    .bind(image.height)
    .bind(image.size)
    .bind(image.file_mod_time)
    .bind(&image.created_at)
    .bind(&image.updated_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn update_partial(
    conn: &mut SqliteConnection,
    id: i64,
    partial: &ImagePartial,
) -> Result<()> {
    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<crate::db::SqlValue> = Vec::new();

    let mut set = |column: &str, value: crate::db::SqlValue, args: &mut Vec<crate::db::SqlValue>| {
        args.push(value);
        sets.push(format!("{column} = ?{}", args.len()));
    };

    if let Some(value) = &partial.path {
        set("path", value.clone().into(), &mut args);
    }
    if let Some(value) = &partial.checksum {
        set("checksum", value.clone().into(), &mut args);
    }
    if let Some(value) = &partial.title {
        set("title", value.clone().into(), &mut args);
    }
    if let Some(value) = partial.width {
        set("width", value.into(), &mut args);
    }
    if let Some(value) = partial.height {
        set("height", value.into(), &mut args);
    }
    if let Some(value) = partial.size {
        set("size", value.into(), &mut args);
    }
    if let Some(value) = partial.file_mod_time {
        set("file_mod_time", value.into(), &mut args);
    }
    if let Some(value) = &partial.updated_at {
        set("updated_at", value.clone().into(), &mut args);
    }

    if sets.is_empty() {
        return Ok(());
    }

    let sql = format!(
        "UPDATE images SET {} WHERE id = ?{}",
        sets.join(", "),
        args.len() + 1
    );
    let mut query = sqlx::query(&sql);
    for arg in &args {
        query = arg.bind_to(query);
    }
    query.bind(id).execute(&mut *conn).await?;
    Ok(())
}

pub async fn update_path(
    conn: &mut SqliteConnection,
    id: i64,
    path: &str,
    updated_at: &str,
) -> Result<()> {
    sqlx::query("UPDATE images SET path = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(path)
        .bind(updated_at)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
