use sqlx::SqliteConnection;

use crate::{
    error::Result,
    models::{Gallery, GalleryPartial},
};

const GALLERY_COLUMNS: &str = "id, path, checksum, zip, title, rating, organized, file_mod_time, \
     created_at, updated_at";

pub async fn find(conn: &mut SqliteConnection, id: i64) -> Result<Option<Gallery>> {
    let gallery = sqlx::query_as::<_, Gallery>(&format!(
        "SELECT {GALLERY_COLUMNS} FROM galleries WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(gallery)
}

pub async fn find_by_path(conn: &mut SqliteConnection, path: &str) -> Result<Option<Gallery>> {
    let gallery = sqlx::query_as::<_, Gallery>(&format!(
        "SELECT {GALLERY_COLUMNS} FROM galleries WHERE path = ?1"
    ))
    .bind(path)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(gallery)
}

pub async fn find_by_checksum(
    conn: &mut SqliteConnection,
    checksum: &str,
) -> Result<Option<Gallery>> {
    let gallery = sqlx::query_as::<_, Gallery>(&format!(
        "SELECT {GALLERY_COLUMNS} FROM galleries WHERE checksum = ?1"
    ))
    .bind(checksum)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(gallery)
}

pub async fn create(conn: &mut SqliteConnection, gallery: &Gallery) -> Result<Gallery> {
    let row = sqlx::query_as::<_, Gallery>(&format!(
        r#"
INSERT INTO galleries (path, checksum, zip, title, rating, organized, file_mod_time, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
RETURNING {GALLERY_COLUMNS}
        "#
    ))
    .bind(&gallery.path)
    .bind(&gallery.checksum)
    .bind(gallery.zip)
    .bind(&gallery.title)
    .bind(gallery.rating)
    .bind(gallery.organized)
    .bind(gallery.file_mod_time)
    .bind(&gallery.created_at)
    .bind(&gallery.updated_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn update_partial(
    conn: &mut SqliteConnection,
    id: i64,
    partial: &GalleryPartial,
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
        "UPDATE galleries SET {} WHERE id = ?{}",
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
    sqlx::query("UPDATE galleries SET path = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(path)
        .bind(updated_at)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn count_images(conn: &mut SqliteConnection, gallery_id: i64) -> Result<i64> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM galleries_images WHERE gallery_id = ?1")
            .bind(gallery_id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(row.0)
}

pub async fn image_ids(conn: &mut SqliteConnection, gallery_id: i64) -> Result<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT image_id FROM galleries_images WHERE gallery_id = ?1 ORDER BY image_id",
    )
    .bind(gallery_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(|row| row.0).collect())
}

pub async fn add_image(
    conn: &mut SqliteConnection,
    gallery_id: i64,
    image_id: i64,
) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO galleries_images (gallery_id, image_id) VALUES (?1, ?2)")
        .bind(gallery_id)
        .bind(image_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn associate_scene(
    conn: &mut SqliteConnection,
    scene_id: i64,
    gallery_id: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO scenes_galleries (scene_id, gallery_id) VALUES (?1, ?2)",
    )
    .bind(scene_id)
    .bind(gallery_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn gallery_ids_for_scene(
    conn: &mut SqliteConnection,
    scene_id: i64,
) -> Result<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT gallery_id FROM scenes_galleries WHERE scene_id = ?1 ORDER BY gallery_id",
    )
    .bind(scene_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(|row| row.0).collect())
}

/// Galleries that have no scene association yet, considered by the
/// post-scan pass that pairs galleries with same-named scenes.
pub async fn unassociated(conn: &mut SqliteConnection) -> Result<Vec<Gallery>> {
    let galleries = sqlx::query_as::<_, Gallery>(&format!(
        r#"
SELECT {GALLERY_COLUMNS} FROM galleries
WHERE id NOT IN (SELECT gallery_id FROM scenes_galleries)
ORDER BY id
        "#
    ))
    .fetch_all(&mut *conn)
    .await?;
    Ok(galleries)
}
