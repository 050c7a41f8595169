use sqlx::SqliteConnection;

use crate::{
    error::Result,
    models::{Scene, ScenePartial},
};

const SCENE_COLUMNS: &str = "id, path, checksum, oshash, title, details, date, rating, organized, \
     studio_id, duration, video_codec, audio_codec, format, width, height, framerate, bitrate, \
     size, file_mod_time, created_at, updated_at";

pub async fn find(conn: &mut SqliteConnection, id: i64) -> Result<Option<Scene>> {
    let scene = sqlx::query_as::<_, Scene>(&format!(
        "SELECT {SCENE_COLUMNS} FROM scenes WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(scene)
}

pub async fn find_by_path(conn: &mut SqliteConnection, path: &str) -> Result<Option<Scene>> {
    let scene = sqlx::query_as::<_, Scene>(&format!(
        "SELECT {SCENE_COLUMNS} FROM scenes WHERE path = ?1"
    ))
    .bind(path)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(scene)
}

pub async fn find_by_checksum(conn: &mut SqliteConnection, checksum: &str) -> Result<Option<Scene>> {
    let scene = sqlx::query_as::<_, Scene>(&format!(
        "SELECT {SCENE_COLUMNS} FROM scenes WHERE checksum = ?1"
    ))
    .bind(checksum)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(scene)
}

pub async fn find_by_oshash(conn: &mut SqliteConnection, oshash: &str) -> Result<Option<Scene>> {
    let scene = sqlx::query_as::<_, Scene>(&format!(
        "SELECT {SCENE_COLUMNS} FROM scenes WHERE oshash = ?1"
    ))
    .bind(oshash)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(scene)
}

pub async fn create(conn: &mut SqliteConnection, scene: &Scene) -> Result<Scene> {
    let row = sqlx::query_as::<_, Scene>(&format!(
        r#"
INSERT INTO scenes (path, checksum, oshash, title, details, date, rating, organized, studio_id,
                    duration, video_codec, audio_codec, format, width, height, framerate, bitrate,
                    size, file_mod_time, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
RETURNING {SCENE_COLUMNS}
        "#
    ))
    .bind(&scene.path)
    .bind(&scene.checksum)
    .bind(&scene.oshash)
    .bind(&scene.title)
    .bind(&scene.details)
    .bind(&scene.date)
    .bind(scene.rating)
    .bind(scene.organized)
    .bind(scene.studio_id)
    .bind(scene.duration)
    .bind(&scene.video_codec)
    .bind(&scene.audio_codec)
    .bind(&scene.format)
    .bind(scene.width)
    .bind(scene.height)
    .bind(scene.framerate)
    .bind(scene.bitrate)
    .bind(&scene.size)
    .bind(scene.file_mod_time)
    .bind(&scene.created_at)
    .bind(&scene.updated_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

/// Applies only the fields present in the partial, leaving the remaining
/// columns as they are.
pub async fn update_partial(
    conn: &mut SqliteConnection,
    id: i64,
    partial: &ScenePartial,
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
    if let Some(value) = &partial.oshash {
        set("oshash", value.clone().into(), &mut args);
    }
    if let Some(value) = &partial.title {
        set("title", value.clone().into(), &mut args);
    }
    if let Some(value) = &partial.details {
        set("details", value.clone().into(), &mut args);
    }
    if let Some(value) = &partial.date {
        set("date", value.clone().into(), &mut args);
    }
    if let Some(value) = partial.duration {
        set("duration", value.into(), &mut args);
    }
    if let Some(value) = &partial.video_codec {
        set("video_codec", value.clone().into(), &mut args);
    }
    if let Some(value) = &partial.audio_codec {
        set("audio_codec", value.clone().into(), &mut args);
    }
    if let Some(value) = &partial.format {
        set("format", value.clone().into(), &mut args);
    }
    if let Some(value) = partial.width {
        set("width", value.into(), &mut args);
    }
    if let Some(value) = partial.height {
        set("height", value.into(), &mut args);
    }
    if let Some(value) = partial.framerate {
        set("framerate", value.into(), &mut args);
    }
    if let Some(value) = partial.bitrate {
        set("bitrate", value.into(), &mut args);
    }
    if let Some(value) = &partial.size {
        set("size", value.clone().into(), &mut args);
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
        "UPDATE scenes SET {} WHERE id = ?{}",
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
    sqlx::query("UPDATE scenes SET path = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(path)
        .bind(updated_at)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
