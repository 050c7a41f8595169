use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Scene,
    Image,
    Gallery,
}

/// Which hash keys a scene's generated files on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Oshash,
    Md5,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Scene {
    pub id: i64,
    pub path: String,
    pub checksum: Option<String>,
    pub oshash: Option<String>,
    pub title: Option<String>,
    pub details: Option<String>,
    pub date: Option<String>,
    pub rating: Option<i64>,
    pub organized: bool,
    pub studio_id: Option<i64>,
    pub duration: Option<f64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub format: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub framerate: Option<f64>,
    pub bitrate: Option<i64>,
    pub size: Option<String>,
    pub file_mod_time: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl Scene {
    /// The identity hash under the given file naming algorithm, falling back
    /// to whichever flavor is present.
    pub fn hash(&self, algorithm: HashAlgorithm) -> Option<&str> {
        match algorithm {
            HashAlgorithm::Oshash => self.oshash.as_deref().or(self.checksum.as_deref()),
            HashAlgorithm::Md5 => self.checksum.as_deref().or(self.oshash.as_deref()),
        }
    }
}

/// Typed partial update for a scene. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ScenePartial {
    pub path: Option<String>,
    pub checksum: Option<String>,
    pub oshash: Option<String>,
    pub title: Option<String>,
    pub details: Option<String>,
    pub date: Option<String>,
    pub duration: Option<f64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub format: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub framerate: Option<f64>,
    pub bitrate: Option<i64>,
    pub size: Option<String>,
    pub file_mod_time: Option<i64>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ImageRecord {
    pub id: i64,
    pub path: String,
    pub checksum: String,
    pub title: Option<String>,
    pub rating: Option<i64>,
    pub organized: bool,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub size: Option<i64>,
    pub file_mod_time: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct ImagePartial {
    pub path: Option<String>,
    pub checksum: Option<String>,
    pub title: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub size: Option<i64>,
    pub file_mod_time: Option<i64>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Gallery {
    pub id: i64,
    pub path: Option<String>,
    pub checksum: String,
    pub zip: bool,
    pub title: Option<String>,
    pub rating: Option<i64>,
    pub organized: bool,
    pub file_mod_time: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct GalleryPartial {
    pub path: Option<String>,
    pub checksum: Option<String>,
    pub title: Option<String>,
    pub file_mod_time: Option<i64>,
    pub updated_at: Option<String>,
}

pub(crate) fn current_iso_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(iso_format())
        .unwrap_or_else(|_| OffsetDateTime::now_utc().format(iso_format()).unwrap())
}

fn iso_format() -> &'static [FormatItem<'static>] {
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_hash_prefers_configured_algorithm() {
        let scene = Scene {
            id: 1,
            path: "/media/a.mp4".to_string(),
            checksum: Some("md5hash".to_string()),
            oshash: Some("oshashvalue".to_string()),
            title: None,
            details: None,
            date: None,
            rating: None,
            organized: false,
            studio_id: None,
            duration: None,
            video_codec: None,
            audio_codec: None,
            format: None,
            width: None,
            height: None,
            framerate: None,
            bitrate: None,
            size: None,
            file_mod_time: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(scene.hash(HashAlgorithm::Oshash), Some("oshashvalue"));
        assert_eq!(scene.hash(HashAlgorithm::Md5), Some("md5hash"));

        let mut no_md5 = scene.clone();
        no_md5.checksum = None;
        assert_eq!(no_md5.hash(HashAlgorithm::Md5), Some("oshashvalue"));
    }

    #[test]
    fn iso_timestamp_has_expected_shape() {
        let ts = current_iso_timestamp();
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
    }
}
