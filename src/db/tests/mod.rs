mod history;
mod migrations;

use super::Database;
use tempfile::NamedTempFile;

/// Helper: create a fresh database with migrations applied
pub(crate) async fn setup_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

/// Helper: insert an anime with sensible defaults, returning its id
pub(crate) async fn insert_test_anime(db: &Database, title: &str) -> crate::types::AnimeId {
    db.insert_anime(&super::NewAnime {
        short_title: title,
        full_title: Some(&format!("{title} / Full")),
        subtitle_group: "ANi",
        season: 1,
        category: "tv",
        media_type: "anime",
    })
    .await
    .unwrap()
}

/// Helper: insert a download with sensible defaults
pub(crate) async fn insert_test_download(db: &Database, hash: &str) {
    db.insert_download(&super::NewDownload {
        hash: hash.to_string(),
        original_filename: format!("[ANi] Test - 01 [{}].mp4", &hash[..6]),
        anime_id: None,
        status: "pending".to_string(),
        download_directory: "/downloads/test".to_string(),
    })
    .await
    .unwrap()
}
