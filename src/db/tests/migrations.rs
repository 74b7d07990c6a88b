use super::setup_db;
use crate::db::Database;
use tempfile::NamedTempFile;

#[tokio::test]
async fn fresh_database_applies_all_migrations() {
    let (db, _file) = setup_db().await;

    let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(version, 2);

    db.close().await;
}

#[tokio::test]
async fn reopening_does_not_reapply_migrations() {
    let temp_file = NamedTempFile::new().unwrap();

    let db = Database::new(temp_file.path()).await.unwrap();
    db.close().await;

    // Second open must see the recorded versions and not fail
    let db = Database::new(temp_file.path()).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(count, 2, "each migration recorded exactly once");

    db.close().await;
}

#[tokio::test]
async fn expected_tables_exist() {
    let (db, _file) = setup_db().await;

    for table in [
        "anime_info",
        "anime_patterns",
        "download_status",
        "torrent_files",
        "deletion_history",
        "hardlinks",
        "rss_processing_history",
        "rss_processing_detail",
        "ai_key_usage",
        "manual_upload_history",
    ] {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(count, 1, "table {table} should exist");
    }

    db.close().await;
}

#[tokio::test]
async fn anime_identity_index_is_unique() {
    let (db, _file) = setup_db().await;

    super::insert_test_anime(&db, "X").await;
    let duplicate = db
        .insert_anime(&crate::db::NewAnime {
            short_title: "X",
            full_title: None,
            subtitle_group: "ANi",
            season: 1,
            category: "tv",
            media_type: "anime",
        })
        .await;
    assert!(duplicate.is_err(), "identity tuple must be unique");

    db.close().await;
}
