use super::setup_db;

#[tokio::test]
async fn history_opens_in_processing_state() {
    let (db, _file) = setup_db().await;
    let id = db
        .insert_rss_history("https://mikan.example/rss", "scheduled")
        .await
        .unwrap();

    let row = db.get_rss_history(id).await.unwrap().unwrap();
    assert_eq!(row.status, "processing");
    assert_eq!(row.triggered_by, "scheduled");
    assert_eq!(row.items_processed, 0);

    db.close().await;
}

#[tokio::test]
async fn processed_count_completes_the_run() {
    let (db, _file) = setup_db().await;
    let id = db.insert_rss_history("u", "manual").await.unwrap();
    db.update_rss_history_counts(id, 5, 3).await.unwrap();

    db.increment_rss_history_processed(id).await.unwrap();
    db.increment_rss_history_processed(id).await.unwrap();
    let row = db.get_rss_history(id).await.unwrap().unwrap();
    assert_eq!(row.items_processed, 2);
    assert_eq!(row.status, "processing");

    db.increment_rss_history_processed(id).await.unwrap();
    let row = db.get_rss_history(id).await.unwrap().unwrap();
    assert_eq!(row.items_processed, 3);
    assert_eq!(row.status, "completed", "reaching attempted count completes the run");

    db.close().await;
}

#[tokio::test]
async fn increments_do_not_resurrect_interrupted_runs() {
    let (db, _file) = setup_db().await;
    let id = db.insert_rss_history("u", "manual").await.unwrap();
    db.update_rss_history_counts(id, 2, 2).await.unwrap();
    db.increment_rss_history_processed(id).await.unwrap();

    db.set_rss_history_status(id, "interrupted").await.unwrap();
    db.increment_rss_history_processed(id).await.unwrap();

    let row = db.get_rss_history(id).await.unwrap().unwrap();
    assert_eq!(row.status, "interrupted", "only processing runs auto-complete");

    db.close().await;
}

#[tokio::test]
async fn detail_rows_record_item_outcomes() {
    let (db, _file) = setup_db().await;
    let id = db.insert_rss_history("u", "scheduled").await.unwrap();

    db.insert_rss_detail(id, "[ANi] X - 01", "success", None).await.unwrap();
    db.insert_rss_detail(id, "[ANi] X - 02", "exists", Some("already tracked"))
        .await
        .unwrap();
    db.insert_rss_detail(id, "[ANi] X - 03 [720P]", "filtered", Some("matched filter"))
        .await
        .unwrap();
    db.insert_rss_detail(id, "[ANi] X - 04", "failed", Some("keys_exhausted"))
        .await
        .unwrap();

    let details = db.get_rss_details(id).await.unwrap();
    assert_eq!(details.len(), 4);
    assert_eq!(details[0].outcome, "success");
    assert_eq!(details[1].reason.as_deref(), Some("already tracked"));
    assert_eq!(details[3].reason.as_deref(), Some("keys_exhausted"));

    db.close().await;
}

#[tokio::test]
async fn interruption_marks_history_and_writes_cleared_details() {
    let (db, _file) = setup_db().await;
    let id = db.insert_rss_history("u", "scheduled").await.unwrap();
    db.update_rss_history_counts(id, 100, 100).await.unwrap();
    let other = db.insert_rss_history("v", "scheduled").await.unwrap();

    let cleared: Vec<(i64, String)> = (41..=100)
        .map(|i| (id, format!("[ANi] X - {i:02}")))
        .chain(std::iter::once((other, "unrelated".to_string())))
        .collect();

    db.mark_rss_history_interrupted(id, &cleared).await.unwrap();

    let row = db.get_rss_history(id).await.unwrap().unwrap();
    assert_eq!(row.status, "interrupted");

    let details = db.get_rss_details(id).await.unwrap();
    assert_eq!(details.len(), 60, "one failed/interrupted row per cleared item");
    assert!(details.iter().all(|d| d.outcome == "failed"));
    assert!(details.iter().all(|d| d.reason.as_deref() == Some("interrupted")));

    // The other feed's history is untouched
    let other_row = db.get_rss_history(other).await.unwrap().unwrap();
    assert_eq!(other_row.status, "processing");
    assert!(db.get_rss_details(other).await.unwrap().is_empty());

    db.close().await;
}

#[tokio::test]
async fn manual_uploads_are_recorded() {
    let (db, _file) = setup_db().await;
    let id = db
        .insert_manual_upload("magnet", "[ANi] X - 01", &"a".repeat(40), "submitted")
        .await
        .unwrap();
    assert!(id > 0);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM manual_upload_history")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);

    db.close().await;
}
