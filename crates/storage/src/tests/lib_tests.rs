use super::*;
use serde_json::json;

fn document(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected JSON object, got {other:?}"),
    }
}

#[tokio::test]
async fn put_then_get_round_trips_a_document() {
    let storage = DocumentStorage::new("sqlite::memory:").await.expect("db");
    let body = document(json!({ "status": "New", "title": "Emergency Repair Task" }));

    storage.put("jobs", "job_abc123", &body).await.expect("put");
    let loaded = storage
        .get("jobs", "job_abc123")
        .await
        .expect("get")
        .expect("document exists");
    assert_eq!(loaded.get("status"), Some(&json!("New")));
    assert_eq!(loaded, body);
}

#[tokio::test]
async fn get_of_unknown_document_is_not_found_not_an_error() {
    let storage = DocumentStorage::new("sqlite::memory:").await.expect("db");
    let loaded = storage.get("jobs", "job_missing").await.expect("get");
    assert!(loaded.is_none());
}

#[tokio::test]
async fn put_overwrites_existing_document_at_same_id() {
    let storage = DocumentStorage::new("sqlite::memory:").await.expect("db");
    let first = document(json!({ "status": "New" }));
    let second = document(json!({ "status": "Done", "note": "rewritten" }));

    storage.put("jobs", "job_1", &first).await.expect("first put");
    storage
        .put("jobs", "job_1", &second)
        .await
        .expect("second put");

    let loaded = storage
        .get("jobs", "job_1")
        .await
        .expect("get")
        .expect("document exists");
    assert_eq!(loaded, second);
}

#[tokio::test]
async fn documents_are_isolated_by_collection() {
    let storage = DocumentStorage::new("sqlite::memory:").await.expect("db");
    let job = document(json!({ "kind": "job" }));
    let item = document(json!({ "kind": "item" }));

    storage.put("jobs", "shared_id", &job).await.expect("job");
    storage.put("items", "shared_id", &item).await.expect("item");

    let loaded_job = storage
        .get("jobs", "shared_id")
        .await
        .expect("get job")
        .expect("job exists");
    let loaded_item = storage
        .get("items", "shared_id")
        .await
        .expect("get item")
        .expect("item exists");
    assert_eq!(loaded_job.get("kind"), Some(&json!("job")));
    assert_eq!(loaded_item.get("kind"), Some(&json!("item")));
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = DocumentStorage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("temp dir");
    let db_path = temp_root.path().join("nested").join("documents.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = DocumentStorage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn upload_creates_intermediate_directories() {
    let temp_root = tempfile::tempdir().expect("temp dir");
    let blobs = BlobStorage::new(temp_root.path().join("blobs")).expect("blob root");

    blobs
        .upload("images/u1/pic.png", b"png-bytes")
        .await
        .expect("upload");

    let on_disk = temp_root.path().join("blobs/images/u1/pic.png");
    assert_eq!(std::fs::read(on_disk).expect("read back"), b"png-bytes");
}

#[tokio::test]
async fn resolve_url_returns_fetchable_file_url() {
    let temp_root = tempfile::tempdir().expect("temp dir");
    let blobs = BlobStorage::new(temp_root.path()).expect("blob root");

    blobs
        .upload("images/u1/pic.png", b"png-bytes")
        .await
        .expect("upload");
    let url = blobs
        .resolve_url("images/u1/pic.png")
        .await
        .expect("resolve")
        .expect("url exists");

    assert_eq!(url.scheme(), "file");
    let fetched = std::fs::read(url.to_file_path().expect("file path")).expect("fetch");
    assert_eq!(fetched, b"png-bytes");
}

#[tokio::test]
async fn resolve_url_of_missing_path_is_not_found() {
    let temp_root = tempfile::tempdir().expect("temp dir");
    let blobs = BlobStorage::new(temp_root.path()).expect("blob root");

    let url = blobs
        .resolve_url("images/u1/missing.png")
        .await
        .expect("resolve");
    assert!(url.is_none());
}

#[tokio::test]
async fn upload_overwrites_bytes_at_same_path() {
    let temp_root = tempfile::tempdir().expect("temp dir");
    let blobs = BlobStorage::new(temp_root.path()).expect("blob root");

    blobs.upload("doc.bin", b"first").await.expect("first");
    blobs.upload("doc.bin", b"second").await.expect("second");

    let url = blobs
        .resolve_url("doc.bin")
        .await
        .expect("resolve")
        .expect("url exists");
    let fetched = std::fs::read(url.to_file_path().expect("file path")).expect("fetch");
    assert_eq!(fetched, b"second");
}

#[tokio::test]
async fn rejects_traversal_and_absolute_blob_paths() {
    let temp_root = tempfile::tempdir().expect("temp dir");
    let blobs = BlobStorage::new(temp_root.path()).expect("blob root");

    blobs
        .upload("../escape.bin", b"nope")
        .await
        .expect_err("traversal rejected");
    blobs
        .upload("/etc/passwd", b"nope")
        .await
        .expect_err("absolute rejected");
    blobs.upload("", b"nope").await.expect_err("empty rejected");
}
