use tempfile::TempDir;

use crate::db::Storage;

/// File-backed database in a fresh temp dir. Keep the `TempDir` alive for the test.
pub async fn temp_storage() -> (TempDir, Storage) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let url = format!("sqlite://{}", dir.path().join("labguard.sqlite").display());
    let storage = Storage::connect(&url).await.expect("open test database");
    (dir, storage)
}
