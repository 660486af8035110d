use super::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sample {
    n: u32,
    s: String,
}

async fn value_roundtrip(p: &impl Persistence) {
    let sample = Sample {
        n: 7,
        s: "hi".into(),
    };
    assert!(matches!(
        Value::load::<Sample>(p, "k").await,
        Err(PersistenceError::NotFound { .. })
    ));
    p.store("k", &sample).await.unwrap();
    let loaded: Sample = p.load("k").await.unwrap();
    assert_eq!(loaded, sample);
    p.remove("k").await.unwrap();
    assert!(matches!(
        Value::load::<Sample>(p, "k").await,
        Err(PersistenceError::NotFound { .. })
    ));
}

async fn queue_fifo(p: &impl Persistence) {
    assert!(matches!(
        Queue::peek::<Sample>(p, "q").await,
        Err(PersistenceError::NotFound { .. })
    ));
    p.enqueue("q", &Sample { n: 1, s: "a".into() }).await.unwrap();
    p.enqueue("q", &Sample { n: 2, s: "b".into() }).await.unwrap();

    let head: Sample = p.peek("q").await.unwrap();
    assert_eq!(head.n, 1, "peek must not remove the head");

    let first: Sample = p.dequeue("q").await.unwrap();
    assert_eq!(first.n, 1);
    let second: Sample = p.dequeue("q").await.unwrap();
    assert_eq!(second.n, 2);
    assert!(matches!(
        Queue::dequeue::<Sample>(p, "q").await,
        Err(PersistenceError::NotFound { .. })
    ));
}

#[tokio::test]
async fn in_memory_value_roundtrip() {
    value_roundtrip(&InMemoryPersistence::new()).await;
}

#[tokio::test]
async fn in_memory_queue_fifo() {
    queue_fifo(&InMemoryPersistence::new()).await;
}

#[tokio::test]
async fn on_disk_value_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let p = OnDiskPersistence::new(dir.path().to_path_buf()).await.unwrap();
    value_roundtrip(&p).await;
}

#[tokio::test]
async fn on_disk_queue_fifo() {
    let dir = tempfile::tempdir().unwrap();
    let p = OnDiskPersistence::new(dir.path().to_path_buf()).await.unwrap();
    queue_fifo(&p).await;
}

#[tokio::test]
async fn on_disk_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let p = OnDiskPersistence::new(dir.path().to_path_buf()).await.unwrap();
        p.store("aggregator/req", &Sample { n: 42, s: "bucket".into() })
            .await
            .unwrap();
    }
    let p2 = OnDiskPersistence::new(dir.path().to_path_buf()).await.unwrap();
    let loaded: Sample = p2.load("aggregator/req").await.unwrap();
    assert_eq!(loaded.n, 42);
}

#[tokio::test]
async fn on_disk_empty_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let p = OnDiskPersistence::new(dir.path().to_path_buf()).await.unwrap();
    let path = dir.path().join("broken.json");
    tokio::fs::write(&path, b"").await.unwrap();
    assert!(matches!(
        Value::load::<Sample>(&p, "broken").await,
        Err(PersistenceError::NotFound { .. })
    ));
}

#[tokio::test]
async fn on_disk_corrupt_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let p = OnDiskPersistence::new(dir.path().to_path_buf()).await.unwrap();
    let path = dir.path().join("broken.json");
    tokio::fs::write(&path, b"{not json").await.unwrap();
    assert!(matches!(
        Value::load::<Sample>(&p, "broken").await,
        Err(PersistenceError::NotFound { .. })
    ));
}
