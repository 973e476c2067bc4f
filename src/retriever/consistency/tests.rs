use super::*;
use crate::database::{OpenMode, Passage};
use tempfile::TempDir;

fn passage(n: u64) -> Passage {
    Passage {
        text: format!("text {n}"),
        title: "T".to_string(),
        source_id: None,
    }
}

async fn store_with_ids(temp_dir: &TempDir, ids: &[u64]) -> MetadataStore<Passage> {
    let store = MetadataStore::<Passage>::open(temp_dir.path().join("meta.db"), OpenMode::Fresh)
        .await
        .expect("open store");
    for id in ids {
        store.insert(*id, &passage(*id)).await.expect("insert");
    }
    store
}

fn meta(count: u64) -> IndexMeta {
    IndexMeta {
        dimension: 8,
        count,
        saved_at: None,
    }
}

#[tokio::test]
async fn matching_stores_are_consistent() {
    let temp_dir = TempDir::new().expect("temp dir");
    let store = store_with_ids(&temp_dir, &[0, 1, 2]).await;

    let report = ConsistencyReport::check(3, Some(&meta(3)), &store)
        .await
        .expect("check");

    assert!(report.is_consistent);
    assert_eq!(report.total_issues(), 0);
    assert_eq!(report.max_metadata_id, Some(2));
    assert!(report.summary().contains("Index is consistent"));
}

#[tokio::test]
async fn missing_and_surplus_rows_are_reported() {
    let temp_dir = TempDir::new().expect("temp dir");
    let store = store_with_ids(&temp_dir, &[0, 2, 4, 5]).await;

    let report = ConsistencyReport::check(4, None, &store).await.expect("check");

    assert!(!report.is_consistent);
    assert_eq!(report.missing_rows, vec![1, 3]);
    assert_eq!(report.missing_row_count, 2);
    assert_eq!(report.surplus_rows, 2);
    assert_eq!(report.total_issues(), 4);
    assert!(report.summary().contains("inconsistencies found"));
}

#[tokio::test]
async fn side_record_disagreement_is_an_issue() {
    let temp_dir = TempDir::new().expect("temp dir");
    let store = store_with_ids(&temp_dir, &[0, 1]).await;

    let report = ConsistencyReport::check(2, Some(&meta(5)), &store)
        .await
        .expect("check");

    assert!(!report.is_consistent);
    assert_eq!(report.total_issues(), 1);
    assert!(report.summary().contains("side record says 5"));
}
