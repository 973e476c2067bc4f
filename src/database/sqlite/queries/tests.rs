use super::*;
use crate::database::sqlite::models::{Passage, QaPair};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;

async fn create_test_pool() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let options = SqliteConnectOptions::new()
        .filename(temp_dir.path().join("queries.db"))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok((temp_dir, pool))
}

fn passage(n: u64) -> Passage {
    Passage {
        text: format!("passage {n}"),
        title: format!("title {n}"),
        source_id: (n % 2 == 0).then(|| format!("doc-{n}")),
    }
}

#[tokio::test]
async fn insert_and_get_by_id() -> Result<()> {
    let (_temp_dir, pool) = create_test_pool().await?;
    PayloadQueries::<Passage>::create_table(&pool).await?;

    PayloadQueries::<Passage>::insert(&pool, 0, &passage(0)).await?;
    PayloadQueries::<Passage>::insert(&pool, 1, &passage(1)).await?;

    assert_eq!(
        PayloadQueries::<Passage>::get_by_id(&pool, 1).await?,
        Some(passage(1))
    );
    assert_eq!(PayloadQueries::<Passage>::get_by_id(&pool, 7).await?, None);
    Ok(())
}

#[tokio::test]
async fn duplicate_ids_are_rejected() -> Result<()> {
    let (_temp_dir, pool) = create_test_pool().await?;
    PayloadQueries::<Passage>::create_table(&pool).await?;

    PayloadQueries::<Passage>::insert(&pool, 3, &passage(3)).await?;
    let result = PayloadQueries::<Passage>::insert(&pool, 3, &passage(4)).await;
    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn get_many_skips_absent_ids() -> Result<()> {
    let (_temp_dir, pool) = create_test_pool().await?;
    PayloadQueries::<Passage>::create_table(&pool).await?;

    for id in 0..5 {
        PayloadQueries::<Passage>::insert(&pool, id, &passage(id)).await?;
    }

    let found = PayloadQueries::<Passage>::get_many(&pool, &[4, 1, 99]).await?;
    assert_eq!(found.len(), 2);
    assert_eq!(found.get(&4), Some(&passage(4)));
    assert_eq!(found.get(&1), Some(&passage(1)));
    assert!(!found.contains_key(&99));
    Ok(())
}

#[tokio::test]
async fn get_many_handles_more_ids_than_one_statement() -> Result<()> {
    let (_temp_dir, pool) = create_test_pool().await?;
    PayloadQueries::<Passage>::create_table(&pool).await?;

    for id in 0..10 {
        PayloadQueries::<Passage>::insert(&pool, id, &passage(id)).await?;
    }

    let ids: Vec<u64> = (0..2000).collect();
    let found = PayloadQueries::<Passage>::get_many(&pool, &ids).await?;
    assert_eq!(found.len(), 10);
    Ok(())
}

#[tokio::test]
async fn count_max_and_missing_ids() -> Result<()> {
    let (_temp_dir, pool) = create_test_pool().await?;
    PayloadQueries::<QaPair>::create_table(&pool).await?;

    assert_eq!(PayloadQueries::<QaPair>::count(&pool).await?, 0);
    assert_eq!(PayloadQueries::<QaPair>::max_id(&pool).await?, None);

    let pair = QaPair {
        question: "Q?".to_string(),
        answer: "A".to_string(),
        source_passage: "P".to_string(),
        source_title: "T".to_string(),
    };
    for id in [0, 1, 3, 6] {
        PayloadQueries::<QaPair>::insert(&pool, id, &pair).await?;
    }

    assert_eq!(PayloadQueries::<QaPair>::count(&pool).await?, 4);
    assert_eq!(PayloadQueries::<QaPair>::max_id(&pool).await?, Some(6));
    assert_eq!(
        PayloadQueries::<QaPair>::missing_ids(&pool, 8).await?,
        vec![2, 4, 5, 7]
    );
    assert_eq!(
        PayloadQueries::<QaPair>::missing_ids(&pool, 3).await?,
        vec![2]
    );
    Ok(())
}

#[tokio::test]
async fn drop_table_clears_rows() -> Result<()> {
    let (_temp_dir, pool) = create_test_pool().await?;
    PayloadQueries::<Passage>::create_table(&pool).await?;
    PayloadQueries::<Passage>::insert(&pool, 0, &passage(0)).await?;

    PayloadQueries::<Passage>::drop_table(&pool).await?;
    PayloadQueries::<Passage>::create_table(&pool).await?;

    assert_eq!(PayloadQueries::<Passage>::count(&pool).await?, 0);
    Ok(())
}
