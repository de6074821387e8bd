/// Catalog data-access tests: tags, works and the image swap
///
/// Skipped when `DATABASE_URL` is not set.
mod common;

use bookheaven_shared::models::image::{Image, NewImage};
use bookheaven_shared::models::tag::Tag;
use bookheaven_shared::models::work::{UpdateWork, Work, WorkFilter};
use bookheaven_shared::models::ModelError;
use bookheaven_shared::pagination::PageRequest;
use uuid::Uuid;

#[tokio::test]
async fn test_tag_find_or_create_is_case_insensitive() {
    let Some(pool) = common::test_pool().await else {
        return;
    };

    let name = common::unique("Science Fiction");

    let (first, created) = Tag::find_or_create(&pool, &name).await.unwrap();
    assert!(created);
    assert_eq!(first.name, name);

    let (again, created) = Tag::find_or_create(&pool, &format!("  {}  ", name.to_uppercase()))
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(again.id, first.id);
    assert_eq!(again.name, name, "existing spelling is kept");
}

#[tokio::test]
async fn test_tag_find_or_create_concurrent() {
    let Some(pool) = common::test_pool().await else {
        return;
    };

    let name = common::unique("fantasy");
    let upper = name.to_uppercase();
    let (a, b) = tokio::join!(
        Tag::find_or_create(&pool, &name),
        Tag::find_or_create(&pool, &upper)
    );
    let (a, a_created) = a.unwrap();
    let (b, b_created) = b.unwrap();

    assert_eq!(a.id, b.id);
    assert!(a_created ^ b_created, "exactly one call creates the tag");
}

#[tokio::test]
async fn test_tag_rename_conflict() {
    let Some(pool) = common::test_pool().await else {
        return;
    };

    let (horror, _) = Tag::find_or_create(&pool, &common::unique("horror")).await.unwrap();
    let (gothic, _) = Tag::find_or_create(&pool, &common::unique("gothic")).await.unwrap();

    let result = Tag::rename(&pool, gothic.id, &horror.name.to_lowercase()).await;
    assert!(matches!(result, Err(ModelError::Conflict(_))));

    assert!(Tag::rename(&pool, Uuid::new_v4(), "anything").await.unwrap().is_none());
}

#[tokio::test]
async fn test_tag_attach_and_filter_works() {
    let Some(pool) = common::test_pool().await else {
        return;
    };

    let author = common::author(&pool).await;
    let work = common::work(&pool, vec![author.id]).await;
    let (tag, _) = Tag::find_or_create(&pool, &common::unique("classic")).await.unwrap();

    Tag::attach_to_work(&pool, work.id, tag.id).await.unwrap();
    // Attaching twice is a no-op
    Tag::attach_to_work(&pool, work.id, tag.id).await.unwrap();

    let filter = WorkFilter {
        tag_id: Some(tag.id),
        ..Default::default()
    };
    let page = Work::list(&pool, &filter, PageRequest::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].work.id, work.id);
    assert_eq!(page.items[0].author_names, vec![author.name.clone()]);

    let missing = Tag::attach_to_work(&pool, Uuid::new_v4(), tag.id).await;
    assert!(matches!(missing, Err(ModelError::NotFound("Work"))));

    assert!(Tag::detach_from_work(&pool, work.id, tag.id).await.unwrap());
    assert!(!Tag::detach_from_work(&pool, work.id, tag.id).await.unwrap());
}

#[tokio::test]
async fn test_work_author_list_replaced_atomically() {
    let Some(pool) = common::test_pool().await else {
        return;
    };

    let first = common::author(&pool).await;
    let second = common::author(&pool).await;
    let work = common::work(&pool, vec![first.id]).await;

    let update = UpdateWork {
        author_ids: Some(vec![second.id, Uuid::new_v4()]),
        ..Default::default()
    };
    let result = Work::update(&pool, work.id, update).await;
    assert!(matches!(result, Err(ModelError::NotFound("Author"))));

    let detail = Work::find_detail(&pool, work.id).await.unwrap().unwrap();
    let ids: Vec<Uuid> = detail.authors.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![first.id], "failed update leaves authors untouched");

    let update = UpdateWork {
        author_ids: Some(vec![second.id, first.id]),
        ..Default::default()
    };
    Work::update(&pool, work.id, update).await.unwrap();

    let detail = Work::find_detail(&pool, work.id).await.unwrap().unwrap();
    let ids: Vec<Uuid> = detail.authors.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

#[tokio::test]
async fn test_replace_edition_image_returns_previous_keys() {
    let Some(pool) = common::test_pool().await else {
        return;
    };

    let edition = common::stocked_edition(&pool, 1299, 3).await;
    let first_key = format!("cover-{}", Uuid::new_v4());
    let second_key = format!("cover-{}", Uuid::new_v4());

    let swap = Image::replace_for_edition(
        &pool,
        edition.id,
        NewImage {
            file_key: first_key.clone(),
            url: format!("https://utfs.io/f/{}", first_key),
        },
    )
    .await
    .unwrap();
    assert!(swap.removed_keys.is_empty());

    let swap = Image::replace_for_edition(
        &pool,
        edition.id,
        NewImage {
            file_key: second_key.clone(),
            url: format!("https://utfs.io/f/{}", second_key),
        },
    )
    .await
    .unwrap();
    assert_eq!(swap.removed_keys, vec![first_key]);

    let images = Image::list_for_edition(&pool, edition.id).await.unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].file_key, second_key);

    let url: Option<String> =
        sqlx::query_scalar("SELECT image_url FROM book_editions WHERE id = $1")
            .bind(edition.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(url, Some(swap.image.url));
}

#[tokio::test]
async fn test_replace_image_for_missing_owner() {
    let Some(pool) = common::test_pool().await else {
        return;
    };

    let key = format!("portrait-{}", Uuid::new_v4());
    let result = Image::replace_for_author(
        &pool,
        Uuid::new_v4(),
        NewImage {
            file_key: key.clone(),
            url: format!("https://utfs.io/f/{}", key),
        },
    )
    .await;
    assert!(matches!(result, Err(ModelError::NotFound("Author"))));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM author_images WHERE file_key = $1")
        .bind(&key)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 0, "rolled back");
}

#[tokio::test]
async fn test_remove_author_image() {
    let Some(pool) = common::test_pool().await else {
        return;
    };

    let author = common::author(&pool).await;
    let key = format!("portrait-{}", Uuid::new_v4());
    Image::replace_for_author(
        &pool,
        author.id,
        NewImage {
            file_key: key.clone(),
            url: format!("https://utfs.io/f/{}", key),
        },
    )
    .await
    .unwrap();

    let removed = Image::remove_for_author(&pool, author.id).await.unwrap();
    assert_eq!(removed, Some(vec![key]));
    assert!(Image::list_for_author(&pool, author.id).await.unwrap().is_empty());

    assert_eq!(Image::remove_for_author(&pool, Uuid::new_v4()).await.unwrap(), None);
}
