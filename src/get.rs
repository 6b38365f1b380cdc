//! Item retrieval by id and listing by status.
//!
//! Used by the `cortex get` / `cortex list` commands and by the
//! `GET /items` endpoints.

use anyhow::Result;
use radio_cortex_core::clock::format_ts_iso;
use radio_cortex_core::error::StoreError;
use radio_cortex_core::models::{Item, Status};
use radio_cortex_core::store::CatalogStore;
use serde::Serialize;

/// Presentation shape of an item: timestamps rendered, vector summarized.
#[derive(Debug, Clone, Serialize)]
pub struct ItemResponse {
    pub id: String,
    pub status: Status,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_secs: Option<i64>,
    pub license: String,
    pub license_raw: Option<String>,
    pub source: String,
    pub source_id: String,
    pub source_url: String,
    pub media_url: Option<String>,
    pub category: Option<String>,
    pub secondary_categories: Vec<String>,
    pub mood_tags: Vec<String>,
    pub cultural_context: Option<String>,
    pub vector_version: Option<u64>,
    pub lease_owner: Option<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ItemResponse {
    pub fn new(item: Item, vector_version: Option<u64>) -> Self {
        Self {
            attempts: item.attempts.values().sum(),
            id: item.id,
            status: item.status,
            title: item.title,
            artist: item.artist,
            album: item.album,
            duration_secs: item.duration_secs,
            license: item.license_kind.as_str().to_string(),
            license_raw: item.license_raw,
            source: item.source,
            source_id: item.source_id,
            source_url: item.source_url,
            media_url: item.media_url,
            category: item.category,
            secondary_categories: item.secondary_categories,
            mood_tags: item.mood_tags.into_iter().collect(),
            cultural_context: item.cultural_context,
            vector_version,
            lease_owner: item.lease_owner,
            last_error: item.last_error,
            created_at: format_ts_iso(item.created_at),
            updated_at: format_ts_iso(item.updated_at),
        }
    }
}

pub async fn get_item(store: &dyn CatalogStore, id: &str) -> Result<ItemResponse, StoreError> {
    let item = store.get(id).await?;
    let version = store.vector_version(id).await?;
    Ok(ItemResponse::new(item, version))
}

/// Items in `status` oldest first, or all items most recent first.
pub async fn list_items(
    store: &dyn CatalogStore,
    status: Option<Status>,
    limit: usize,
) -> Result<Vec<ItemResponse>, StoreError> {
    let items = match status {
        Some(status) => store.list_by_status(status, limit).await?,
        None => store.list_recent(limit).await?,
    };
    Ok(items
        .into_iter()
        .map(|item| ItemResponse::new(item, None))
        .collect())
}

/// `cortex get <id>`
pub async fn run_get(store: &dyn CatalogStore, id: &str) -> Result<()> {
    let item = get_item(store, id).await?;

    println!("--- Item ---");
    println!("id:           {}", item.id);
    println!("status:       {}", item.status);
    println!("title:        {}", item.title);
    if let Some(ref artist) = item.artist {
        println!("artist:       {}", artist);
    }
    if let Some(ref album) = item.album {
        println!("album:        {}", album);
    }
    if let Some(secs) = item.duration_secs {
        println!("duration:     {}s", secs);
    }
    println!("license:      {}", item.license);
    println!("source:       {} / {}", item.source, item.source_id);
    println!("source_url:   {}", item.source_url);
    if let Some(ref url) = item.media_url {
        println!("media_url:    {}", url);
    }
    if let Some(ref category) = item.category {
        println!("category:     {}", category);
        if !item.secondary_categories.is_empty() {
            println!("also:         {}", item.secondary_categories.join(", "));
        }
        println!("moods:        {}", item.mood_tags.join(", "));
    }
    if let Some(ref context) = item.cultural_context {
        println!("context:      {}", context);
    }
    if let Some(version) = item.vector_version {
        println!("vector:       v{}", version);
    }
    if let Some(ref owner) = item.lease_owner {
        println!("leased by:    {}", owner);
    }
    if item.attempts > 0 {
        println!("attempts:     {}", item.attempts);
    }
    if let Some(ref err) = item.last_error {
        println!("last error:   {}", err);
    }
    println!("created_at:   {}", item.created_at);
    println!("updated_at:   {}", item.updated_at);
    Ok(())
}

/// `cortex list`
pub async fn run_list(
    store: &dyn CatalogStore,
    status: Option<Status>,
    limit: usize,
) -> Result<()> {
    let items = list_items(store, status, limit).await?;
    if items.is_empty() {
        println!("No items.");
        return Ok(());
    }

    println!("{:<36}  {:<26}  {:<20}  {}", "ID", "STATUS", "UPDATED", "TITLE");
    for item in &items {
        let title = match item.artist {
            Some(ref artist) => format!("{} - {}", artist, item.title),
            None => item.title.clone(),
        };
        println!(
            "{:<36}  {:<26}  {:<20}  {}",
            item.id,
            item.status.as_str(),
            item.updated_at,
            title
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_cortex_core::license::LicenseKind;
    use radio_cortex_core::models::NewItem;
    use radio_cortex_core::store::memory::InMemoryStore;
    use radio_cortex_core::store::{ItemStore, VectorIndex};

    fn candidate(n: usize) -> NewItem {
        NewItem {
            source: "test".into(),
            source_id: n.to_string(),
            title: format!("track {n}"),
            artist: Some("Nara Leão".into()),
            album: None,
            duration_secs: Some(150),
            license_raw: Some("CC BY".into()),
            license_kind: LicenseKind::CcBy,
            source_url: format!("https://example.org/{n}"),
            media_url: None,
            collected_by: "test".into(),
        }
    }

    #[tokio::test]
    async fn test_get_item_includes_vector_version() {
        let store = InMemoryStore::new(2);
        let item = store.insert(candidate(1), 0).await.unwrap();
        store.upsert_vector(&item.id, &[1.0, 0.0], "m", 0).await.unwrap();

        let resp = get_item(&store, &item.id).await.unwrap();
        assert_eq!(resp.vector_version, Some(1));
        assert_eq!(resp.license, "cc_by");
        assert_eq!(resp.created_at, "1970-01-01T00:00:00Z");

        assert!(matches!(
            get_item(&store, "nope").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_items_by_status_and_recent() {
        let store = InMemoryStore::new(2);
        for n in 0..3 {
            store.insert(candidate(n), n as i64 * 1000).await.unwrap();
        }
        let oldest: Vec<_> = list_items(&store, Some(Status::Discovered), 2)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.title)
            .collect();
        assert_eq!(oldest, ["track 0", "track 1"]);

        let recent = list_items(&store, None, 1).await.unwrap();
        assert_eq!(recent[0].title, "track 2");
        assert!(list_items(&store, Some(Status::Approved), 10).await.unwrap().is_empty());
    }
}
