//! Typed payloads for synthetic library entries and rewritten envelopes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use vl_core::{hash_name, Library};

const TEMPLATE_ID: &str = "470c3d1e3b5e4a0287ad485a5cf67207";
const TEMPLATE_ETAG: &str = "8281abb37d32a2b95db7e5a5df4407a4";
const TEMPLATE_DATE_CREATED: &str = "2025-04-19T09:07:17.0000000Z";
const DEFAULT_COLLECTION_TYPE: &str = "tvshows";
const SUBVIEWS: [&str; 6] = ["series", "studios", "genres", "episodes", "series", "folders"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserData {
    pub playback_position_ticks: u64,
    pub is_favorite: bool,
    pub played: bool,
}

/// A top-level library entry as it appears in views and item detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LibraryView {
    pub name: String,
    pub server_id: String,
    pub id: String,
    pub guid: String,
    pub etag: String,
    pub date_created: String,
    pub can_delete: bool,
    pub can_download: bool,
    pub presentation_unique_key: String,
    pub supports_sync: bool,
    pub sort_name: String,
    pub forced_sort_name: String,
    pub external_urls: Vec<Value>,
    pub taglines: Vec<String>,
    pub remote_trailers: Vec<Value>,
    pub provider_ids: Map<String, Value>,
    pub is_folder: bool,
    pub parent_id: String,
    #[serde(rename = "Type")]
    pub kind: String,
    pub user_data: UserData,
    pub child_count: u32,
    pub display_preferences_id: String,
    pub primary_image_aspect_ratio: f64,
    pub collection_type: String,
    pub image_tags: BTreeMap<String, String>,
    pub backdrop_image_tags: Vec<String>,
    pub locked_fields: Vec<String>,
    pub lock_data: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subviews: Option<Vec<String>>,
}

impl LibraryView {
    /// Entry injected into a user's views list.
    pub fn view(library: &Library, server_id: &str) -> Self {
        let mut view = Self::stamped(library);
        view.server_id = server_id.to_string();
        view
    }

    /// Body returned for a single-item lookup of a virtual library.
    pub fn detail(library: &Library) -> Self {
        let mut view = Self::stamped(library);
        view.subviews = Some(SUBVIEWS.iter().map(|s| s.to_string()).collect());
        view
    }

    fn stamped(library: &Library) -> Self {
        let id = hash_name(&library.name);
        Self {
            name: library.name.clone(),
            server_id: String::new(),
            id: id.clone(),
            guid: TEMPLATE_ID.into(),
            etag: TEMPLATE_ETAG.into(),
            date_created: TEMPLATE_DATE_CREATED.into(),
            can_delete: false,
            can_download: false,
            presentation_unique_key: TEMPLATE_ID.into(),
            supports_sync: true,
            sort_name: library.name.clone(),
            forced_sort_name: library.name.clone(),
            external_urls: Vec::new(),
            taglines: Vec::new(),
            remote_trailers: Vec::new(),
            provider_ids: Map::new(),
            is_folder: true,
            parent_id: "1".into(),
            kind: "CollectionFolder".into(),
            user_data: UserData {
                playback_position_ticks: 0,
                is_favorite: false,
                played: false,
            },
            child_count: 1,
            display_preferences_id: TEMPLATE_ID.into(),
            primary_image_aspect_ratio: 16.0 / 9.0,
            collection_type: library
                .collection_type
                .clone()
                .unwrap_or_else(|| DEFAULT_COLLECTION_TYPE.into()),
            image_tags: BTreeMap::from([("Primary".to_string(), id)]),
            backdrop_image_tags: Vec::new(),
            locked_fields: Vec::new(),
            lock_data: false,
            subviews: None,
        }
    }
}

/// A `{ Items, TotalRecordCount, ... }` query result.
///
/// Only the item array and count are touched; every other field the
/// upstream sent is carried through in `rest`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemsEnvelope {
    #[serde(rename = "Items", default)]
    pub items: Vec<Value>,
    #[serde(rename = "TotalRecordCount", default, skip_serializing_if = "Option::is_none")]
    pub total_record_count: Option<u64>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}
