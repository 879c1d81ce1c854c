use std::sync::Arc;

use serde::Deserialize;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Track {
    pub id: Arc<str>,
    pub title: Arc<str>,
    pub artist: Arc<str>,
    pub file_url: Arc<str>,
    #[serde(default)]
    pub user_id: Option<Arc<str>>,
    #[serde(default)]
    pub created_at: Option<Arc<str>>,
}
