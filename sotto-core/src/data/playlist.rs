use std::sync::Arc;

use serde::Deserialize;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Playlist {
    pub id: Arc<str>,
    pub name: Arc<str>,
    #[serde(default)]
    pub user_id: Option<Arc<str>>,
    #[serde(default)]
    pub created_at: Option<Arc<str>>,
}
