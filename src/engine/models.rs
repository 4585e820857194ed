use serde::{Deserialize, Serialize};

/// Remote metadata tuple used to detect a changed asset without downloading it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSignature {
    pub tag: String,
    pub asset_id: Option<u64>,
    pub updated_at: Option<String>,
    pub size: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteInfo {
    pub tag: Option<String>,
    pub published_at: Option<String>,
    pub download_url: String,
    pub signature: Option<RemoteSignature>,
}

/// One entry of `mod_cache.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    pub download_url: String,
    #[serde(default)]
    pub signature: Option<RemoteSignature>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub cached_at: Option<String>,
}

/// A named package the manager can acquire and cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub url: String,
}

impl Asset {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}
