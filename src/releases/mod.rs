use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use log::{debug, info, warn};
use reqwest::Url;
use serde::Deserialize;

use crate::engine::models::{RemoteInfo, RemoteSignature};
use crate::error::{ManagerError, Result};
use crate::networking::{Fetched, Fetcher};

/// Pieces of a `github.com/{owner}/{repo}/releases/download/{tag}/{asset}` URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseAssetUrl {
    pub owner: String,
    pub repo: String,
    pub tag: String,
    pub asset_name: String,
}

impl ReleaseAssetUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| ManagerError::Parse(format!("{url}: {e}")))?;
        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        match segments.as_slice() {
            [owner, repo, "releases", "download", tag, asset] => Ok(Self {
                owner: (*owner).to_owned(),
                repo: (*repo).to_owned(),
                tag: (*tag).to_owned(),
                asset_name: (*asset).to_owned(),
            }),
            _ => Err(ManagerError::Parse(format!(
                "{url} is not a release asset download URL"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub assets: Vec<GithubAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubAsset {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub browser_download_url: String,
}

/// Looks up release metadata for asset URLs so the cache can detect changes without
/// downloading content.
#[derive(Clone)]
pub struct ReleaseResolver {
    fetcher: Arc<dyn Fetcher>,
    api_base: String,
    rolling_tags: Vec<String>,
}

impl ReleaseResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>, api_base: &str, rolling_tags: &[String]) -> Self {
        Self {
            fetcher,
            api_base: api_base.trim_end_matches('/').to_owned(),
            rolling_tags: rolling_tags.to_vec(),
        }
    }

    /// API endpoint describing the release an asset URL belongs to.
    #[must_use]
    pub fn release_api_url(&self, asset: &ReleaseAssetUrl) -> String {
        let base = format!(
            "{}/repos/{}/{}/releases",
            self.api_base, asset.owner, asset.repo
        );
        if self.is_rolling(&asset.tag) {
            format!("{base}/latest")
        } else {
            format!("{base}/tags/{}", asset.tag)
        }
    }

    /// Resolve metadata for `url`. Any failure (bad URL shape, network, unknown asset)
    /// yields `None`; callers fall back to whatever they have cached.
    pub async fn resolve(&self, url: &str, cancel: &AtomicBool) -> Option<RemoteInfo> {
        match self.try_resolve(url, cancel).await {
            Ok(info) => info,
            Err(err) => {
                warn!("resolver: no metadata for {url}: {err}");
                None
            }
        }
    }

    async fn try_resolve(&self, url: &str, cancel: &AtomicBool) -> Result<Option<RemoteInfo>> {
        let asset_url = ReleaseAssetUrl::parse(url)?;
        let api_url = self.release_api_url(&asset_url);
        debug!("resolver: querying {api_url}");

        let body = match self.fetcher.fetch(&api_url, cancel, &mut |_, _| {}).await? {
            Fetched::Complete(body) => body,
            Fetched::Cancelled => return Err(ManagerError::Cancelled),
        };
        let release: GithubRelease = serde_json::from_slice(&body)?;

        let Some(asset) = release
            .assets
            .iter()
            .find(|a| a.name == asset_url.asset_name || a.browser_download_url == url)
        else {
            info!(
                "resolver: release {} has no asset named {}",
                release.tag_name, asset_url.asset_name
            );
            return Ok(None);
        };

        let signature = signature_for(&release, asset);
        if signature.is_none() {
            warn!("resolver: asset {} exposes no usable signature", asset.name);
        }
        Ok(Some(RemoteInfo {
            tag: Some(release.tag_name.clone()),
            published_at: release.published_at.clone(),
            download_url: url.to_owned(),
            signature,
        }))
    }

    fn is_rolling(&self, tag: &str) -> bool {
        self.rolling_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

fn signature_for(release: &GithubRelease, asset: &GithubAsset) -> Option<RemoteSignature> {
    let updated_at = asset.updated_at.clone().filter(|s| !s.trim().is_empty());
    if asset.id.is_none() && asset.size.is_none() && updated_at.is_none() {
        return None;
    }
    Some(RemoteSignature {
        tag: release.tag_name.clone(),
        asset_id: asset.id,
        updated_at,
        size: asset.size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::networking::ChunkCallback;

    const MOD_URL: &str =
        "https://github.com/CutesyThrower12/Nuphillion/releases/download/vInDev/nuphillion.zip";

    #[derive(Default)]
    struct StubFetcher {
        responses: HashMap<String, Vec<u8>>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(
            &self,
            url: &str,
            _cancel: &AtomicBool,
            _on_chunk: ChunkCallback<'_>,
        ) -> Result<Fetched> {
            self.requested.lock().unwrap().push(url.to_owned());
            self.responses
                .get(url)
                .cloned()
                .map(Fetched::Complete)
                .ok_or_else(|| ManagerError::HttpStatus {
                    url: url.to_owned(),
                    status: 404,
                })
        }
    }

    fn stub_resolver(responses: &[(&str, &str)]) -> (ReleaseResolver, Arc<StubFetcher>) {
        let stub = Arc::new(StubFetcher {
            responses: responses
                .iter()
                .map(|(url, body)| ((*url).to_owned(), body.as_bytes().to_vec()))
                .collect(),
            ..Default::default()
        });
        let resolver = ReleaseResolver::new(
            stub.clone(),
            "https://api.github.com/",
            &["vInDev".to_string(), "latest".to_string()],
        );
        (resolver, stub)
    }

    #[test]
    fn parses_release_asset_urls() {
        let parsed = ReleaseAssetUrl::parse(MOD_URL).unwrap();
        assert_eq!(parsed.owner, "CutesyThrower12");
        assert_eq!(parsed.repo, "Nuphillion");
        assert_eq!(parsed.tag, "vInDev");
        assert_eq!(parsed.asset_name, "nuphillion.zip");

        assert!(ReleaseAssetUrl::parse("https://github.com/owner/repo").is_err());
        assert!(ReleaseAssetUrl::parse("not a url").is_err());
    }

    #[test]
    fn rolling_tags_use_latest_endpoint() {
        let (resolver, _) = stub_resolver(&[]);
        let rolling = ReleaseAssetUrl::parse(MOD_URL).unwrap();
        assert_eq!(
            resolver.release_api_url(&rolling),
            "https://api.github.com/repos/CutesyThrower12/Nuphillion/releases/latest"
        );
        let pinned = ReleaseAssetUrl::parse(
            "https://github.com/CutesyThrower12/HW2-Original-Files/releases/download/1.0/hw2ogfiles.zip",
        )
        .unwrap();
        assert_eq!(
            resolver.release_api_url(&pinned),
            "https://api.github.com/repos/CutesyThrower12/HW2-Original-Files/releases/tags/1.0"
        );
    }

    #[tokio::test]
    async fn builds_signature_from_matching_asset() {
        let body = r#"{
            "tag_name": "vInDev",
            "published_at": "2025-01-02T03:04:05Z",
            "assets": [
                {"id": 1, "name": "other.zip", "size": 5, "updated_at": "x", "browser_download_url": "https://x"},
                {"id": 42, "name": "nuphillion.zip", "size": 1234, "updated_at": "2025-01-02T03:04:05Z",
                 "browser_download_url": "https://github.com/CutesyThrower12/Nuphillion/releases/download/vInDev/nuphillion.zip"}
            ]
        }"#;
        let (resolver, stub) = stub_resolver(&[(
            "https://api.github.com/repos/CutesyThrower12/Nuphillion/releases/latest",
            body,
        )]);
        let info = resolver
            .resolve(MOD_URL, &AtomicBool::new(false))
            .await
            .unwrap();
        assert_eq!(info.tag.as_deref(), Some("vInDev"));
        assert_eq!(
            info.signature,
            Some(RemoteSignature {
                tag: "vInDev".into(),
                asset_id: Some(42),
                updated_at: Some("2025-01-02T03:04:05Z".into()),
                size: Some(1234),
            })
        );
        assert_eq!(stub.requested.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn asset_without_identity_fields_has_no_signature() {
        let body = r#"{"tag_name": "vInDev", "assets": [{"name": "nuphillion.zip", "updated_at": ""}]}"#;
        let (resolver, _) = stub_resolver(&[(
            "https://api.github.com/repos/CutesyThrower12/Nuphillion/releases/latest",
            body,
        )]);
        let info = resolver
            .resolve(MOD_URL, &AtomicBool::new(false))
            .await
            .unwrap();
        assert!(info.signature.is_none());
    }

    #[tokio::test]
    async fn failures_resolve_to_none() {
        let (resolver, _) = stub_resolver(&[(
            "https://api.github.com/repos/CutesyThrower12/Nuphillion/releases/latest",
            r#"{"tag_name": "vInDev", "assets": [{"id": 1, "name": "elsewhere.zip"}]}"#,
        )]);
        let cancel = AtomicBool::new(false);
        assert!(resolver.resolve(MOD_URL, &cancel).await.is_none());
        assert!(
            resolver
                .resolve("https://example.com/not/a/release", &cancel)
                .await
                .is_none()
        );

        let (offline, _) = stub_resolver(&[]);
        assert!(offline.resolve(MOD_URL, &cancel).await.is_none());
    }
}
