//! HTTP file index.
//!
//! Treats an autoindex-style directory listing (Apache, nginx, mirror
//! front-ends) as the walker's environment. Not a browser: one GET per
//! page load, links read from `a[href]` in document order.

use std::path::{Path, PathBuf};

use scraper::{Html, Selector};
use secrecy::ExposeSecret;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Link, Page, Target};
use crate::walker::Site;

/// Build the HTTP client shared by the index and the table exporter.
pub fn build_client(config: &Config) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .user_agent(concat!("idxwalk/", env!("CARGO_PKG_VERSION")))
        .danger_accept_invalid_certs(config.skip_tls_verify);

    if let Some(ref proxy) = config.proxy_url {
        builder = builder.proxy(reqwest::Proxy::all(proxy.expose_secret())?);
    }

    Ok(builder.build()?)
}

/// GET `url` and return the body, failing on any non-2xx status.
pub async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Http {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(resp.text().await?)
}

/// GET `url` and return the raw body, failing on any non-2xx status.
pub async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Http {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(resp.bytes().await?.to_vec())
}

/// Parse `url` as a directory, so `join` appends instead of replacing the last segment.
pub(crate) fn dir_url(url: &str) -> Result<Url> {
    if url.ends_with('/') {
        Ok(Url::parse(url)?)
    } else {
        Ok(Url::parse(&format!("{url}/"))?)
    }
}

/// A directory listing served over HTTP(S).
pub struct HttpIndex {
    client: reqwest::Client,
    base: Url,
    download_dir: PathBuf,
}

impl HttpIndex {
    pub fn new(client: reqwest::Client, base_url: &str, download_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            client,
            base: dir_url(base_url)?,
            download_dir: download_dir.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(build_client(config)?, &config.base_url, &config.download_dir)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    fn url_for(&self, location: &str) -> Result<Url> {
        Ok(self.base.join(location.trim_start_matches('/'))?)
    }
}

impl Site for HttpIndex {
    async fn load(&self, location: &str) -> Result<Page> {
        let url = self.url_for(location)?;
        let body = fetch_text(&self.client, url.as_str()).await?;
        let links = parse_listing(&body, &url)?;
        debug!(%url, links = links.len(), "page loaded");
        Ok(Page {
            location: location.to_string(),
            links,
        })
    }

    async fn download(&self, target: &Target) -> Result<u64> {
        let file_name = safe_file_name(&target.file_name)?;
        let final_path = self.download_dir.join(file_name);

        if let Ok(meta) = tokio::fs::metadata(&final_path).await {
            if meta.is_file() {
                info!(file = %file_name, bytes = meta.len(), "already downloaded, skipping");
                return Ok(meta.len());
            }
        }

        let mut resp = self.client.get(&target.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                url: target.url.clone(),
            });
        }

        tokio::fs::create_dir_all(&self.download_dir).await?;
        let part_path = self.download_dir.join(format!("{file_name}.part"));

        // Stream into a .part file so an interrupted download never looks finished.
        let bytes = match stream_to_file(&mut resp, &part_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&part_path).await {
                    warn!(path = %part_path.display(), %rm, "cannot remove partial download");
                }
                return Err(e);
            }
        };

        tokio::fs::rename(&part_path, &final_path).await?;
        debug!(path = %final_path.display(), bytes, "saved");
        Ok(bytes)
    }
}

async fn stream_to_file(resp: &mut reqwest::Response, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut bytes = 0u64;
    while let Some(chunk) = resp.chunk().await? {
        file.write_all(&chunk).await?;
        bytes += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(bytes)
}

/// Extract links from a listing page, resolved against `page_url`.
pub(crate) fn parse_listing(html: &str, page_url: &Url) -> Result<Vec<Link>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]")
        .map_err(|e| Error::Other(format!("bad selector: {e:?}")))?;

    let links = document
        .select(&selector)
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter_map(|href| page_url.join(href).ok())
        .filter_map(|url| {
            let file_name = url
                .path_segments()?
                .filter(|segment| !segment.is_empty())
                .next_back()?
                .to_string();
            Some(Link {
                url: url.to_string(),
                file_name,
            })
        })
        .collect();

    Ok(links)
}

fn safe_file_name(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::Other(format!("refusing to save as {name:?}")));
    }
    Ok(name)
}
