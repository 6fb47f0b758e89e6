//! Utility functions
//!
use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use reqwest::Client;

/// Resolve `model` to a local file.
///
/// Local paths are returned as they are. `http(s)://` URLs are downloaded once into `cache_dir`
/// and reused afterwards.
pub async fn fetch_model(client: &Client, model: &str, cache_dir: &Path) -> Result<PathBuf> {
    if !is_url(model) {
        let path = PathBuf::from(model);
        if !path.is_file() {
            bail!("model file {} does not exist", path.display());
        }
        return Ok(path);
    }

    let filepath = cache_dir.join(cached_file_name(model));
    if filepath.is_file() {
        log::info!("Using cached model {}", filepath.display());
        return Ok(filepath);
    }

    std::fs::create_dir_all(cache_dir)
        .with_context(|| format!("failed to create {}", cache_dir.display()))?;
    log::info!("Downloading model from {}", model);
    download_file(client, model, &filepath).await?;

    Ok(filepath)
}

/// Download a file from a URL to a given filepath.
pub async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<Path>,
) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    // Write to a temporary name first so an interrupted download is never picked up as cached
    let filepath = filepath.as_ref();
    let partial = filepath.with_extension("part");
    let mut file = File::create(&partial)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;
    drop(file);
    std::fs::rename(&partial, filepath)?;

    Ok(())
}

/// Default directory for downloaded models.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("classifier")
}

fn is_url(model: &str) -> bool {
    model.starts_with("http://") || model.starts_with("https://")
}

/// Last path segment of the URL, without query or fragment.
fn cached_file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() && !name.contains(':') => name.to_owned(),
        _ => "model.onnx".to_owned(),
    }
}
