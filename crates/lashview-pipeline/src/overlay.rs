//! Overlay asset lookup and loading.
//!
//! The pipeline never touches the network or the filesystem directly. An
//! [`AssetStore`] resolves a style to a location string and fetches its
//! bytes; [`load_overlay`] races that fetch plus the PNG decode against a
//! deadline and reports every failure as an [`OverlayLoadError`] carrying
//! the attempted location.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::style::StyleId;
use crate::timeout::{TimeoutError, run_with_timeout};
use crate::types::RgbaImage;

/// Source of overlay images, keyed by style.
pub trait AssetStore: Send + Sync {
    /// Location (URL or path) of the style's overlay PNG.
    fn locate(&self, style: StyleId) -> String;

    /// Fetch the bytes stored at `location`.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure when the asset can not be
    /// read.
    fn fetch(&self, location: &str) -> Result<Vec<u8>, String>;
}

/// Overlays stored as `<root>/<style-id>.png`.
#[derive(Debug, Clone)]
pub struct DirectoryAssetStore {
    root: PathBuf,
}

impl DirectoryAssetStore {
    /// Serve overlays from `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetStore for DirectoryAssetStore {
    fn locate(&self, style: StyleId) -> String {
        self.root
            .join(format!("{}.png", style.as_str()))
            .to_string_lossy()
            .into_owned()
    }

    fn fetch(&self, location: &str) -> Result<Vec<u8>, String> {
        std::fs::read(location).map_err(|e| e.to_string())
    }
}

/// Overlays held in memory, for tests and hosts that bundle their assets.
///
/// Locations are `memory://<style-id>`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAssetStore {
    assets: HashMap<String, Vec<u8>>,
}

impl InMemoryAssetStore {
    /// An empty store; every fetch fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store encoded overlay bytes for `style`.
    #[must_use]
    pub fn with_asset(mut self, style: StyleId, bytes: Vec<u8>) -> Self {
        self.insert(style, bytes);
        self
    }

    /// Store encoded overlay bytes for `style`, replacing any previous.
    pub fn insert(&mut self, style: StyleId, bytes: Vec<u8>) {
        self.assets.insert(self.locate(style), bytes);
    }
}

impl AssetStore for InMemoryAssetStore {
    fn locate(&self, style: StyleId) -> String {
        format!("memory://{}", style.as_str())
    }

    fn fetch(&self, location: &str) -> Result<Vec<u8>, String> {
        self.assets
            .get(location)
            .cloned()
            .ok_or_else(|| format!("no asset at {location}"))
    }
}

/// Why an overlay could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayLoadReason {
    /// The store could not read the asset.
    Fetch(String),
    /// The bytes are not a decodable image.
    Decode(String),
    /// Fetch and decode did not finish in time.
    Timeout(Duration),
}

impl std::fmt::Display for OverlayLoadReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(reason) => write!(f, "fetch failed: {reason}"),
            Self::Decode(reason) => write!(f, "decode failed: {reason}"),
            Self::Timeout(after) => write!(f, "timed out after {after:?}"),
        }
    }
}

/// An overlay asset failed to load.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to load overlay {url}: {reason}")]
pub struct OverlayLoadError {
    /// The location that was attempted.
    pub url: String,
    /// What went wrong.
    pub reason: OverlayLoadReason,
}

/// Fetch and decode the overlay for `style`, giving up after `timeout`.
///
/// No retries are made; a failure is reported once and the caller
/// decides what to do.
///
/// # Errors
///
/// Returns [`OverlayLoadError`] when the fetch fails, the bytes do not
/// decode, or the deadline passes first.
pub fn load_overlay(
    store: &Arc<dyn AssetStore>,
    style: StyleId,
    timeout: Duration,
) -> Result<RgbaImage, OverlayLoadError> {
    let url = store.locate(style);
    tracing::debug!(%style, %url, "loading overlay");

    let worker = Arc::clone(store);
    let location = url.clone();
    let outcome = run_with_timeout(timeout, move || -> Result<RgbaImage, OverlayLoadReason> {
        let bytes = worker.fetch(&location).map_err(OverlayLoadReason::Fetch)?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| OverlayLoadReason::Decode(e.to_string()))?;
        Ok(decoded.to_rgba8())
    });

    let reason = match outcome {
        Ok(Ok(image)) => return Ok(image),
        Ok(Err(reason)) => reason,
        Err(TimeoutError::Elapsed(after)) => OverlayLoadReason::Timeout(after),
        Err(other) => OverlayLoadReason::Fetch(other.to_string()),
    };
    tracing::warn!(%style, %url, %reason, "overlay load failed");
    Err(OverlayLoadError { url, reason })
}
