use futures::{StreamExt, stream};
use image::ImageOutputFormat;
use reqwest::Client;
use serde::Serialize;
use std::io::Cursor;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::config::ImageConfig;
use crate::engine::EngineEvent;
use crate::utils::error::{AppError, Result};

/// PNG-encoded product thumbnail.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing)]
    pub png: Vec<u8>,
}

impl std::fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thumbnail")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("png_bytes", &self.png.len())
            .finish()
    }
}

/// Decodes an image and scales it to fit a `size`×`size` box, keeping the
/// aspect ratio.
pub fn make_thumbnail(bytes: &[u8], size: u32) -> Result<Thumbnail> {
    let decoded = image::load_from_memory(bytes)?;
    let scaled = decoded.thumbnail(size, size);

    let mut png = Cursor::new(Vec::new());
    scaled.write_to(&mut png, ImageOutputFormat::Png)?;

    Ok(Thumbnail {
        width: scaled.width(),
        height: scaled.height(),
        png: png.into_inner(),
    })
}

#[derive(Debug, Clone)]
pub struct ImageDownloader {
    http: Client,
    thumbnail_size: u32,
    max_concurrent: usize,
}

impl ImageDownloader {
    pub fn new(config: &ImageConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;
        Ok(Self {
            http,
            thumbnail_size: config.thumbnail_size,
            max_concurrent: config.max_concurrent.max(1),
        })
    }

    pub async fn fetch_thumbnail(&self, url: &str) -> Result<Thumbnail> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Api {
                status: status.as_u16(),
                body: format!("image {} not available", url),
            });
        }
        let bytes = response.bytes().await?;
        make_thumbnail(&bytes, self.thumbnail_size)
    }

    /// Resolves every `(row, url)` job, sending one `ImageReady` per job in
    /// job order and a final `ImagesDone`. A failed image yields `None`.
    pub async fn run(&self, batch: u64, jobs: Vec<(usize, String)>, events: UnboundedSender<EngineEvent>) {
        let total = jobs.len();
        let mut results = stream::iter(jobs)
            .map(|(row, url)| async move {
                let thumbnail = match self.fetch_thumbnail(&url).await {
                    Ok(thumbnail) => Some(thumbnail),
                    Err(e) => {
                        warn!("Thumbnail for row {} unavailable ({}): {}", row, url, e);
                        None
                    }
                };
                (row, thumbnail)
            })
            .buffered(self.max_concurrent);

        while let Some((row, thumbnail)) = results.next().await {
            if events.send(EngineEvent::ImageReady { batch, row, thumbnail }).is_err() {
                debug!("Engine gone, dropping remaining thumbnails");
                return;
            }
        }

        debug!("Thumbnail batch of {} finished", total);
        let _ = events.send(EngineEvent::ImagesDone { batch });
    }
}
