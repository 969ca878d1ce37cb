//! Compressed-product expansion.
//!
//! Larger products ride the feed as zip archives. Expansion opens the
//! archive in memory and emits one product per entry, tagged with the
//! original receipt time and origin server. Unzipping is CPU work, so
//! concurrent expansions are bounded to the host's parallelism; callers
//! past the bound wait for a permit rather than spawning unbounded work.

use std::io::{Cursor, Read};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::product::{ContentType, Product};
use crate::segment::Timestamp;
use crate::Error;

/// Entries larger than this are truncated; nothing legitimate on the feed
/// approaches it.
const MAX_ENTRY_SIZE: u64 = 8 << 20;

/// Expands compressed products into their member products.
#[derive(Clone)]
pub struct Expander {
    permits: Arc<Semaphore>,
}

impl Expander {
    pub fn new() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Expander {
            permits: Arc::new(Semaphore::new(parallelism)),
        }
    }

    /// Expand `product` into one result per archive entry.
    ///
    /// A failed entry yields an `Err` in its place without aborting its
    /// siblings. An unreadable archive yields a single `Err`.
    pub async fn expand(&self, product: Product) -> Vec<Result<Product, Error>> {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            // The semaphore is never closed
            Err(_) => return Vec::new(),
        };

        match tokio::task::spawn_blocking(move || {
            let _permit = permit;
            expand_archive(product)
        })
        .await
        {
            Ok(results) => results,
            Err(e) => {
                log::error!("expansion task failed: {}", e);
                Vec::new()
            }
        }
    }
}

impl Default for Expander {
    fn default() -> Self {
        Self::new()
    }
}

fn expand_archive(product: Product) -> Vec<Result<Product, Error>> {
    let Product {
        filename,
        timestamp,
        contents,
        source,
        ..
    } = product;

    let mut results = Vec::new();
    let mut archive = match zip::ZipArchive::new(Cursor::new(contents)) {
        Ok(archive) => archive,
        Err(e) => {
            log::warn!("{}: unreadable archive: {}", filename, e);
            results.push(Err(Error::ArchiveFormat(e)));
            return results;
        }
    };

    log::trace!("{}: expanding {} entries", filename, archive.len());
    for index in 0..archive.len() {
        push_entry(&mut results, archive.by_index(index), timestamp, &source);
    }
    results
}

fn push_entry(
    results: &mut Vec<Result<Product, Error>>,
    entry: zip::result::ZipResult<zip::read::ZipFile>,
    timestamp: Timestamp,
    source: &str,
) {
    let mut entry = match entry {
        Ok(entry) => entry,
        Err(e) => {
            results.push(Err(Error::ArchiveFormat(e)));
            return;
        }
    };

    let mut contents = vec![0u8; entry.size().clamp(0, MAX_ENTRY_SIZE) as usize];
    if let Err(e) = entry.read_exact(&mut contents) {
        let filename = entry.name().to_string();
        log::warn!("{}: unreadable entry: {}", filename, e);
        results.push(Err(Error::ArchiveMember(filename)));
        return;
    }
    let filename = entry.name().to_uppercase();
    drop(entry);

    match ContentType::for_filename(&filename) {
        ContentType::Compressed => {
            // Nested archive: expand it in place
            match zip::ZipArchive::new(Cursor::new(contents)) {
                Ok(mut inner) => {
                    for index in 0..inner.len() {
                        push_entry(results, inner.by_index(index), timestamp, source);
                    }
                }
                Err(e) => {
                    log::warn!("{}: unreadable nested archive: {}", filename, e);
                    results.push(Err(Error::ArchiveMember(filename)));
                }
            }
        }
        content_type => results.push(Ok(Product {
            filename,
            timestamp,
            contents,
            content_type,
            source: source.to_string(),
        })),
    }
}
