use std::borrow::Cow;

use crate::reassembly::CompletedBundle;
use crate::segment::Timestamp;

/// Broad classification of a product's payload, a pure function of its
/// filename extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// A text bulletin.
    Text,
    /// A graphic.
    Image,
    /// A zip archive carrying further products.
    Compressed,
    /// Anything else.
    Unknown,
}

impl ContentType {
    pub fn for_filename(filename: &str) -> Self {
        let extension = filename
            .rsplit('.')
            .next()
            .map(|extension| extension.to_ascii_uppercase());
        match extension.as_deref() {
            Some("TXT") => ContentType::Text,
            Some("GIF") | Some("JPG") | Some("JPEG") | Some("PNG") => ContentType::Image,
            Some("ZIP") => ContentType::Compressed,
            _ => ContentType::Unknown,
        }
    }
}

/// A fully reassembled data product.
#[derive(Debug, Clone)]
pub struct Product {
    /// The filename of the data product.
    pub filename: String,
    /// Wire timestamp of the broadcast that carried the product.
    pub timestamp: Timestamp,
    /// The binary contents of the data product.
    pub contents: Vec<u8>,
    /// Payload classification, derived from the filename.
    pub content_type: ContentType,
    /// The relay that delivered the product, for diagnostics.
    pub source: String,
}

impl Product {
    /// Assemble a completed bundle into a product.
    ///
    /// Blocks are concatenated in order. V1 pads text products out to the
    /// fixed block size with NULs, so text content has trailing NULs
    /// trimmed from the final block. Only the final block: embedded NULs
    /// elsewhere are data, and binary content is never trimmed.
    pub fn from_bundle(bundle: CompletedBundle) -> Self {
        let filename = bundle.filename().to_string();
        let timestamp = bundle.timestamp();
        let source = bundle.source().to_string();
        let content_type = ContentType::for_filename(&filename);

        let segments = bundle.into_segments();
        let last = segments.len() - 1;
        let mut contents = Vec::with_capacity(segments.iter().map(|s| s.content.len()).sum());
        for (index, segment) in segments.iter().enumerate() {
            let mut block: &[u8] = &segment.content;
            if content_type == ContentType::Text && index == last {
                block = trim_trailing_nuls(block);
            }
            contents.extend_from_slice(block);
        }

        Product {
            filename,
            timestamp,
            contents,
            content_type,
            source,
        }
    }

    /// The expected MIME type of this product, if known.
    pub fn mime_type(&self) -> Option<&'static str> {
        let extension = self
            .filename
            .rsplit('.')
            .next()
            .map(|extension| extension.to_ascii_uppercase());
        Some(match extension.as_deref() {
            Some("TXT") => "text/plain",
            Some("GIF") => "image/gif",
            Some("JPG") | Some("JPEG") => "image/jpeg",
            Some("PNG") => "image/png",
            Some("ZIP") => "application/zip",
            _ => return None,
        })
    }

    pub fn string_contents(&self) -> Cow<str> {
        String::from_utf8_lossy(&self.contents)
    }

    pub fn into_string_lossy(self) -> String {
        // Assume it's valid UTF-8
        match String::from_utf8(self.contents) {
            Ok(string) => string,
            Err(e) => {
                // That's surprising
                log::debug!("{} was not valid UTF-8; converting lossily", self.filename);

                String::from_utf8_lossy(&e.into_bytes()).into_owned()
            }
        }
    }
}

fn trim_trailing_nuls(mut block: &[u8]) -> &[u8] {
    while let [head @ .., 0] = block {
        block = head;
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reassembly::Reassembler;
    use crate::segment::{Segment, Version};
    use bytes::Bytes;

    fn bundle_of(filename: &str, blocks: &[&[u8]]) -> CompletedBundle {
        let mut reassembler = Reassembler::new();
        let mut completed = None;
        for (index, content) in blocks.iter().enumerate() {
            let segment = Segment {
                filename: filename.to_string(),
                block_number: index as u32 + 1,
                total_blocks: blocks.len() as u32,
                checksum: content.iter().map(|&b| b as u32).sum(),
                timestamp: crate::Timestamp::parse("6/5/2015 12:56:00 AM").unwrap(),
                version: Version::V1,
                declared_length: content.len() as u32,
                content: Bytes::copy_from_slice(content),
                source: "test".to_string(),
            };
            completed = reassembler.submit(segment);
        }
        completed.expect("all blocks submitted")
    }

    #[test]
    fn classifies_by_extension() {
        assert_eq!(ContentType::for_filename("A.TXT"), ContentType::Text);
        assert_eq!(ContentType::for_filename("a.txt"), ContentType::Text);
        assert_eq!(ContentType::for_filename("RAD.GIF"), ContentType::Image);
        assert_eq!(ContentType::for_filename("SAT.JPG"), ContentType::Image);
        assert_eq!(ContentType::for_filename("MAP.PNG"), ContentType::Image);
        assert_eq!(ContentType::for_filename("BATCH.ZIP"), ContentType::Compressed);
        assert_eq!(ContentType::for_filename("DATA.BIN"), ContentType::Unknown);
        assert_eq!(ContentType::for_filename("NOEXT"), ContentType::Unknown);
    }

    #[test]
    fn concatenates_blocks_in_order() {
        let product = Product::from_bundle(bundle_of("A.TXT", &[b"one ", b"two ", b"three"]));
        assert_eq!(product.contents, b"one two three");
        assert_eq!(product.content_type, ContentType::Text);
    }

    #[test]
    fn trims_padding_from_the_final_text_block_only() {
        let product = Product::from_bundle(bundle_of(
            "A.TXT",
            &[b"head\0\0mid", b"tail\0\0\0\0"],
        ));
        // The embedded NULs in the first block are data; only the final
        // block's tail is padding
        assert_eq!(product.contents, b"head\0\0midtail");
    }

    #[test]
    fn never_trims_binary_content() {
        let product = Product::from_bundle(bundle_of("RAD.GIF", &[b"image\0\0\0"]));
        assert_eq!(product.contents, b"image\0\0\0");
    }

    #[test]
    fn mime_types() {
        let product = Product::from_bundle(bundle_of("A.TXT", &[b"x"]));
        assert_eq!(product.mime_type(), Some("text/plain"));

        let product = Product::from_bundle(bundle_of("DATA.BIN", &[b"x"]));
        assert_eq!(product.mime_type(), None);
    }
}
