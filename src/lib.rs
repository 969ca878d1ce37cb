//! # `emwin-byteblaster`
//!
//! A Rust client for the [NWS Emergency Managers Weather Information
//! Network](https://www.weather.gov/emwin/) ByteBlaster relay network.
//!
//! EMWIN is [one of several](https://www.weather.gov/nwws/dissemination)
//! platforms through which the National Weather Service distributes text
//! products. The ByteBlaster network re-broadcasts the EMWIN satellite
//! feed over plain TCP: volunteer relay servers push a continuous stream
//! of "Quick Block Transfer" blocks to anyone who connects, with no
//! registration and no acknowledgment.
//!
//! This crate speaks that protocol: it decodes the self-synchronizing
//! byte stream into blocks, reassembles blocks into complete products,
//! suppresses the feed's routine duplicates, expands compressed
//! deliveries, and keeps a connection alive against an unreliable pool of
//! public servers.
//!
//! # Example
//!
//! ```no_run
//! # tokio_test::block_on(async {
//! use futures::StreamExt;
//!
//! let mut stream = emwin_byteblaster::Stream::new("you@example.com");
//!
//! while let Some(event) = stream.next().await {
//!     match event {
//!         Ok(emwin_byteblaster::Event::Product(product)) => {
//!             // Handle the product
//!             println!("{}: {} bytes", product.filename, product.contents.len());
//!         }
//!         Ok(emwin_byteblaster::Event::ServerListUpdated(_)) => {}
//!         Err(error) => {
//!             // Stream continues, automatically retrying as needed
//!             eprintln!("uh oh: {}", error);
//!         }
//!     }
//! }
//! # })
//! ```

#![forbid(unsafe_code)]

mod config;
mod dedup;
mod error;
mod expand;
mod frame;
mod metrics;
mod product;
mod reassembly;
mod segment;
mod server_list;
mod session;
mod stream;

pub use config::{Config, ProductFilter, SegmentFilter};
pub use dedup::DuplicateFilter;
pub use error::Error;
pub use expand::Expander;
pub use frame::{DecodeError, Frame, FrameDecoder};
pub use metrics::{Metrics, NoMetrics};
pub use product::{ContentType, Product};
pub use reassembly::{CompletedBundle, Reassembler};
pub use segment::{Segment, Timestamp, Version};
pub use server_list::ServerList;
pub use stream::{Event, Stream};
