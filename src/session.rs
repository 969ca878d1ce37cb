//! Connection management.
//!
//! One session owns one logical connection at a time: dial the next
//! server in rotation, log on, and pump bytes into the decoder until the
//! connection ends, then pause and try the next server. There is no
//! application-level acknowledgment; a watchdog closes connections that
//! go quiet or degenerate into decode errors.

use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use crate::config::Config;
use crate::dedup::DuplicateFilter;
use crate::expand::Expander;
use crate::frame::{obfuscate, Frame, FrameDecoder};
use crate::product::{ContentType, Product};
use crate::reassembly::Reassembler;
use crate::segment::Segment;
use crate::server_list::ServerList;
use crate::stream::Event;
use crate::Error;

/// Bound on a single connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
/// Fixed pause between connection attempts.
const RETRY_DELAY: Duration = Duration::from_secs(5);
/// Watchdog tick; also the longest a dead connection can linger.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(20);
/// Decode errors tolerated per connection before the watchdog closes it.
const MAX_DECODE_ERRORS: u32 = 10;

pub(crate) struct Session {
    config: Config,
    servers: ServerList,
    next_server: usize,
    reassembler: Reassembler,
    dedup: DuplicateFilter,
    expander: Expander,
    events: mpsc::Sender<Result<Event, Error>>,
    cancel: watch::Receiver<bool>,
}

impl Session {
    pub fn new(
        config: Config,
        events: mpsc::Sender<Result<Event, Error>>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let metrics = config.metrics.clone();
        Session {
            servers: config.servers.clone(),
            next_server: 0,
            reassembler: Reassembler::with_metrics(config.bundle_ttl, metrics.clone()),
            dedup: DuplicateFilter::with_metrics(config.dedup_ttl, metrics),
            expander: Expander::new(),
            config,
            events,
            cancel,
        }
    }

    /// Reconnect loop. Runs until cancelled; no network condition ends it.
    pub async fn run(mut self) {
        let mut cancel = self.cancel.clone();
        while !*cancel.borrow() {
            let address = self.pick_server();
            log::debug!("connecting to {}", address);
            match self.connect_and_drive(&address).await {
                Ok(()) => log::info!("{}: connection closed", address),
                Err(e) => {
                    log::warn!("{}: {}", address, e);
                    self.report(Err(e)).await;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(RETRY_DELAY) => {}
                _ = cancel.changed() => {}
            }
        }
        log::debug!("session cancelled");
    }

    fn pick_server(&mut self) -> String {
        if self.servers.primary().is_empty() {
            log::warn!("server list has no primary entries; reverting to defaults");
            self.servers = ServerList::default();
            self.next_server = 0;
        }
        let primary = self.servers.primary();
        let address = primary[self.next_server % primary.len()].clone();
        self.next_server = (self.next_server + 1) % primary.len();
        address
    }

    async fn connect_and_drive(&mut self, address: &str) -> Result<(), Error> {
        let stream = self.connect(address).await?;
        self.config.metrics.connected();
        let result = self.drive(address, stream).await;
        self.config.metrics.disconnected();
        result
    }

    async fn connect(&self, address: &str) -> Result<TcpStream, Error> {
        let connect_error = |e| Error::Connect(address.to_string(), e);

        let addr = lookup_host(address)
            .await
            .map_err(connect_error)?
            .next()
            .ok_or_else(|| {
                connect_error(io::Error::new(
                    io::ErrorKind::NotFound,
                    "hostname resolved to no addresses",
                ))
            })?;

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                connect_error(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connection attempt timed out",
                ))
            })?
            .map_err(connect_error)?;

        // Dead peers otherwise linger until the watchdog notices
        socket2::SockRef::from(&stream)
            .set_keepalive(true)
            .map_err(connect_error)?;

        Ok(stream)
    }

    async fn drive(&mut self, address: &str, mut stream: TcpStream) -> Result<(), Error> {
        if *self.cancel.borrow() {
            return Ok(());
        }

        // The server expects the logon before it sends anything
        let mut logon = format!("ByteBlast Client|NM-{}|V2", self.config.email).into_bytes();
        obfuscate(&mut logon);
        stream.write_all(&logon).await?;

        let mut decoder = FrameDecoder::new(address);
        let mut buf = BytesMut::with_capacity(64 * 1024);
        let mut watchdog = interval_at(Instant::now() + WATCHDOG_INTERVAL, WATCHDOG_INTERVAL);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut bytes_since_tick: usize = 0;
        let mut decode_errors: u32 = 0;
        let mut cancel = self.cancel.clone();

        loop {
            tokio::select! {
                read = stream.read_buf(&mut buf) => {
                    let count = read?;
                    if count == 0 {
                        // Closed by peer
                        return Ok(());
                    }
                    bytes_since_tick += count;
                    self.config.metrics.bytes_received(count);
                    self.drain_decoder(&mut decoder, &mut buf, &mut decode_errors).await;
                }
                _ = watchdog.tick() => {
                    if bytes_since_tick == 0 {
                        return Err(Error::IdleTimeout(address.to_string()));
                    }
                    if decode_errors > MAX_DECODE_ERRORS {
                        return Err(Error::TooManyDecodeErrors(address.to_string(), decode_errors));
                    }
                    bytes_since_tick = 0;
                    self.reassembler.sweep();
                    self.dedup.sweep();
                }
                _ = cancel.changed() => {
                    return Ok(());
                }
            }
        }
    }

    async fn drain_decoder(
        &mut self,
        decoder: &mut FrameDecoder,
        buf: &mut BytesMut,
        decode_errors: &mut u32,
    ) {
        while let Some(result) = decoder.next_frame(buf) {
            match result {
                Ok(Frame::Segment(segment)) => {
                    self.config.metrics.segment_decoded();
                    self.handle_segment(segment).await;
                }
                Ok(Frame::ServerList(list)) => self.handle_server_list(list).await,
                Err(e) => {
                    *decode_errors += 1;
                    self.config.metrics.decode_error();
                    self.config.metrics.resync();
                    log::debug!("decode error: {}", e);
                    self.report(Err(Error::Decode(e))).await;
                }
            }
        }
    }

    async fn handle_segment(&mut self, segment: Segment) {
        if let Some(filter) = &self.config.segment_filter {
            if !filter(&segment) {
                return;
            }
        }
        if let Some(bundle) = self.reassembler.submit(segment) {
            self.handle_product(Product::from_bundle(bundle)).await;
        }
    }

    async fn handle_product(&mut self, product: Product) {
        if let Some(filter) = &self.config.product_filter {
            if !filter(&product) {
                return;
            }
        }

        // Fingerprint the assembled product as delivered on the wire:
        // a re-broadcast archive is suppressed without re-expansion
        if !self.dedup.check_and_insert(&product.filename, &product.contents) {
            log::debug!("{}: duplicate suppressed", product.filename);
            return;
        }

        if product.content_type == ContentType::Compressed {
            // Expansion is the one CPU-bound stage; it runs off the
            // decode path so a flurry of archives cannot stall the feed
            let expander = self.expander.clone();
            let events = self.events.clone();
            let metrics = self.config.metrics.clone();
            tokio::spawn(async move {
                for result in expander.expand(product).await {
                    if result.is_ok() {
                        metrics.product_delivered();
                    }
                    if events.send(result.map(Event::Product)).await.is_err() {
                        break;
                    }
                }
            });
        } else {
            self.config.metrics.product_delivered();
            self.report(Ok(Event::Product(product))).await;
        }
    }

    async fn handle_server_list(&mut self, list: ServerList) {
        if !self.config.adopt_server_lists {
            log::debug!("ignoring wire-delivered server list");
            return;
        }
        log::info!(
            "adopting wire-delivered server list: {} primary, {} satellite",
            list.primary().len(),
            list.satellite().len()
        );
        self.config.metrics.server_list_adopted();
        self.servers = list.clone();
        self.next_server = 0;
        self.report(Ok(Event::ServerListUpdated(list))).await;
    }

    async fn report(&self, event: Result<Event, Error>) {
        // A send fails only when the stream is gone; cancellation will
        // stop the loop shortly
        let _ = self.events.send(event).await;
    }
}
