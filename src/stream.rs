use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::product::Product;
use crate::server_list::ServerList;
use crate::session::Session;
use crate::Error;

/// Something the client delivered.
#[derive(Debug)]
pub enum Event {
    /// A complete product was received and survived duplicate
    /// suppression. Compressed products arrive already expanded, one
    /// event per archive entry.
    Product(Product),
    /// The network delivered a replacement server pool, and the client
    /// adopted it.
    ServerListUpdated(ServerList),
}

/// A live stream of products from the ByteBlaster network.
///
/// `Stream` implements `futures::stream::Stream`, producing
/// `Result<Event, Error>` when polled.
///
/// The `Stream` will keep receiving until it's dropped, even if it
/// reports errors: connections are retried across the relay pool, decode
/// errors resynchronize, and nothing the network sends can end the
/// stream. Errors are diagnostic.
///
/// The sequence of products has no guaranteed order beyond arrival order
/// on the active connection. The sequence may have gaps: the broadcast
/// has no acknowledgment or replay, and whatever is missed while
/// reconnecting is gone.
///
/// Must be created inside a tokio runtime.
///
/// # Example
///
/// ```no_run
/// # tokio_test::block_on(async {
/// use futures::StreamExt;
///
/// let mut stream = emwin_byteblaster::Stream::new("you@example.com");
///
/// while let Some(event) = stream.next().await {
///     match event {
///         Ok(emwin_byteblaster::Event::Product(product)) => {
///             println!("{}: {} bytes", product.filename, product.contents.len());
///         }
///         Ok(emwin_byteblaster::Event::ServerListUpdated(list)) => {
///             println!("relay pool now has {} servers", list.primary().len());
///         }
///         Err(error) => {
///             // The stream continues, automatically retrying as needed
///             eprintln!("uh oh: {}", error);
///         }
///     }
/// }
/// # })
/// ```
#[derive(Debug)]
pub struct Stream {
    events: mpsc::Receiver<Result<Event, Error>>,
    cancel: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl Stream {
    /// Connect to the public relay pool with a default configuration.
    ///
    /// `email` identifies the client in the logon line; the relay
    /// operators ask that it be a reachable address.
    pub fn new(email: impl Into<String>) -> Self {
        Self::with_config(Config::new(email))
    }

    /// Start a client with explicit configuration.
    pub fn with_config(config: Config) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let session = Session::new(config, events_tx, cancel_rx);
        let task = tokio::spawn(session.run());
        Stream {
            events: events_rx,
            cancel: cancel_tx,
            task,
        }
    }
}

impl futures::Stream for Stream {
    type Item = Result<Event, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        // Cooperative shutdown: close the socket, end the reconnect loop
        let _ = self.cancel.send(true);
        // Backstop for a session parked outside its select loop
        self.task.abort();
    }
}
