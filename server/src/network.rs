//! TCP listener and per-connection session spawning
//!
//! Accepts connections on one listener and runs an independent dispatcher
//! task per connection. A hung or misbehaving peer only ever blocks its
//! own task; other sessions are unaffected.

use crate::contacts::ContactRegistry;
use crate::directory::Directory;
use crate::dispatcher::Dispatcher;
use log::{error, info};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// The tracking server: one listener plus the shared state every session
/// dispatches against.
pub struct Server {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    /// Binds the listener and builds fresh shared state. Binding port 0
    /// picks a free port; see [`Server::local_addr`].
    pub async fn bind(addr: &str, grid_size: u32) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!(
            "Server listening on {} (grid size {})",
            listener.local_addr()?,
            grid_size
        );

        let directory = Arc::new(RwLock::new(Directory::new()));
        let contacts = Arc::new(RwLock::new(ContactRegistry::new()));
        let dispatcher = Arc::new(Dispatcher::new(directory, contacts, grid_size));

        Ok(Server {
            listener,
            dispatcher,
        })
    }

    /// Address the listener actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop: runs until the listener fails. Each accepted
    /// connection gets its own task running the dispatcher over buffered
    /// stream halves; session errors are logged and isolated.
    pub async fn run(&self) -> io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            info!("Accepted connection from {}", peer);

            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move {
                let (read_half, write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                let mut writer = BufWriter::new(write_half);

                match dispatcher.handle(&mut reader, &mut writer).await {
                    Ok(()) => info!("Session with {} ended", peer),
                    Err(e) => error!("Session with {} failed: {}", peer, e),
                }
            });
        }
    }
}
