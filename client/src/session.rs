//! Client session: one persistent connection, typed RPC calls
//!
//! A [`Session`] owns exactly one TCP connection to the tracking server
//! and serializes every request on it: the internal mutex is held for the
//! full request/response round trip, so a foreground call and a
//! background poller can never interleave their bytes on the wire. Each
//! call blocks its caller until the matching response is fully read.
//!
//! There is no reconnect logic at this layer. A broken connection ends
//! the session; every later call fails with the transport error.

use log::debug;
use shared::{wire, Location, Request};
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl Connection {
    async fn send(&mut self, request: &Request) -> io::Result<()> {
        request.write_to(&mut self.writer).await?;
        self.writer.flush().await
    }
}

/// Handle to one server connection. Cloning is cheap and shares the
/// underlying connection, which is what the notification poller relies on.
#[derive(Clone)]
pub struct Session {
    connection: Arc<Mutex<Connection>>,
}

impl Session {
    /// Opens the persistent connection to the server.
    pub async fn connect(addr: &str) -> io::Result<Session> {
        let stream = TcpStream::connect(addr).await?;
        debug!("Connected to server at {}", addr);
        let (read_half, write_half) = stream.into_split();
        Ok(Session {
            connection: Arc::new(Mutex::new(Connection {
                reader: BufReader::new(read_half),
                writer: BufWriter::new(write_half),
            })),
        })
    }

    /// One round trip with a boolean response.
    async fn flag_call(&self, request: Request) -> io::Result<bool> {
        let mut connection = self.connection.lock().await;
        connection.send(&request).await?;
        wire::read_bool(&mut connection.reader).await
    }

    /// One round trip with an integer response.
    async fn count_call(&self, request: Request) -> io::Result<i32> {
        let mut connection = self.connection.lock().await;
        connection.send(&request).await?;
        connection.reader.read_i32().await
    }

    /// Registers a new user. False means the username is taken.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        privileged: bool,
    ) -> io::Result<bool> {
        self.flag_call(Request::Register {
            username: username.to_string(),
            password: password.to_string(),
            privileged,
        })
        .await
    }

    /// Authenticates a user. False covers unknown names, wrong passwords
    /// and infected users alike; the server does not say which.
    pub async fn login(&self, username: &str, password: &str) -> io::Result<bool> {
        self.flag_call(Request::Login {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await
    }

    /// Moves a user to a cell. False means the user is unknown or the
    /// cell is off the grid.
    pub async fn change_location(&self, username: &str, location: Location) -> io::Result<bool> {
        self.flag_call(Request::ChangeLocation {
            username: username.to_string(),
            location,
        })
        .await
    }

    /// Occupancy of a cell, or -1 when the cell is outside the grid.
    pub async fn count_in_location(&self, location: Location) -> io::Result<i32> {
        self.count_call(Request::CountInLocation { location }).await
    }

    /// Occupancy of a cell without the server-side bound check. Used by
    /// the safe-to-move wait; out-of-grid cells simply answer 0.
    pub async fn verify_location(&self, location: Location) -> io::Result<i32> {
        self.count_call(Request::VerifyLocation { location }).await
    }

    /// True iff the user exists and is privileged.
    pub async fn is_privileged(&self, username: &str) -> io::Result<bool> {
        self.flag_call(Request::IsPrivileged {
            username: username.to_string(),
        })
        .await
    }

    /// Reports a user infected. Irreversible, and carries no response
    /// payload; the call returns once the request is on the wire.
    pub async fn communicate_infection(&self, username: &str) -> io::Result<()> {
        let mut connection = self.connection.lock().await;
        connection
            .send(&Request::CommunicateInfection {
                username: username.to_string(),
            })
            .await
    }

    /// Fetches the full grid snapshot: every cell of the `n` by `n` grid
    /// mapped to the usernames currently there, empty cells included.
    pub async fn load_map(&self, n: u32) -> io::Result<BTreeMap<Location, Vec<String>>> {
        let mut connection = self.connection.lock().await;
        connection.send(&Request::LoadMap { size: n }).await?;
        wire::read_map(&mut connection.reader).await
    }

    /// Asks whether the user was exposed to an infected contact. A true
    /// answer is consumed server-side: the same exposure is never
    /// reported twice.
    pub async fn check_notification(&self, username: &str) -> io::Result<bool> {
        self.flag_call(Request::CheckNotification {
            username: username.to_string(),
        })
        .await
    }

    /// Tells the server to end this session's command loop. The
    /// connection is useless afterwards.
    pub async fn exit(&self) -> io::Result<()> {
        let mut connection = self.connection.lock().await;
        connection.send(&Request::Exit).await
    }
}
