//! Per-connection command loop
//!
//! One dispatcher handles one connection: read a command, act on the
//! shared directory and contact registry, write the typed response,
//! repeat until `exit` or the peer hangs up. The dispatcher keeps no
//! state between iterations; every request that concerns a user carries
//! the username itself.
//!
//! Lock order is fixed: directory first, registry second, never the
//! reverse. `change-location` computes the new cell's cohort under the
//! same directory guard that applied the move, so the cohort reflects
//! exactly the occupant set the move produced.

use crate::contacts::ContactRegistry;
use crate::directory::Directory;
use log::{debug, warn};
use shared::{wire, Request};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::RwLock;

/// Translates wire requests into directory/registry calls.
///
/// Shared state is injected at construction; dispatchers for different
/// connections hold clones of the same `Arc`s.
pub struct Dispatcher {
    directory: Arc<RwLock<Directory>>,
    contacts: Arc<RwLock<ContactRegistry>>,
    grid_size: u32,
}

impl Dispatcher {
    pub fn new(
        directory: Arc<RwLock<Directory>>,
        contacts: Arc<RwLock<ContactRegistry>>,
        grid_size: u32,
    ) -> Self {
        Self {
            directory,
            contacts,
            grid_size,
        }
    }

    /// Runs the command loop until `exit`, a clean peer close, or a
    /// transport fault. Validation failures are in-band response values;
    /// only protocol faults surface as errors, and those end the session.
    pub async fn handle<R, W>(&self, reader: &mut R, writer: &mut W) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let request = match Request::read_from(reader).await {
                Ok(request) => request,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    // Peer closed the socket without sending exit.
                    debug!("Connection closed by peer");
                    return Ok(());
                }
                Err(e) => {
                    warn!("Malformed request stream: {}", e);
                    return Err(e);
                }
            };
            debug!("Handling {:?}", request);

            match request {
                Request::Register {
                    username,
                    password,
                    privileged,
                } => {
                    let registered = {
                        let mut directory = self.directory.write().await;
                        let registered = directory.register(&username, &password, privileged);
                        if registered {
                            // The contact entry is created while the directory
                            // guard still blocks moves: no cohort can contain a
                            // user whose entry does not exist yet.
                            self.contacts.write().await.create_entry(&username);
                        }
                        registered
                    };
                    wire::write_bool(writer, registered).await?;
                    writer.flush().await?;
                }

                Request::Login { username, password } => {
                    let authenticated = self.directory.read().await.login(&username, &password);
                    wire::write_bool(writer, authenticated).await?;
                    writer.flush().await?;
                }

                Request::ChangeLocation { username, location } => {
                    let cohort = {
                        let mut directory = self.directory.write().await;
                        if directory.set_location(&username, location, self.grid_size) {
                            // Occupants of the new cell, read under the same
                            // guard that applied the move.
                            Some(
                                directory
                                    .users_at(location)
                                    .into_iter()
                                    .map(|user| user.username)
                                    .collect::<Vec<_>>(),
                            )
                        } else {
                            None
                        }
                    };
                    let moved = cohort.is_some();
                    if let Some(cohort) = cohort {
                        self.contacts.write().await.record_cohort(&cohort);
                    }
                    wire::write_bool(writer, moved).await?;
                    writer.flush().await?;
                }

                Request::CountInLocation { location } => {
                    let count = if location.is_within(self.grid_size) {
                        self.directory.read().await.count_at(location)
                    } else {
                        -1
                    };
                    writer.write_i32(count).await?;
                    writer.flush().await?;
                }

                Request::CommunicateInfection { username } => {
                    // Fire and forget: no response payload.
                    self.directory.write().await.mark_infected(&username);
                }

                Request::LoadMap { size } => {
                    // A hostile size would allocate size-squared cells; never
                    // snapshot beyond the deployment grid.
                    let size = size.min(self.grid_size);
                    let map = self.directory.read().await.snapshot(size);
                    for (location, occupants) in &map {
                        wire::write_map_entry(writer, *location, occupants).await?;
                    }
                    wire::write_map_end(writer).await?;
                    writer.flush().await?;
                }

                Request::IsPrivileged { username } => {
                    let privileged = self.directory.read().await.is_privileged(&username);
                    wire::write_bool(writer, privileged).await?;
                    writer.flush().await?;
                }

                Request::VerifyLocation { location } => {
                    // Intentionally not bound-checked: empty or out-of-grid
                    // cells both answer 0.
                    let count = self.directory.read().await.count_at(location);
                    writer.write_i32(count).await?;
                    writer.flush().await?;
                }

                Request::CheckNotification { username } => {
                    let exposed = {
                        let directory = self.directory.read().await;
                        let mut contacts = self.contacts.write().await;
                        contacts.consume_infected(&username, |name| directory.is_infected(name))
                    };
                    wire::write_bool(writer, exposed).await?;
                    writer.flush().await?;
                }

                Request::Exit => {
                    debug!("Session exit requested");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Location, DEFAULT_GRID_SIZE};
    use tokio::io::{AsyncReadExt, DuplexStream};

    struct TestSession {
        stream: DuplexStream,
    }

    /// Spins a dispatcher over the given shared state on an in-memory
    /// pipe and hands back the client end.
    fn start_dispatcher_with(
        directory: Arc<RwLock<Directory>>,
        contacts: Arc<RwLock<ContactRegistry>>,
    ) -> TestSession {
        let dispatcher = Dispatcher::new(directory, contacts, DEFAULT_GRID_SIZE);

        let (client_end, server_end) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(server_end);
            let _ = dispatcher.handle(&mut reader, &mut writer).await;
        });
        TestSession { stream: client_end }
    }

    /// Same, with fresh state.
    fn start_dispatcher() -> TestSession {
        start_dispatcher_with(
            Arc::new(RwLock::new(Directory::new())),
            Arc::new(RwLock::new(ContactRegistry::new())),
        )
    }

    impl TestSession {
        async fn flag(&mut self, request: Request) -> bool {
            request.write_to(&mut self.stream).await.unwrap();
            wire::read_bool(&mut self.stream).await.unwrap()
        }

        async fn count(&mut self, request: Request) -> i32 {
            request.write_to(&mut self.stream).await.unwrap();
            self.stream.read_i32().await.unwrap()
        }

        async fn register(&mut self, username: &str, password: &str, privileged: bool) -> bool {
            self.flag(Request::Register {
                username: username.to_string(),
                password: password.to_string(),
                privileged,
            })
            .await
        }

        async fn change_location(&mut self, username: &str, x: u32, y: u32) -> bool {
            self.flag(Request::ChangeLocation {
                username: username.to_string(),
                location: Location::new(x, y),
            })
            .await
        }

        async fn check_notification(&mut self, username: &str) -> bool {
            self.flag(Request::CheckNotification {
                username: username.to_string(),
            })
            .await
        }
    }

    #[tokio::test]
    async fn test_register_and_login_flow() {
        let mut session = start_dispatcher();
        assert!(session.register("alice", "pw1", false).await);
        assert!(!session.register("alice", "pw1", false).await);
        assert!(
            session
                .flag(Request::Login {
                    username: "alice".to_string(),
                    password: "pw1".to_string(),
                })
                .await
        );
        assert!(
            !session
                .flag(Request::Login {
                    username: "alice".to_string(),
                    password: "wrong".to_string(),
                })
                .await
        );
    }

    #[tokio::test]
    async fn test_count_in_location_bound_policy() {
        let mut session = start_dispatcher();
        // Out of bound on a size-5 grid (bound exclusive) answers -1.
        let out = session
            .count(Request::CountInLocation {
                location: Location::new(5, 0),
            })
            .await;
        assert_eq!(out, -1);
        // In bound with nobody there answers 0.
        let empty = session
            .count(Request::CountInLocation {
                location: Location::new(4, 0),
            })
            .await;
        assert_eq!(empty, 0);
    }

    #[tokio::test]
    async fn test_verify_location_skips_bound_check() {
        let mut session = start_dispatcher();
        let count = session
            .count(Request::VerifyLocation {
                location: Location::new(40, 40),
            })
            .await;
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_exposure_scenario_consumes_once() {
        let mut session = start_dispatcher();
        assert!(session.register("alice", "pw1", false).await);
        assert!(session.register("bob", "pw2", false).await);
        assert!(session.change_location("alice", 1, 1).await);
        assert!(session.change_location("bob", 1, 1).await);

        Request::CommunicateInfection {
            username: "bob".to_string(),
        }
        .write_to(&mut session.stream)
        .await
        .unwrap();

        // Infection removed bob from the grid.
        let count = session
            .count(Request::CountInLocation {
                location: Location::new(1, 1),
            })
            .await;
        assert_eq!(count, 1);

        assert!(session.check_notification("alice").await);
        assert!(!session.check_notification("alice").await);
    }

    #[tokio::test]
    async fn test_loadmap_streams_every_cell() {
        let mut session = start_dispatcher();
        assert!(session.register("alice", "pw1", false).await);
        assert!(session.change_location("alice", 0, 2).await);

        Request::LoadMap { size: 3 }
            .write_to(&mut session.stream)
            .await
            .unwrap();
        let map = wire::read_map(&mut session.stream).await.unwrap();
        assert_eq!(map.len(), 9);
        assert_eq!(map[&Location::new(0, 2)], vec!["alice"]);
        let placed: usize = map.values().map(Vec::len).sum();
        assert_eq!(placed, 1);
    }

    #[tokio::test]
    async fn test_exit_terminates_the_session() {
        let mut session = start_dispatcher();
        Request::Exit
            .write_to(&mut session.stream)
            .await
            .unwrap();
        // Dispatcher closes its end; the next read sees EOF.
        let mut buf = [0u8; 1];
        let n = session.stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_verify_location_at_sentinel_counts_nobody() {
        let mut session = start_dispatcher();
        // Registered but never moved: sitting at the off-grid sentinel.
        assert!(session.register("alice", "pw1", false).await);
        let count = session
            .count(Request::VerifyLocation {
                location: Location::NOWHERE,
            })
            .await;
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_loadmap_size_is_clamped_to_the_grid() {
        let mut session = start_dispatcher();
        Request::LoadMap { size: u32::MAX }
            .write_to(&mut session.stream)
            .await
            .unwrap();
        let map = wire::read_map(&mut session.stream).await.unwrap();
        assert_eq!(
            map.len(),
            (DEFAULT_GRID_SIZE * DEFAULT_GRID_SIZE) as usize
        );
    }

    #[tokio::test]
    async fn test_contact_symmetry_under_concurrent_register_and_move() {
        let directory = Arc::new(RwLock::new(Directory::new()));
        let contacts = Arc::new(RwLock::new(ContactRegistry::new()));

        // Each connection registers its user and immediately piles into
        // the same cell. Registration must publish the contact entry
        // atomically: a move interleaved between the two would otherwise
        // record a one-way edge.
        let mut handles = Vec::new();
        for i in 0..16 {
            let mut session =
                start_dispatcher_with(Arc::clone(&directory), Arc::clone(&contacts));
            handles.push(tokio::spawn(async move {
                let name = format!("user{}", i);
                assert!(session.register(&name, "pw", false).await);
                assert!(session.change_location(&name, 1, 1).await);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let contacts = contacts.read().await;
        for i in 0..16 {
            for j in 0..16 {
                if i == j {
                    continue;
                }
                let a = format!("user{}", i);
                let b = format!("user{}", j);
                let a_has_b = contacts.contacts_of(&a).contains(&b);
                let b_has_a = contacts.contacts_of(&b).contains(&a);
                assert_eq!(
                    a_has_b, b_has_a,
                    "symmetry broken: {}->{}={}, {}->{}={}",
                    a, b, a_has_b, b, a, b_has_a
                );
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_registrations_all_distinct() {
        let directory = Arc::new(RwLock::new(Directory::new()));
        let contacts = Arc::new(RwLock::new(ContactRegistry::new()));

        let mut handles = Vec::new();
        for i in 0..32 {
            let directory = Arc::clone(&directory);
            let contacts = Arc::clone(&contacts);
            handles.push(tokio::spawn(async move {
                let name = format!("user{}", i);
                let ok = directory.write().await.register(&name, "pw", false);
                if ok {
                    contacts.write().await.create_entry(&name);
                }
                ok
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(directory.read().await.len(), 32);
    }
}
