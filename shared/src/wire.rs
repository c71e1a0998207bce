//! Wire protocol codec
//!
//! Every field on the wire is self-delimiting: strings are a big-endian
//! `u32` byte length followed by UTF-8 bytes, integers are fixed-width
//! big-endian, booleans are a single byte. There is no outer message
//! length or checksum; message boundaries follow entirely from each
//! command's fixed argument shape, so both ends must stay in lockstep
//! about which command is in flight.

use crate::Location;
use std::collections::BTreeMap;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on an incoming string field, to reject a corrupt length
/// prefix before allocating.
const MAX_STRING_LEN: usize = 64 * 1024;

/// One request from the command table, as read off a connection.
///
/// The server decodes these with [`Request::read_from`]; the client stub
/// encodes them with [`Request::write_to`]. Responses are per-command
/// primitives (a boolean flag, an `i32` count, or the loadmap entry
/// stream) and use the field helpers in this module directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Register {
        username: String,
        password: String,
        privileged: bool,
    },
    Login {
        username: String,
        password: String,
    },
    ChangeLocation {
        username: String,
        location: Location,
    },
    CountInLocation {
        location: Location,
    },
    CommunicateInfection {
        username: String,
    },
    LoadMap {
        size: u32,
    },
    IsPrivileged {
        username: String,
    },
    VerifyLocation {
        location: Location,
    },
    CheckNotification {
        username: String,
    },
    Exit,
}

impl Request {
    const TAG_REGISTER: &'static str = "register";
    const TAG_LOGIN: &'static str = "login";
    const TAG_CHANGE_LOCATION: &'static str = "change-location";
    const TAG_COUNT_IN_LOCATION: &'static str = "count-in-location";
    const TAG_COMMUNICATE_INFECTION: &'static str = "communicate-infection";
    const TAG_LOADMAP: &'static str = "loadmap";
    const TAG_IS_PRIVILEGED: &'static str = "is-privileged";
    const TAG_VERIFY_LOCATION: &'static str = "verify-location";
    const TAG_CHECK_NOTIFICATION: &'static str = "check-notification";
    const TAG_EXIT: &'static str = "exit";

    fn tag(&self) -> &'static str {
        match self {
            Request::Register { .. } => Self::TAG_REGISTER,
            Request::Login { .. } => Self::TAG_LOGIN,
            Request::ChangeLocation { .. } => Self::TAG_CHANGE_LOCATION,
            Request::CountInLocation { .. } => Self::TAG_COUNT_IN_LOCATION,
            Request::CommunicateInfection { .. } => Self::TAG_COMMUNICATE_INFECTION,
            Request::LoadMap { .. } => Self::TAG_LOADMAP,
            Request::IsPrivileged { .. } => Self::TAG_IS_PRIVILEGED,
            Request::VerifyLocation { .. } => Self::TAG_VERIFY_LOCATION,
            Request::CheckNotification { .. } => Self::TAG_CHECK_NOTIFICATION,
            Request::Exit => Self::TAG_EXIT,
        }
    }

    /// Reads one complete request off the stream.
    ///
    /// An unknown command tag or a truncated field is a protocol fault and
    /// surfaces as `InvalidData`/`UnexpectedEof`; both are fatal to the
    /// connection, never recovered from mid-stream.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Request> {
        let tag = read_string(reader).await?;
        match tag.as_str() {
            Self::TAG_REGISTER => Ok(Request::Register {
                username: read_string(reader).await?,
                password: read_string(reader).await?,
                privileged: read_bool(reader).await?,
            }),
            Self::TAG_LOGIN => Ok(Request::Login {
                username: read_string(reader).await?,
                password: read_string(reader).await?,
            }),
            Self::TAG_CHANGE_LOCATION => Ok(Request::ChangeLocation {
                username: read_string(reader).await?,
                location: read_location(reader).await?,
            }),
            Self::TAG_COUNT_IN_LOCATION => Ok(Request::CountInLocation {
                location: read_location(reader).await?,
            }),
            Self::TAG_COMMUNICATE_INFECTION => Ok(Request::CommunicateInfection {
                username: read_string(reader).await?,
            }),
            Self::TAG_LOADMAP => Ok(Request::LoadMap {
                size: reader.read_u32().await?,
            }),
            Self::TAG_IS_PRIVILEGED => Ok(Request::IsPrivileged {
                username: read_string(reader).await?,
            }),
            Self::TAG_VERIFY_LOCATION => Ok(Request::VerifyLocation {
                location: read_location(reader).await?,
            }),
            Self::TAG_CHECK_NOTIFICATION => Ok(Request::CheckNotification {
                username: read_string(reader).await?,
            }),
            Self::TAG_EXIT => Ok(Request::Exit),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown command tag: {:?}", other),
            )),
        }
    }

    /// Writes this request to the stream. The caller flushes.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> io::Result<()> {
        write_string(writer, self.tag()).await?;
        match self {
            Request::Register {
                username,
                password,
                privileged,
            } => {
                write_string(writer, username).await?;
                write_string(writer, password).await?;
                write_bool(writer, *privileged).await?;
            }
            Request::Login { username, password } => {
                write_string(writer, username).await?;
                write_string(writer, password).await?;
            }
            Request::ChangeLocation { username, location } => {
                write_string(writer, username).await?;
                write_location(writer, *location).await?;
            }
            Request::CountInLocation { location } | Request::VerifyLocation { location } => {
                write_location(writer, *location).await?;
            }
            Request::CommunicateInfection { username }
            | Request::IsPrivileged { username }
            | Request::CheckNotification { username } => {
                write_string(writer, username).await?;
            }
            Request::LoadMap { size } => {
                writer.write_u32(*size).await?;
            }
            Request::Exit => {}
        }
        Ok(())
    }
}

/// Writes a length-prefixed UTF-8 string field.
pub async fn write_string<W: AsyncWrite + Unpin>(writer: &mut W, s: &str) -> io::Result<()> {
    writer.write_u32(s.len() as u32).await?;
    writer.write_all(s.as_bytes()).await
}

/// Reads a length-prefixed UTF-8 string field.
pub async fn read_string<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<String> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_STRING_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("string field of {} bytes exceeds protocol limit", len),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Writes a single-byte boolean field.
pub async fn write_bool<W: AsyncWrite + Unpin>(writer: &mut W, value: bool) -> io::Result<()> {
    writer.write_u8(value as u8).await
}

/// Reads a single-byte boolean field. Anything but 0 or 1 is a framing
/// error, since a desynchronized stream shows up here first.
pub async fn read_bool<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<bool> {
    match reader.read_u8().await? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid boolean byte: {}", other),
        )),
    }
}

/// Writes a location as two fixed-width coordinate fields.
pub async fn write_location<W: AsyncWrite + Unpin>(
    writer: &mut W,
    location: Location,
) -> io::Result<()> {
    writer.write_u32(location.x).await?;
    writer.write_u32(location.y).await
}

/// Reads a location as two fixed-width coordinate fields.
pub async fn read_location<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Location> {
    let x = reader.read_u32().await?;
    let y = reader.read_u32().await?;
    Ok(Location { x, y })
}

/// Writes one entry of a loadmap response: a true has-more flag, the cell
/// coordinates, the occupant count, then the occupant names.
pub async fn write_map_entry<W: AsyncWrite + Unpin>(
    writer: &mut W,
    location: Location,
    occupants: &[String],
) -> io::Result<()> {
    write_bool(writer, true).await?;
    write_location(writer, location).await?;
    writer.write_u32(occupants.len() as u32).await?;
    for name in occupants {
        write_string(writer, name).await?;
    }
    Ok(())
}

/// Terminates a loadmap response with a false has-more flag.
pub async fn write_map_end<W: AsyncWrite + Unpin>(writer: &mut W) -> io::Result<()> {
    write_bool(writer, false).await
}

/// Reads a complete loadmap entry stream into an ordered cell map.
pub async fn read_map<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> io::Result<BTreeMap<Location, Vec<String>>> {
    let mut map = BTreeMap::new();
    while read_bool(reader).await? {
        let location = read_location(reader).await?;
        let count = reader.read_u32().await? as usize;
        let mut occupants = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            occupants.push(read_string(reader).await?);
        }
        map.insert(location, occupants);
    }
    Ok(map)
}
