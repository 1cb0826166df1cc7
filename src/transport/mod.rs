//! Secure transport: framed, authenticated, encrypted peer sessions.
//!
//! The teacher crate's own connection layer (`connection.rs`) pipes bytes
//! over an SSH subprocess's stdin/stdout and leaves authentication to SSH
//! itself; there is no in-process cryptography to generalize. This module
//! is therefore new machinery, grounded on the `secret_connection.rs`
//! handshake idiom from the retrieval pack (typestate handshake, transcript
//! binding, canonical key ordering) and wired in the teacher's own style:
//! an async-trait port (`SyncProtocol` is the existing example), explicit
//! `TransportError`, and a connection pool shaped like `connection.rs`'s
//! `Node`/`ConnectionType` split, generalized from subprocess pipes to
//! `TcpStream`s.

pub mod handshake;
pub mod pool;
pub mod record;
pub mod replay;

pub use handshake::{perform_handshake, HandshakeRole, SessionSecrets};
pub use pool::ConnectionPool;
pub use record::{RecordReader, RecordWriter, RecordVersion};
pub use replay::ReplayGuard;
