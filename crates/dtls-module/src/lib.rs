//! # dtls-module: Default implementations
//!
//! This crate provides the single-threaded, readiness-driven engine that
//! multiplexes many DTLS peers over one UDP port, plus the secure-transport
//! collaborators it can drive.
//!
//! ## Components
//!
//! | Component            | Type                 | Role                                   |
//! |----------------------|----------------------|----------------------------------------|
//! | Listening endpoint   | `ListeningEndpoint`  | peek for new peers, hand off channels  |
//! | Readiness multiplexer| `Poller`             | poll(2) over the watched set           |
//! | Session registry     | `SessionRegistry`    | slab arena owning every session        |
//! | Accept pump          | `AcceptPump`         | create sessions, step handshakes       |
//! | Session I/O driver   | `SessionDriver`      | one read + one reply per notification  |
//! | Server loop          | `Server`             | ties the above together                |
//!
//! ## Collaborators
//!
//! | Collaborator      | Feature   | Notes                                  |
//! |-------------------|-----------|----------------------------------------|
//! | `PlainTransport`  | (always)  | cleartext, certificate-free            |
//! | `OpensslTransport`| `openssl` | DTLS 1.2 over OpenSSL                  |

pub mod endpoint;
pub mod poller;
pub mod registry;
pub mod accept;
pub mod driver;
pub mod server;
pub mod stats;
pub mod signal;
pub mod plain;
#[cfg(feature = "openssl")]
pub mod openssl_dtls;

pub use endpoint::ListeningEndpoint;
pub use poller::{Poller, ReadySet, Token, WatchedSet};
pub use registry::{Session, SessionRegistry};
pub use accept::{AcceptOutcome, AcceptPump, HandshakeOutcome};
pub use driver::{DriveOutcome, SessionDriver};
pub use server::{Server, ShutdownReport};
pub use stats::Stats;
pub use plain::PlainTransport;
#[cfg(feature = "openssl")]
pub use openssl_dtls::OpensslTransport;
