//! # netconf
//!
//! NETCONF client sessions (RFC 6241) over the ssh `netconf` subsystem
//! (RFC 6242), implementing [`deploykit::Session`] and
//! [`deploykit::Connector`].
//!
//! The transport is the system `ssh` client run as a subprocess, so host
//! keys, agents and `~/.ssh/config` behave exactly as they do for an
//! interactive login.
//!
//! ## Example
//!
//! ```no_run
//! use deploykit::{Connector, Credentials, Datastore, DeviceTarget, Session};
//! use netconf::{SshConnector, SshOptions};
//!
//! let connector = SshConnector::new(SshOptions::default());
//! let device = DeviceTarget::new("r1", "10.0.0.1");
//! let mut session = connector
//!     .open(&device, &Credentials::new("admin", None))
//!     .expect("connect");
//!
//! let reply = session.lock(Datastore::Candidate).expect("reply");
//! assert!(reply.is_ok());
//! session.close();
//! ```

pub mod error;
pub mod framing;
pub mod rpc;
pub mod session;
pub mod ssh;

pub use error::{Error, Result};
pub use framing::Framing;
pub use session::NetconfSession;
pub use ssh::{DEFAULT_PORT, SshConnector, SshOptions};
