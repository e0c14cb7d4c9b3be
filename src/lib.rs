//! Watch-history and settings synchronization over WebDAV.
//!
//! [`SyncManager`] uploads local history, settings and backups to a remote
//! store and merges what it downloads back into local storage. The remote is
//! either a credentialed WebDAV account or a public endpoint addressed by a
//! shared sync code.

pub mod sync;

pub use sync::*;
