mod client;

pub use client::{ResourceInfo, WebDAVClient, WebDAVError};
