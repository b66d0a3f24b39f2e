//! Turns magnet links and torrent files into proxied direct download URLs by
//! driving a debrid service's REST API and a downstream link proxy.

pub mod config;
pub mod debrid;
pub mod error;
pub mod poll;
pub mod proxy;
pub mod resolver;
pub mod server;
pub mod workflow;

#[cfg(test)]
mod test_support;
