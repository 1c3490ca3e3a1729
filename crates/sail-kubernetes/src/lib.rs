pub mod cluster;
pub mod conf;
pub mod constants;
pub mod diagnostics;
pub mod error;
pub mod gate;
pub mod handshake;
pub mod launcher;
pub mod options;
pub mod pod;
pub mod provisioner;
pub mod retry;
pub mod rpc;
pub mod submission;
#[cfg(test)]
mod testing;
pub mod watch;
