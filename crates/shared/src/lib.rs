//! Wire types shared between the cue control server and its clients.

pub mod domain;
pub mod error;
pub mod frame;
pub mod protocol;
