//! The control-plane wire protocol: UDP command datagrams carrying ASCII
//! text, parsed once into a [`Command`], plus the port profile a node
//! advertises itself on. A datagram's whole meaning is extracted once in
//! `Command::parse` and never re-inspected as raw bytes downstream.

mod command;
mod port;

pub use command::{Command, CropField, FlipAxis};
pub use port::PortProfile;
