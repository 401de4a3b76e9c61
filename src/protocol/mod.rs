//! Kasa local protocol: autokey cipher, stream framing, and command bodies
//!
//! The vendor protocol is reverse engineered: JSON payloads obfuscated with an
//! XOR autokey cipher, carried over TCP with a 4-byte big-endian length prefix
//! (or as raw datagrams for UDP discovery).

pub mod cipher;
pub mod codec;
pub mod commands;

pub use self::codec::FrameCodec;
