//! Stream-json protocol handling.
//!
//! The agent CLI speaks newline-delimited JSON over its stdio. This module
//! owns the three protocol concerns, independent of any process or session:
//!
//! - `codec`: [`FrameDecoder`](codec::FrameDecoder) reassembles complete lines
//!   from arbitrarily chunked stdout bytes.
//! - `dispatcher`: classifies each decoded line into a [`Frame`](dispatcher::Frame)
//!   and surfaces its conversation id.
//! - `writer`: builds and writes outbound `user` request records.

pub mod codec;
pub mod dispatcher;
pub mod writer;
