// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! cairn-tunnel: concurrency-safe wrappers around one bidirectional
//! message stream
//!
//! The tunnel relays repository traffic and control messages between two
//! cooperating instances. This crate owns only the channel discipline: one
//! concurrent sender and one concurrent receiver, a closed flag checked
//! before touching the underlying transport, and a cooperative close that
//! always attempts both stream halves. Frame contents are never interpreted.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod stream;

pub use stream::{AcceptorStream, CloseError, FrameTransport, InitiatorStream, TunnelError, TunnelMessage};
