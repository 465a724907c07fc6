// Copyright (c) 2025-2026 naskel.com
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Binary wire codec for the O2 message format: bounds-checked cursors plus
//! a typed encoder/decoder pair.

pub mod cursor;
pub mod message;

pub use message::{Decoder, Encoder, Transport};
