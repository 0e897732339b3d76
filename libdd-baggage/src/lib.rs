// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory propagation state for trace baggage.
//!
//! Baggage fields are key/value pairs that travel with a trace across process
//! boundaries. This crate keeps one copy-on-write pair array per trace
//! context behind an atomically swapped reference, so reads are plain loads,
//! writes publish a fresh array via compare-and-swap, and sibling spans that
//! mutated the same logical state can be reconciled without locks.
//!
//! The entry points are [`BaggageStateFactory`], which attaches and claims a
//! [`BaggageState`] per `(trace_id, span_id)` through
//! [`BaggageStateFactory::decorate`], and [`UnsafeArrayMap`], the read-only
//! view handed to codecs.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod array_map;
mod bitset;
mod codec;
mod context;
mod factory;
mod field;
mod state;

pub use array_map::{
    Entry, Iter, Keys, PairArray, PairSlot, UnsafeArrayMap, Values, MAX_FILTERED_KEYS,
};
pub use codec::BaggageCodec;
pub use context::{Extra, TraceContext};
pub use factory::{BaggageStateFactory, BaggageStateFactoryBuilder};
pub use field::BaggageField;
pub use state::BaggageState;
