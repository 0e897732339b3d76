// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::array_map::UnsafeArrayMap;
use crate::context::TraceContext;
use crate::field::BaggageField;
use crate::state::BaggageState;

/// Connects a baggage state to its request-header representation.
///
/// The wire format itself lives outside this crate; implementations split
/// header values into field updates on the way in and render the currently
/// visible values on the way out.
pub trait BaggageCodec {
    /// Header names consulted when extracting from a request.
    fn extract_key_names(&self) -> &[String];

    /// Header names written when injecting into a request.
    fn inject_key_names(&self) -> &[String];

    /// Folds one header value into `state`. Returns true when any field
    /// changed.
    fn decode(&self, state: &BaggageState, value: &str) -> bool;

    /// Renders the assigned values for injection, or `None` when there is
    /// nothing to write.
    fn encode(
        &self,
        values: &UnsafeArrayMap<BaggageField, String>,
        context: &TraceContext,
    ) -> Option<String>;
}
