// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque per-context payload attached by a propagation plugin.
pub type Extra = Arc<dyn Any + Send + Sync>;

/// Immutable carrier of one span's identifiers and attached extra state.
///
/// Real propagation integrations carry a richer context; this one holds just
/// what baggage management needs: nonzero trace/span ids and the ordered
/// extra list. "Mutation" always builds a new context around a new list.
#[derive(Clone)]
pub struct TraceContext {
    trace_id: u64,
    span_id: u64,
    extra: Arc<[Extra]>,
}

impl TraceContext {
    /// Creates a context with no extra state. Ids must be nonzero.
    pub fn new(trace_id: u64, span_id: u64) -> Self {
        debug_assert!(trace_id != 0 && span_id != 0, "trace and span ids must be nonzero");
        Self {
            trace_id,
            span_id,
            extra: Vec::new().into(),
        }
    }

    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// The ordered extra-state list, in attachment order.
    pub fn extra(&self) -> &[Extra] {
        &self.extra
    }

    /// Derives a context for a child span: same trace, same extra list.
    pub fn child(&self, span_id: u64) -> Self {
        debug_assert!(span_id != 0, "span id must be nonzero");
        Self {
            trace_id: self.trace_id,
            span_id,
            extra: Arc::clone(&self.extra),
        }
    }

    /// Builds a context identical to this one but carrying `extra`.
    pub fn with_extra(&self, extra: Vec<Extra>) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: self.span_id,
            extra: extra.into(),
        }
    }
}

impl fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceContext")
            .field("trace_id", &self.trace_id)
            .field("span_id", &self.span_id)
            .field("extra_len", &self.extra.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_shares_extra_list() {
        let parent = TraceContext::new(1, 2);
        let decorated = parent.with_extra(vec![Arc::new(7u32) as Extra]);
        let child = decorated.child(3);

        assert_eq!(child.trace_id(), 1);
        assert_eq!(child.span_id(), 3);
        assert_eq!(child.extra().len(), 1);
        assert!(std::ptr::eq(
            child.extra().as_ptr(),
            decorated.extra().as_ptr()
        ));
    }

    #[test]
    fn with_extra_never_mutates_in_place() {
        let context = TraceContext::new(1, 2);
        let decorated = context.with_extra(vec![Arc::new("payload") as Extra]);

        assert_eq!(context.extra().len(), 0);
        assert_eq!(decorated.extra().len(), 1);
    }
}
