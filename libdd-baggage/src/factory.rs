// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use crate::array_map::PairSlot;
use crate::bitset;
use crate::context::{Extra, TraceContext};
use crate::field::BaggageField;
use crate::state::{BaggageState, Slots};

const DEFAULT_MAX_DYNAMIC_FIELDS: usize = 32;
// Bounds spinning when updates race pathologically; any value >= 1 is
// correct, only liveness under contention differs.
const DEFAULT_UPDATE_ATTEMPTS: u32 = 3;

/// Policy and initial state shared by every [`BaggageState`] one factory
/// creates. States compare their factory by pointer identity, so independent
/// factories never interfere with each other's context entries.
pub(crate) struct FactoryShared {
    pub(crate) initial_state: Arc<Slots>,
    pub(crate) initial_fields: Vec<BaggageField>,
    pub(crate) field_indices: HashMap<BaggageField, usize>,
    pub(crate) is_dynamic: bool,
    pub(crate) max_dynamic_fields: usize,
    pub(crate) update_attempts: u32,
}

/// Manages one mutable baggage state per trace context.
///
/// States are copy-on-write internally but still mutable, so updates made on
/// a child span must not be visible to its parent or siblings. That forking
/// is handled by [`BaggageStateFactory::decorate`], which must run once per
/// new context, before application code can touch its baggage.
pub struct BaggageStateFactory {
    shared: Arc<FactoryShared>,
}

impl BaggageStateFactory {
    pub fn builder() -> BaggageStateFactoryBuilder {
        BaggageStateFactoryBuilder::default()
    }

    /// Creates an unclaimed state carrying this factory's initial array.
    ///
    /// Propagation extensions call this while extracting a request, then
    /// attach the result to the new context's extra list. Attaching the same
    /// factory's output more than once to one context is a programming error
    /// that [`BaggageStateFactory::decorate`] reports fatally.
    pub fn create(&self) -> Arc<BaggageState> {
        Arc::new(BaggageState::new(Arc::clone(&self.shared)))
    }

    fn owns(&self, state: &BaggageState) -> bool {
        Arc::ptr_eq(&state.shared, &self.shared)
    }

    /// Ensures exactly one claimed state exists for `context`'s
    /// `(trace_id, span_id)`, folding in any state inherited from an
    /// ancestor context.
    ///
    /// When an entry is claimed and there is nothing to reconcile, the
    /// context is returned as-is. Otherwise a new context is built around an
    /// updated extra list: a fresh state is created and claimed when none
    /// could be, and an inherited entry is removed and reconciled into the
    /// claimed one, by wholesale adoption when the claimed state never
    /// diverged from the initial array, or by an ours-wins merge when both
    /// sides diverged.
    ///
    /// # Panics
    ///
    /// Panics when the extra list carries more than one additional entry of
    /// this factory, which means `create()` output was attached twice.
    pub fn decorate(&self, context: &TraceContext) -> TraceContext {
        let trace_id = context.trace_id();
        let span_id = context.span_id();

        let mut claimed: Option<Arc<BaggageState>> = None;
        let mut existing_index: Option<usize> = None;
        for (i, extra) in context.extra().iter().enumerate() {
            let Ok(state) = Arc::clone(extra).downcast::<BaggageState>() else {
                continue;
            };
            if !self.owns(&state) {
                continue; // don't interfere with other factories' entries
            }
            if claimed.is_none() && state.try_claim(trace_id, span_id) {
                claimed = Some(state);
                continue;
            }
            assert!(
                existing_index.is_none(),
                "BUG: the result of create() was attached to the same context more than once"
            );
            existing_index = Some(i);
        }

        // Easiest when there is neither existing state to fold in nor any
        // need to change the extra list.
        if claimed.is_some() && existing_index.is_none() {
            return context.clone();
        }

        let mut extra_list: Vec<Extra> = context.extra().to_vec();

        let claimed = match claimed {
            Some(claimed) => claimed,
            None => {
                let fresh = self.create();
                fresh.try_claim(trace_id, span_id);
                extra_list.push(Arc::clone(&fresh) as Extra);
                fresh
            }
        };

        if let Some(index) = existing_index {
            let existing = extra_list.remove(index);
            if let Ok(existing) = existing.downcast::<BaggageState>() {
                if claimed.is_initial_state() {
                    // The claimed state was new or untouched: adopt the
                    // ancestor's array wholesale.
                    claimed.store_state(existing.load_state());
                } else if !existing.is_initial_state() {
                    claimed.store_state(claimed.merge_state_keeping_ours_on_conflict(&existing));
                }
            }
        }

        context.with_extra(extra_list)
    }
}

/// Configures and builds a [`BaggageStateFactory`].
pub struct BaggageStateFactoryBuilder {
    fields: Vec<BaggageField>,
    dynamic_fields: bool,
    max_dynamic_fields: usize,
    update_attempts: u32,
}

impl Default for BaggageStateFactoryBuilder {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            dynamic_fields: false,
            max_dynamic_fields: DEFAULT_MAX_DYNAMIC_FIELDS,
            update_attempts: DEFAULT_UPDATE_ATTEMPTS,
        }
    }
}

impl BaggageStateFactoryBuilder {
    /// Declares a field every state starts with. Declared fields get O(1)
    /// lookups; their values start unassigned.
    pub fn set_field(&mut self, field: BaggageField) -> &mut Self {
        self.fields.push(field);
        self
    }

    /// Allows fields that were not declared up front to be appended at
    /// update time.
    pub fn set_dynamic_fields(&mut self) -> &mut Self {
        self.dynamic_fields = true;
        self
    }

    /// Caps the total pair count an array may grow to, at most 64.
    pub fn set_max_dynamic_fields(&mut self, max: usize) -> &mut Self {
        self.max_dynamic_fields = max;
        self
    }

    /// How many times an update retries a lost compare-and-swap race before
    /// giving up with a warning.
    pub fn set_update_attempts(&mut self, attempts: u32) -> &mut Self {
        self.update_attempts = attempts;
        self
    }

    /// # Errors
    ///
    /// Fails when no fields are declared and dynamic fields are disabled,
    /// when a field is declared twice, when the retry budget is zero, or
    /// when a cap exceeds the 64-pair redaction capacity.
    pub fn build(self) -> anyhow::Result<BaggageStateFactory> {
        anyhow::ensure!(
            self.dynamic_fields || !self.fields.is_empty(),
            "baggage factory needs at least one declared field or dynamic fields enabled"
        );
        anyhow::ensure!(
            self.update_attempts >= 1,
            "update attempts must be at least 1"
        );
        anyhow::ensure!(
            self.max_dynamic_fields <= bitset::MAX_SIZE,
            "cannot track more than {} baggage fields",
            bitset::MAX_SIZE
        );
        anyhow::ensure!(
            self.fields.len() <= bitset::MAX_SIZE,
            "cannot declare more than {} baggage fields",
            bitset::MAX_SIZE
        );

        let mut field_indices = HashMap::with_capacity(self.fields.len());
        let mut initial_state: Slots = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            anyhow::ensure!(
                !field_indices.contains_key(field),
                "duplicate baggage field {field}"
            );
            field_indices.insert(field.clone(), initial_state.len());
            initial_state.push(PairSlot::new(field.clone(), None));
        }

        Ok(BaggageStateFactory {
            shared: Arc::new(FactoryShared {
                initial_state: Arc::new(initial_state),
                initial_fields: self.fields,
                field_indices,
                is_dynamic: self.dynamic_fields,
                max_dynamic_fields: self.max_dynamic_fields,
                update_attempts: self.update_attempts,
            }),
        })
    }
}
