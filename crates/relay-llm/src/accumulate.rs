//! Reassembly of tool invocations streamed as fragments.

use std::collections::HashMap;

use crate::{StreamEvent, ToolCall};

/// A tool invocation under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulatedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
    /// Locally assigned, stable position in first-seen order.
    pub index: usize,
}

/// Merges `tool-call` fragments into complete calls.
///
/// Fragments are matched by backend-supplied id; a fragment without an id is
/// matched by the positional index the backend used for that call.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<AccumulatedToolCall>,
    by_id: HashMap<String, usize>,
    by_position: HashMap<usize, usize>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment. Returns the slot it landed in.
    pub fn merge(
        &mut self,
        position: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: &str,
    ) -> usize {
        let existing = match id {
            Some(id) => self.by_id.get(id).copied(),
            None => self.by_position.get(&position).copied(),
        };

        let slot = match existing {
            Some(slot) => slot,
            None => {
                let slot = self.calls.len();
                let id = id
                    .map(String::from)
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                self.by_id.insert(id.clone(), slot);
                self.calls.push(AccumulatedToolCall {
                    id,
                    name: String::new(),
                    arguments: String::new(),
                    index: slot,
                });
                slot
            }
        };
        // Later fragments without an id refer to the newest call at this position.
        self.by_position.insert(position, slot);

        let call = &mut self.calls[slot];
        if call.name.is_empty() {
            if let Some(name) = name {
                call.name = name.to_string();
            }
        }
        call.arguments.push_str(arguments);
        slot
    }

    /// Merge a `ToolCall` event; other events are ignored.
    pub fn merge_event(&mut self, event: &StreamEvent) {
        if let StreamEvent::ToolCall {
            index,
            id,
            name,
            arguments,
        } = event
        {
            self.merge(*index, id.as_deref(), name.as_deref(), arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn pending(&self) -> &[AccumulatedToolCall] {
        &self.calls
    }

    /// Materialize the complete calls in first-seen order.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.name,
                arguments: c.arguments,
            })
            .collect()
    }
}
