//! One request's partial call tree.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use tracer_types::{RequestId, SpanEvent, SpanId, NULL_SPAN};

use crate::span::{ChildRef, Span};

/// Effect of recording one line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineOutcome {
    /// Child count of the caller after the line was attached.
    pub fan_out: usize,
    /// The callee was already defined; the line was ignored.
    pub conflict: bool,
}

/// Effect of merging a forwarded partial tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Spans defined on both sides. The local definition is kept.
    pub conflicts: Vec<SpanId>,
}

/// All spans seen so far for one request id.
///
/// `sources` holds the spans known only as callers. The synthetic root
/// [`NULL_SPAN`] is always one of them.
#[derive(Clone, Debug)]
pub struct Request {
    id: RequestId,
    spans: HashMap<SpanId, Span>,
    sources: HashSet<SpanId>,
    newest_line: u64,
    oldest_line: u64,
}

impl Request {
    pub fn new(id: RequestId) -> Self {
        Self {
            id,
            spans: HashMap::new(),
            sources: HashSet::new(),
            newest_line: 0,
            oldest_line: 0,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Largest end timestamp of any line recorded for this request.
    pub fn newest_line(&self) -> u64 {
        self.newest_line
    }

    /// Smallest non-zero end timestamp of any line recorded, 0 if none.
    pub fn oldest_line(&self) -> u64 {
        self.oldest_line
    }

    pub fn span(&self, id: SpanId) -> Option<&Span> {
        self.spans.get(&id)
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    pub fn is_source(&self, id: SpanId) -> bool {
        self.sources.contains(&id)
    }

    /// The rendered root: the earliest child of the synthetic root span.
    pub fn root(&self) -> Option<&Span> {
        let first = self.spans.get(&NULL_SPAN)?.children().first()?;
        self.spans.get(&first.id)
    }

    /// Number of spans directly under the synthetic root.
    pub fn root_count(&self) -> usize {
        self.spans
            .get(&NULL_SPAN)
            .map_or(0, |root| root.children().len())
    }

    fn observe_line(&mut self, ended: u64) {
        self.newest_line = self.newest_line.max(ended);
        self.oldest_line = min_nonzero(self.oldest_line, ended);
    }

    /// Record one parsed line: define the callee and attach it under the
    /// caller, creating a placeholder caller if needed.
    pub fn record(&mut self, event: &SpanEvent) -> LineOutcome {
        self.observe_line(event.ended);

        match self.spans.entry(event.callee) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_defined() {
                    return LineOutcome {
                        fan_out: 0,
                        conflict: true,
                    };
                }
                entry
                    .get_mut()
                    .define(event.service, event.started, event.ended);
                self.sources.remove(&event.callee);
            }
            Entry::Vacant(entry) => {
                let mut span = Span::placeholder(event.callee);
                span.define(event.service, event.started, event.ended);
                entry.insert(span);
            }
        }

        let caller = match self.spans.entry(event.caller) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.sources.insert(event.caller);
                entry.insert(Span::placeholder(event.caller))
            }
        };
        let fan_out = caller.add_child(ChildRef {
            started: event.started,
            id: event.callee,
        });
        LineOutcome {
            fan_out,
            conflict: false,
        }
    }

    /// Fold a partial tree of the same request built from another block.
    ///
    /// A local placeholder takes over a forwarded definition, and the other
    /// way round; child links from both sides are merged in start order.
    /// Links are by id, so grandchildren split across the boundary end up
    /// under the right parent without a separate walk. The result does not
    /// depend on which side is merged into which, except for conflicts.
    pub fn merge(&mut self, other: Request) -> MergeOutcome {
        debug_assert_eq!(self.id, other.id);
        let mut outcome = MergeOutcome::default();

        for (id, theirs) in other.spans {
            match self.spans.entry(id) {
                Entry::Vacant(entry) => {
                    if other.sources.contains(&id) {
                        self.sources.insert(id);
                    }
                    entry.insert(theirs);
                }
                Entry::Occupied(mut entry) => {
                    let ours = entry.get_mut();
                    if theirs.is_defined() {
                        if ours.is_defined() {
                            outcome.conflicts.push(id);
                        } else {
                            ours.define_from(&theirs);
                            self.sources.remove(&id);
                        }
                    }
                    ours.merge_children(theirs.into_children());
                }
            }
        }

        // A conflicting child may have been linked with the discarded
        // definition's start time.
        if !outcome.conflicts.is_empty() {
            let starts: HashMap<SpanId, u64> = outcome
                .conflicts
                .iter()
                .filter_map(|id| self.spans.get(id).map(|span| (*id, span.started())))
                .collect();
            for span in self.spans.values_mut() {
                span.restart_children(&starts);
            }
        }

        self.newest_line = self.newest_line.max(other.newest_line);
        self.oldest_line = min_nonzero(self.oldest_line, other.oldest_line);
        outcome
    }
}

fn min_nonzero(a: u64, b: u64) -> u64 {
    match (a, b) {
        (0, x) | (x, 0) => x,
        (a, b) => a.min(b),
    }
}
