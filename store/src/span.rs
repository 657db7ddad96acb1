//! A single span and its ordered child links.

use std::collections::{HashMap, HashSet};

use tracer_types::{ServiceId, SpanId};

/// Link from a span to one of its children.
///
/// Children are referenced by id and resolved through the owning request's
/// span map; the start time is cached so ordering never needs a lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildRef {
    pub started: u64,
    pub id: SpanId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Span {
    id: SpanId,
    service: ServiceId,
    started: u64,
    ended: u64,
    children: Vec<ChildRef>,
}

impl Span {
    /// A span known only as a caller: no service, no times.
    pub fn placeholder(id: SpanId) -> Self {
        Self {
            id,
            service: ServiceId::UNRESOLVED,
            started: 0,
            ended: 0,
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> SpanId {
        self.id
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn started(&self) -> u64 {
        self.started
    }

    pub fn ended(&self) -> u64 {
        self.ended
    }

    pub fn children(&self) -> &[ChildRef] {
        &self.children
    }

    /// Whether a line defining this span has been seen.
    pub fn is_defined(&self) -> bool {
        self.service.is_resolved()
    }

    pub fn define(&mut self, service: ServiceId, started: u64, ended: u64) {
        self.service = service;
        self.started = started;
        self.ended = ended;
    }

    /// Take over the defining fields of `other`, keeping our children.
    pub(crate) fn define_from(&mut self, other: &Span) {
        self.define(other.service, other.started, other.ended);
    }

    pub(crate) fn into_children(self) -> Vec<ChildRef> {
        self.children
    }

    /// Insert `child` keeping children ordered by start time, returning the
    /// new child count.
    ///
    /// Lines mostly arrive in start order, so the scan runs from the end.
    /// Equal start times keep arrival order.
    pub fn add_child(&mut self, child: ChildRef) -> usize {
        let at = self
            .children
            .iter()
            .rposition(|c| c.started <= child.started)
            .map_or(0, |i| i + 1);
        self.children.insert(at, child);
        self.children.len()
    }

    /// Replace the cached start time of the listed children and restore
    /// start order. Ties keep their current order.
    pub(crate) fn restart_children(&mut self, starts: &HashMap<SpanId, u64>) {
        let mut changed = false;
        for child in &mut self.children {
            if let Some(&started) = starts.get(&child.id) {
                if child.started != started {
                    child.started = started;
                    changed = true;
                }
            }
        }
        if changed {
            self.children.sort_by_key(|c| c.started);
        }
    }

    /// Merge another sorted child list into ours. Links already present are
    /// not duplicated.
    pub fn merge_children(&mut self, other: Vec<ChildRef>) {
        if other.is_empty() {
            return;
        }
        if self.children.is_empty() {
            self.children = other;
            return;
        }
        let ours = std::mem::take(&mut self.children);
        let mut seen = HashSet::with_capacity(ours.len() + other.len());
        let mut merged = Vec::with_capacity(ours.len() + other.len());
        let mut left = ours.into_iter().peekable();
        let mut right = other.into_iter().peekable();
        loop {
            let next = match (left.peek(), right.peek()) {
                (Some(l), Some(r)) if r.started < l.started => right.next(),
                (Some(_), _) => left.next(),
                (None, Some(_)) => right.next(),
                (None, None) => break,
            };
            if let Some(child) = next {
                if seen.insert(child.id) {
                    merged.push(child);
                }
            }
        }
        self.children = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(started: u64, name: &[u8; 8]) -> ChildRef {
        ChildRef {
            started,
            id: SpanId::from_bytes(*name),
        }
    }

    #[test]
    fn placeholder_is_undefined() {
        let mut span = Span::placeholder(SpanId::from_bytes(*b"abcdefgh"));
        assert!(!span.is_defined());
        span.define(ServiceId::new(3), 5, 17);
        assert!(span.is_defined());
        assert_eq!((span.started(), span.ended()), (5, 17));
    }

    #[test]
    fn add_child_sorts_by_start() {
        let mut span = Span::placeholder(SpanId::from_bytes(*b"parent00"));
        assert_eq!(span.add_child(child(5, b"bbbbbbbb")), 1);
        assert_eq!(span.add_child(child(8, b"cccccccc")), 2);
        assert_eq!(span.add_child(child(4, b"aaaaaaaa")), 3);
        assert_eq!(span.add_child(child(6, b"dddddddd")), 4);
        let starts: Vec<u64> = span.children().iter().map(|c| c.started).collect();
        assert_eq!(starts, [4, 5, 6, 8]);
    }

    #[test]
    fn equal_starts_keep_arrival_order() {
        let mut span = Span::placeholder(SpanId::from_bytes(*b"parent00"));
        span.add_child(child(5, b"first000"));
        span.add_child(child(5, b"second00"));
        assert_eq!(span.children()[1].id, SpanId::from_bytes(*b"second00"));
    }

    #[test]
    fn merge_children_interleaves_and_dedups() {
        let mut span = Span::placeholder(SpanId::from_bytes(*b"parent00"));
        span.add_child(child(1, b"aaaaaaaa"));
        span.add_child(child(7, b"cccccccc"));
        span.merge_children(vec![child(3, b"bbbbbbbb"), child(7, b"cccccccc"), child(9, b"dddddddd")]);
        let starts: Vec<u64> = span.children().iter().map(|c| c.started).collect();
        assert_eq!(starts, [1, 3, 7, 9]);
    }
}
