use proptest::prelude::*;

use tracer_dictionary::ServiceDictionary;
use tracer_store::{JsonWriter, OutputBuffer, Request, WriteOutcome};
use tracer_types::{Calendar, RequestId, ServiceId, SpanEvent, SpanId, NULL_SPAN};

const REQUEST: RequestId = RequestId::from_bytes(*b"propreq0");

fn span(n: usize) -> SpanId {
    let bytes: [u8; 8] = format!("span{n:04}").into_bytes().try_into().unwrap();
    SpanId::from_bytes(bytes)
}

/// A random call tree as lines: span `i + 1` is called by a span `< i + 1`,
/// span 0 by the synthetic root. Start times are distinct so sibling order
/// is fully determined.
fn tree() -> impl Strategy<Value = Vec<SpanEvent>> {
    prop::collection::vec((any::<prop::sample::Index>(), 0u64..1_000, 0u64..50), 0..24).prop_map(|shape| {
        let mut lines = vec![SpanEvent {
            service: ServiceId::new(1),
            request: REQUEST,
            started: 0,
            ended: 5_000,
            caller: NULL_SPAN,
            callee: span(0),
        }];
        for (i, (parent, base, took)) in shape.into_iter().enumerate() {
            let started = base * 32 + i as u64 + 1;
            lines.push(SpanEvent {
                service: ServiceId::new(2),
                request: REQUEST,
                started,
                ended: started + took,
                caller: span(parent.index(i + 1)),
                callee: span(i + 1),
            });
        }
        lines
    })
}

fn build(lines: &[SpanEvent]) -> Request {
    let mut request = Request::new(REQUEST);
    for line in lines {
        request.record(line);
    }
    request
}

fn render(request: &Request) -> String {
    let calendar = Calendar::with_years(1970, 1971).unwrap();
    let mut dict = ServiceDictionary::new();
    dict.add(b"front");
    dict.add(b"back");
    let mut out = OutputBuffer::with_capacity(64 * 1024);
    let outcome = JsonWriter::new(&calendar, &mut dict)
        .write_request(&mut out, request)
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Written);
    String::from_utf8(out.into_vec()).unwrap()
}

/// Whether every span below `id` lists its children in start order.
fn children_sorted(request: &Request, id: SpanId) -> bool {
    let Some(span) = request.span(id) else {
        return true;
    };
    let starts: Vec<u64> = span
        .children()
        .iter()
        .map(|c| request.span(c.id).unwrap().started())
        .collect();
    starts.windows(2).all(|w| w[0] <= w[1]) && span.children().iter().all(|c| children_sorted(request, c.id))
}

proptest! {
    /// Children end up ordered by start time whatever the line order.
    #[test]
    fn children_sorted_for_any_line_order(lines in tree(), seed in any::<u64>()) {
        let mut shuffled = lines.clone();
        let mut state = seed | 1;
        for i in (1..shuffled.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            shuffled.swap(i, (state % (i as u64 + 1)) as usize);
        }

        let request = build(&shuffled);
        prop_assert!(children_sorted(&request, NULL_SPAN));
        prop_assert_eq!(request.span_count(), lines.len() + 1);
        prop_assert_eq!(render(&request), render(&build(&lines)));
    }

    /// Splitting the lines into two blocks and merging either way reproduces
    /// the single-block rendering.
    #[test]
    fn merge_matches_single_block(lines in tree(), split in any::<prop::sample::Index>()) {
        let at = split.index(lines.len() + 1);
        let (left, right) = lines.split_at(at);
        let whole = render(&build(&lines));

        let mut forward = build(left);
        let outcome = forward.merge(build(right));
        prop_assert!(outcome.conflicts.is_empty());
        prop_assert_eq!(render(&forward), whole.clone());

        let mut backward = build(right);
        backward.merge(build(left));
        prop_assert_eq!(render(&backward), whole);
    }
}
