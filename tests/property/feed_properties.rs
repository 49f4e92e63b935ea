//! Property-based tests for the bounded newest-first feed.
//!
//! Uses proptest to verify, for arbitrary operation sequences:
//! 1. The feed never exceeds its capacity and the live count never exceeds its length.
//! 2. Single inserts land at the head; batches keep their own order.
//! 3. A snapshot merge keeps the live head first and drops snapshot duplicates.

use proptest::prelude::*;
use sitesync::store::feed::Feed;

#[derive(Debug, Clone)]
enum Op {
    Push(u16),
    Prepend(Vec<u16>),
    Merge(Vec<u16>),
    Retain(u16),
    Clear,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<u16>().prop_map(Op::Push),
        2 => prop::collection::vec(any::<u16>(), 0..8).prop_map(Op::Prepend),
        2 => prop::collection::vec(any::<u16>(), 0..12).prop_map(Op::Merge),
        1 => (1..8_u16).prop_map(Op::Retain),
        1 => Just(Op::Clear),
    ]
}

fn apply(feed: &mut Feed<u16>, op: Op) {
    match op {
        Op::Push(item) => feed.push_front(item),
        Op::Prepend(batch) => feed.prepend_batch(batch),
        Op::Merge(snapshot) => feed.merge_snapshot(snapshot, |a, b| a == b),
        Op::Retain(modulus) => feed.retain(|item| item % modulus != 0),
        Op::Clear => feed.clear(),
    }
}

proptest! {
    #[test]
    fn bounds_hold_after_any_sequence(
        capacity in 0..20_usize,
        ops in prop::collection::vec(arb_op(), 0..60),
    ) {
        let mut feed = Feed::new(capacity);
        for op in ops {
            apply(&mut feed, op);
            prop_assert!(feed.len() <= capacity);
            prop_assert!(feed.live_len() <= feed.len());
        }
    }

    #[test]
    fn push_front_lands_at_head(
        capacity in 1..20_usize,
        seed in prop::collection::vec(any::<u16>(), 0..20),
        item in any::<u16>(),
    ) {
        let mut feed = Feed::new(capacity);
        feed.prepend_batch(seed.clone());
        let before = feed.to_vec();
        feed.push_front(item);

        let after = feed.to_vec();
        prop_assert_eq!(after[0], item);
        let expected_len = (before.len() + 1).min(capacity);
        prop_assert_eq!(after.len(), expected_len);
        prop_assert_eq!(&after[1..], &before[..expected_len - 1]);
    }

    #[test]
    fn prepend_batch_keeps_batch_order(
        capacity in 0..20_usize,
        existing in prop::collection::vec(any::<u16>(), 0..10),
        batch in prop::collection::vec(any::<u16>(), 0..10),
    ) {
        let mut feed = Feed::new(capacity);
        feed.prepend_batch(existing.clone());
        let before = feed.to_vec();
        feed.prepend_batch(batch.clone());

        let expected: Vec<u16> = batch.into_iter().chain(before).take(capacity).collect();
        prop_assert_eq!(feed.to_vec(), expected);
    }

    #[test]
    fn merge_keeps_live_head_without_duplicates(
        capacity in 1..30_usize,
        settled in prop::collection::vec(any::<u16>(), 0..10),
        live in prop::collection::vec(any::<u16>(), 0..10),
        snapshot in prop::collection::vec(any::<u16>(), 0..10),
    ) {
        let mut feed = Feed::new(capacity);
        feed.merge_snapshot(settled, |a, b| a == b);
        for item in &live {
            feed.push_front(*item);
        }
        let head: Vec<u16> = feed.to_vec().into_iter().take(feed.live_len()).collect();

        feed.merge_snapshot(snapshot.clone(), |a, b| a == b);
        let merged = feed.to_vec();

        let expected: Vec<u16> = head
            .iter()
            .copied()
            .chain(snapshot.into_iter().filter(|item| !head.contains(item)))
            .take(capacity)
            .collect();
        prop_assert_eq!(merged, expected);
        prop_assert_eq!(feed.live_len(), 0);
    }
}
