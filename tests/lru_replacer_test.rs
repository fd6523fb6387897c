use std::sync::Arc;
use std::thread;

use oxbow::buffer::LruReplacer;
use oxbow::common::FrameId;

#[test]
fn test_victim_order_after_pins() {
    let replacer = LruReplacer::new(7);

    for i in 1..=6 {
        replacer.unpin(FrameId::new(i));
    }
    assert_eq!(replacer.size(), 6);

    replacer.pin(FrameId::new(1));
    replacer.pin(FrameId::new(3));
    replacer.pin(FrameId::new(4));
    assert_eq!(replacer.size(), 3);

    assert_eq!(replacer.victim(), Some(FrameId::new(2)));
    assert_eq!(replacer.victim(), Some(FrameId::new(5)));
    assert_eq!(replacer.victim(), Some(FrameId::new(6)));
    assert_eq!(replacer.victim(), None);
    assert_eq!(replacer.size(), 0);
}

#[test]
fn test_unpin_does_not_refresh_recency() {
    let replacer = LruReplacer::new(4);

    replacer.unpin(FrameId::new(0));
    replacer.unpin(FrameId::new(1));
    replacer.unpin(FrameId::new(2));

    // Frame 0 is touched again: still evicted first.
    replacer.unpin(FrameId::new(0));

    assert_eq!(replacer.size(), 3);
    assert_eq!(replacer.victim(), Some(FrameId::new(0)));
    assert_eq!(replacer.victim(), Some(FrameId::new(1)));
    assert_eq!(replacer.victim(), Some(FrameId::new(2)));
}

#[test]
fn test_pin_then_unpin_reenters_as_most_recent() {
    let replacer = LruReplacer::new(4);

    replacer.unpin(FrameId::new(0));
    replacer.unpin(FrameId::new(1));

    // A real pin/unpin cycle does refresh recency.
    replacer.pin(FrameId::new(0));
    replacer.unpin(FrameId::new(0));

    assert_eq!(replacer.victim(), Some(FrameId::new(1)));
    assert_eq!(replacer.victim(), Some(FrameId::new(0)));
}

#[test]
fn test_concurrent_unpin_and_victim() {
    let replacer = Arc::new(LruReplacer::new(1000));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let replacer = Arc::clone(&replacer);
            thread::spawn(move || {
                for i in 0..250u32 {
                    replacer.unpin(FrameId::new(t * 250 + i));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(replacer.size(), 1000);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let replacer = Arc::clone(&replacer);
            thread::spawn(move || {
                let mut victims = Vec::new();
                while let Some(frame_id) = replacer.victim() {
                    victims.push(frame_id);
                }
                victims
            })
        })
        .collect();

    let mut all: Vec<FrameId> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort();
    all.dedup();

    // Every frame was evicted exactly once.
    assert_eq!(all.len(), 1000);
    assert_eq!(replacer.size(), 0);
}
