//! Concurrency tests for the shared ring queue

use std::{
    collections::VecDeque,
    sync::Arc,
    thread,
};

use hugelink::RingQueue;

#[cfg(test)]
mod ring_queue_tests {
    use super::*;

    #[test]
    fn stress_spsc_preserves_order() {
        const ITEMS: u64 = 200_000;
        let queue: Arc<RingQueue<u64, 64>> = Arc::from(RingQueue::boxed());

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..ITEMS {
                    while !queue.try_enqueue(i) {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut expected = 0;
        while expected < ITEMS {
            match queue.try_dequeue() {
                Some(value) => {
                    assert_eq!(value, expected);
                    expected += 1;
                }
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn stress_peek_advance_consumer() {
        const ITEMS: u32 = 50_000;
        let queue: Arc<RingQueue<u32, 16>> = Arc::from(RingQueue::boxed());

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 1..=ITEMS {
                    while !queue.try_enqueue(i) {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut sum = 0u64;
        let mut seen = 0;
        while seen < ITEMS {
            if let Some(value) = queue.peek() {
                // the slot stays valid until advance
                assert_eq!(queue.peek(), Some(value));
                queue.advance();
                sum += value as u64;
                seen += 1;
            }
        }
        producer.join().unwrap();
        assert_eq!(sum, (ITEMS as u64) * (ITEMS as u64 + 1) / 2);
    }

    #[test]
    fn test_matches_vecdeque_model() {
        let queue: Box<RingQueue<u32, 8>> = RingQueue::boxed();
        let mut model = VecDeque::new();
        let mut next = 0u32;

        // deterministic mix of enqueues and dequeues
        for step in 0..1000u32 {
            if step.wrapping_mul(2654435761) % 5 < 3 {
                let accepted = queue.try_enqueue(next);
                assert_eq!(accepted, model.len() < queue.capacity());
                if accepted {
                    model.push_back(next);
                }
                next += 1;
            } else {
                assert_eq!(queue.try_dequeue(), model.pop_front());
            }
            assert_eq!(queue.count(), model.len());
            assert_eq!(queue.is_full(), model.len() == 7);
        }
    }
}
