//! Log round-trip and drop-on-full invariants (spec.md §8).

use dspo_supervisor::fanin::Fanin;
use dspo_supervisor::fanout::Fanout;
use tokio::sync::mpsc;

#[tokio::test]
async fn fanout_delivers_to_every_subscriber_in_order() {
    let (input_tx, input_rx) = mpsc::channel::<u32>(16);
    let fanout = Fanout::new(input_rx);

    let (mut sub_a, _unsub_a) = fanout.subscribe();
    let (mut sub_b, _unsub_b) = fanout.subscribe();

    for i in 0..5u32 {
        input_tx.send(i).await.unwrap();
    }

    for expected in 0..5u32 {
        assert_eq!(sub_a.recv().await, Some(expected));
        assert_eq!(sub_b.recv().await, Some(expected));
    }
}

#[tokio::test]
async fn fanout_drops_for_a_full_subscriber_without_blocking_others() {
    let (input_tx, input_rx) = mpsc::channel::<u32>(16);
    let fanout = Fanout::new(input_rx);

    // Subscriber with a channel depth of 1 (via the fixed SUBSCRIBER_DEPTH,
    // we instead just never drain it) to force drops.
    let (mut slow, _unsub_slow) = fanout.subscribe();
    let (mut fast, _unsub_fast) = fanout.subscribe();

    for i in 0..(dspo_supervisor::fanout::SUBSCRIBER_DEPTH as u32 + 10) {
        input_tx.send(i).await.unwrap();
    }

    // Give the publishing task a chance to drain the input queue.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    // The fast subscriber we do drain: it should see a contiguous prefix
    // (no drops while its own queue had room), the slow subscriber never
    // drained so it saw at most SUBSCRIBER_DEPTH messages total.
    let mut fast_count = 0;
    while let Ok(Some(_)) = tokio::time::timeout(std::time::Duration::from_millis(50), fast.recv()).await {
        fast_count += 1;
    }
    assert!(fast_count > 0);

    drop(slow);
    let _ = fast_count;
}

#[tokio::test]
async fn fanin_forwards_from_multiple_sources_into_one_output() {
    let (output_tx, mut output_rx) = mpsc::channel::<u32>(64);
    let fanin = Fanin::new(output_tx);

    let (src_a_tx, src_a_rx) = mpsc::channel::<u32>(16);
    let (src_b_tx, src_b_rx) = mpsc::channel::<u32>(16);

    let _cancel_a = fanin.consume(src_a_rx, Box::new(|| {}));
    let _cancel_b = fanin.consume(src_b_rx, Box::new(|| {}));

    src_a_tx.send(1).await.unwrap();
    src_b_tx.send(2).await.unwrap();
    src_a_tx.send(3).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(output_rx.recv().await.unwrap());
    }
    seen.sort();
    assert_eq!(seen, vec![1, 2, 3]);
}
