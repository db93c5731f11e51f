use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use corfu_lite::{StreamError, StreamId};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

mod common;
use common::{init_tracing, local_runtime, payload_str, read_payloads, test_options};

#[tokio::test]
async fn test_hello_world() {
    init_tracing();
    let (_log, runtime) = local_runtime(test_options(true)).await;

    let view = runtime.stream("S");
    let address = view.write("hello world").await.unwrap();
    assert_eq!(address, 0);

    let record = view.read().await.unwrap().expect("one record");
    assert_eq!(payload_str(&record), "hello world");
    assert!(view.read().await.unwrap().is_none());
}

#[tokio::test]
async fn test_read_sees_later_appends() {
    init_tracing();
    let (_log, runtime) = local_runtime(test_options(true)).await;

    let writer = runtime.stream("S");
    let reader = runtime.stream("S");

    writer.write("a").await.unwrap();
    assert_eq!(read_payloads(&reader).await, vec!["a"]);
    assert!(reader.read().await.unwrap().is_none());

    writer.write("b").await.unwrap();
    assert_eq!(read_payloads(&reader).await, vec!["b"]);
}

#[tokio::test]
async fn test_induced_hole_is_skipped() {
    init_tracing();
    for backpointers in [true, false] {
        let (log, runtime) = local_runtime(test_options(backpointers)).await;
        let s = StreamId::from_name("S");

        let token = runtime.sequencer().next_token(&[s], 1).await.unwrap();
        runtime.fill_hole(token.address).await.unwrap();

        let view = runtime.stream_by_id(s);
        let address = view.write("real").await.unwrap();
        assert!(address > token.address);

        assert_eq!(read_payloads(&view).await, vec!["real"]);
        assert!(log.log_unit.is_hole(token.address));
    }
}

#[tokio::test]
async fn test_abandoned_token_is_filled_by_reader() {
    init_tracing();
    for backpointers in [true, false] {
        let (log, runtime) = local_runtime(test_options(backpointers)).await;
        let s = StreamId::from_name("S");

        // reserved and never written
        let token = runtime.sequencer().next_token(&[s], 1).await.unwrap();

        let view = runtime.stream_by_id(s);
        view.write("after").await.unwrap();

        assert_eq!(read_payloads(&view).await, vec!["after"]);
        assert!(log.log_unit.is_hole(token.address));
    }
}

#[tokio::test]
async fn test_write_after_fill_lands_higher() {
    init_tracing();
    let (log, runtime) = local_runtime(test_options(true)).await;

    // nobody holds a token for 0 yet
    runtime.fill_hole(0).await.unwrap();
    assert!(log.log_unit.is_hole(0));

    let view = runtime.stream("S");
    assert_eq!(view.write("x").await.unwrap(), 1);
    assert_eq!(read_payloads(&view).await, vec!["x"]);
}

#[tokio::test]
async fn test_write_multi_belongs_to_every_stream() {
    init_tracing();
    let (_log, runtime) = local_runtime(test_options(true)).await;
    let a = runtime.stream("A");
    let b = runtime.stream("B");

    a.write("a-only").await.unwrap();
    let shared = a.write_multi("both", &[b.id()]).await.unwrap();
    b.write("b-only").await.unwrap();

    let record = runtime.read(shared).await.unwrap().into_record().unwrap();
    assert!(record.belongs_to(&a.id()));
    assert!(record.belongs_to(&b.id()));
    assert_eq!(record.backpointer(&a.id()), Some(Some(0)));
    assert_eq!(record.backpointer(&b.id()), Some(None));

    assert_eq!(read_payloads(&a).await, vec!["a-only", "both"]);
    assert_eq!(read_payloads(&b).await, vec!["both", "b-only"]);
}

#[tokio::test]
async fn test_chain_and_scan_return_same_records() {
    init_tracing();
    let (log, runtime) = local_runtime(test_options(true)).await;
    let a = runtime.stream("A");
    let b = runtime.stream("B");

    for i in 0..10 {
        a.write(format!("a{}", i)).await.unwrap();
        if i % 3 == 0 {
            b.write(format!("b{}", i)).await.unwrap();
        }
        if i % 4 == 0 {
            b.write_multi(format!("ab{}", i), &[a.id()]).await.unwrap();
        }
    }

    let scan = log.runtime_with(test_options(false)).await.unwrap();
    for name in ["A", "B"] {
        let chained = read_payloads(&runtime.stream(name)).await;
        let scanned = read_payloads(&scan.stream(name)).await;
        assert!(!chained.is_empty());
        assert_eq!(chained, scanned);
    }
}

async fn concurrent_writers(backpointers: bool) {
    let (_log, runtime) = local_runtime(test_options(backpointers)).await;
    let runtime = Arc::new(runtime);

    let mut handles = Vec::new();
    for i in 0..100 {
        let runtime = runtime.clone();
        handles.push(tokio::spawn(async move {
            runtime.stream("S").write(format!("w{}", i)).await.unwrap()
        }));
    }

    let mut addresses = HashSet::new();
    for result in join_all(handles).await {
        assert!(addresses.insert(result.unwrap()));
    }
    assert_eq!(addresses.len(), 100);

    let payloads = read_payloads(&runtime.stream("S")).await;
    assert_eq!(payloads.len(), 100);
    let unique: HashSet<_> = payloads.iter().cloned().collect();
    let expected: HashSet<_> = (0..100).map(|i| format!("w{}", i)).collect();
    assert_eq!(unique, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_with_backpointers() {
    init_tracing();
    concurrent_writers(true).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_with_scan() {
    init_tracing();
    concurrent_writers(false).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_view_hands_out_each_record_once() {
    init_tracing();
    let (_log, runtime) = local_runtime(test_options(true)).await;
    let writer = runtime.stream("S");
    for i in 0..50 {
        writer.write(format!("r{}", i)).await.unwrap();
    }

    let view = Arc::new(runtime.stream("S"));
    let mut handles = Vec::new();
    for _ in 0..4 {
        let view = view.clone();
        handles.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(record) = view.read().await.unwrap() {
                seen.push(payload_str(&record));
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    assert_eq!(all.len(), 50);
    assert_eq!(all.iter().collect::<HashSet<_>>().len(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reader_follows_concurrent_writers() {
    init_tracing();
    let (_log, runtime) = local_runtime(test_options(true)).await;
    let runtime = Arc::new(runtime);

    let mut writers = Vec::new();
    for w in 0..5 {
        let runtime = runtime.clone();
        writers.push(tokio::spawn(async move {
            let view = runtime.stream("S");
            for i in 0..20 {
                view.write(format!("w{}-{}", w, i)).await.unwrap();
            }
        }));
    }

    let reader = runtime.stream("S");
    let collected = tokio::time::timeout(Duration::from_secs(30), async {
        let mut collected = Vec::new();
        while collected.len() < 100 {
            match reader.read().await.unwrap() {
                Some(record) => collected.push(payload_str(&record)),
                None => tokio::time::sleep(Duration::from_millis(1)).await,
            }
        }
        collected
    })
    .await
    .expect("reader caught up");

    for writer in writers {
        writer.await.unwrap();
    }
    assert_eq!(collected.iter().collect::<HashSet<_>>().len(), 100);
    assert!(reader.read().await.unwrap().is_none());
}

#[tokio::test]
async fn test_seek_skips_earlier_records() {
    init_tracing();
    let (_log, runtime) = local_runtime(test_options(true)).await;
    let view = runtime.stream("S");

    let mut addresses = Vec::new();
    for i in 0..5 {
        addresses.push(view.write(format!("r{}", i)).await.unwrap());
    }

    view.seek(addresses[2]).await;
    assert_eq!(view.cursor().await, addresses[2]);
    assert_eq!(read_payloads(&view).await, vec!["r2", "r3", "r4"]);

    // never rewinds
    view.seek(0).await;
    assert!(view.read().await.unwrap().is_none());
}

#[tokio::test]
async fn test_read_cache_serves_decided_addresses() {
    init_tracing();
    let mut options = test_options(true);
    options.cache_enabled = true;
    options.cache_capacity = 16;
    let (_log, runtime) = local_runtime(options).await;

    let view = runtime.stream("S");
    for i in 0..3 {
        view.write(format!("r{}", i)).await.unwrap();
    }

    let cache = runtime.address_space().cache().expect("cache enabled");
    assert_eq!(cache.len(), 3);
    assert_eq!(
        read_payloads(&runtime.stream("S")).await,
        vec!["r0", "r1", "r2"]
    );
    assert!(runtime.read(7).await.unwrap().is_empty());
    assert_eq!(cache.len(), 3);
}

#[tokio::test]
async fn test_write_cancelled_while_sequencer_not_ready() {
    init_tracing();
    let mut options = test_options(true);
    options.sequencer.require_recovery = true;
    let (_log, runtime) = local_runtime(options).await;

    let view = runtime.stream("S");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = view.write_with_cancel("never", &cancel).await;
    assert!(matches!(result, Err(StreamError::Cancelled)));
}

#[tokio::test]
async fn test_read_cancelled_while_waiting_on_reservation() {
    init_tracing();
    let mut options = test_options(true);
    options.hole_fill_grace = Duration::from_secs(60);
    let (log, runtime) = local_runtime(options).await;
    let s = StreamId::from_name("S");

    let token = runtime.sequencer().next_token(&[s], 1).await.unwrap();

    let view = runtime.stream_by_id(s);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = view.read_with_cancel(&cancel).await;
    assert!(matches!(result, Err(StreamError::Cancelled)));
    assert!(log.log_unit.read_record(token.address).unwrap().is_empty());
}

#[tokio::test]
async fn test_retry_budget_exhausted() {
    init_tracing();
    let mut options = test_options(true);
    options.sequencer.require_recovery = true;
    options.retry.max_attempts = Some(3);
    let (_log, runtime) = local_runtime(options).await;

    let result = runtime.stream("S").write("x").await;
    assert!(matches!(result, Err(StreamError::RetriesExhausted(3))));
}

#[tokio::test]
async fn test_epoch_change_is_recorded() {
    init_tracing();
    let (log, runtime) = local_runtime(test_options(true)).await;
    let before = runtime.stream("S");
    assert_eq!(before.epoch(), 0);

    log.layout.bump_epoch();
    let layout = runtime.refresh_layout().await.unwrap();
    assert_eq!(layout.epoch, 1);
    assert_eq!(runtime.epoch(), 1);

    let after = runtime.stream("S");
    assert_eq!(after.epoch(), 1);

    // views from the old epoch keep working
    before.write("old").await.unwrap();
    assert_eq!(read_payloads(&after).await, vec!["old"]);
}
