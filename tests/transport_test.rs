use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use corfu_lite::TransportOptions;

mod common;
use common::{init_tracing, read_payloads, test_options, transport_runtime};

#[tokio::test]
async fn test_append_retries_dropped_requests() {
    init_tracing();
    let (log, transport, runtime) =
        transport_runtime(test_options(true), TransportOptions::default()).await;

    let view = runtime.stream("S");
    transport.fail_next(3);
    let address = view.write("survives").await.unwrap();

    assert_eq!(transport.injected_failures(), 3);
    assert!(log.log_unit.read_record(address).unwrap().into_record().is_some());
    assert_eq!(read_payloads(&view).await, vec!["survives"]);
}

#[tokio::test]
async fn test_read_retries_dropped_requests() {
    init_tracing();
    let (_log, transport, runtime) =
        transport_runtime(test_options(false), TransportOptions::default()).await;

    let view = runtime.stream("S");
    view.write("a").await.unwrap();
    view.write("b").await.unwrap();

    let reader = runtime.stream("S");
    transport.fail_next(4);
    assert_eq!(read_payloads(&reader).await, vec!["a", "b"]);
    assert_eq!(transport.injected_failures(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreliable_transport_loses_nothing() {
    init_tracing();
    let transport_options = TransportOptions {
        latency: Duration::from_micros(200),
        failure_rate: 0.2,
    };
    for backpointers in [true, false] {
        let (_log, transport, runtime) =
            transport_runtime(test_options(backpointers), transport_options.clone()).await;
        let runtime = Arc::new(runtime);

        let mut handles = Vec::new();
        for w in 0..10 {
            let runtime = runtime.clone();
            handles.push(tokio::spawn(async move {
                let view = runtime.stream("S");
                for i in 0..5 {
                    view.write(format!("w{}-{}", w, i)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let payloads = read_payloads(&runtime.stream("S")).await;
        assert_eq!(payloads.len(), 50);
        assert_eq!(payloads.iter().collect::<HashSet<_>>().len(), 50);
        assert!(transport.injected_failures() > 0);
    }
}
