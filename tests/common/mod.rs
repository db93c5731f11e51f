#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use corfu_lite::{
    LocalLog, LocalTransport, LogRecord, LogRuntime, RuntimeOptions, StreamView, TransportOptions,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Options with a short hole fill grace so tests do not wait on abandoned
/// addresses.
pub fn test_options(backpointers: bool) -> RuntimeOptions {
    let mut options = RuntimeOptions::default();
    options.backpointers_enabled = backpointers;
    options.hole_fill_grace = Duration::from_millis(5);
    options.hole_fill_poll = Duration::from_millis(1);
    options
}

pub async fn local_runtime(options: RuntimeOptions) -> (LocalLog, LogRuntime) {
    let log = LocalLog::new(options).unwrap();
    let runtime = log.runtime().await.unwrap();
    (log, runtime)
}

/// A runtime whose sequencer and log unit calls go through one
/// `LocalTransport`.
pub async fn transport_runtime(
    options: RuntimeOptions,
    transport_options: TransportOptions,
) -> (LocalLog, Arc<LocalTransport>, LogRuntime) {
    let log = LocalLog::new(options.clone()).unwrap();
    let transport = Arc::new(LocalTransport::new(
        "local",
        log.sequencer.clone(),
        log.log_unit.clone(),
        transport_options,
    ));
    let runtime = LogRuntime::connect(
        log.layout.clone(),
        transport.clone(),
        transport.clone(),
        options,
    )
    .await
    .unwrap();
    (log, transport, runtime)
}

pub fn payload_str(record: &LogRecord) -> String {
    String::from_utf8(record.payload().unwrap().to_vec()).unwrap()
}

pub async fn read_payloads(view: &StreamView) -> Vec<String> {
    view.read_all()
        .await
        .unwrap()
        .iter()
        .map(payload_str)
        .collect()
}
