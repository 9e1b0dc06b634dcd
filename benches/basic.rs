use criterion::{criterion_group, criterion_main, Criterion};
use serial_link::port::{MockDriver, PortConfig};
use serial_link::Connection;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn open_mock(rt: &tokio::runtime::Runtime) -> Connection {
    let driver = MockDriver::new();
    driver.add_device("BENCH0");
    let conn = Connection::new(Arc::new(driver));
    let _guard = rt.enter();
    if let Err(e) = conn.open(PortConfig::new("BENCH0", 115_200)) {
        panic!("mock port failed to open: {e}");
    }
    conn
}

pub fn bench_send(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let conn = open_mock(&rt);
    let payload = [0x55u8; 64];

    c.bench_function("send_64_bytes", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(conn.send(&payload).await.unwrap()) })
    });

    rt.block_on(conn.close());
}

pub fn bench_mailbox(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let conn = open_mock(&rt);
    let mut out = [0u8; serial_link::RECEIVE_BUFFER_CAPACITY];

    c.bench_function("set_send_buffer_1k", |b| {
        let data = [0xAAu8; serial_link::SEND_BUFFER_CAPACITY];
        b.iter(|| conn.set_send_buffer(black_box(&data)).unwrap())
    });
    c.bench_function("receive_into_caller_buffer", |b| {
        b.iter(|| black_box(conn.receive(&mut out)))
    });

    rt.block_on(conn.close());
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(300))
        .measurement_time(Duration::from_secs(2));
    targets = bench_send, bench_mailbox
}
criterion_main!(benches);
