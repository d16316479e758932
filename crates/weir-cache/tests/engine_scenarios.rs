//! End-to-end engine scenarios: a real prefetch thread over in-memory and
//! fault-injecting sources.

use std::sync::Arc;
use std::time::{Duration, Instant};

use weir_cache::CachedSource;
use weir_error::WeirError;
use weir_source::{DataSource, FaultSource, MemorySource, ReadFault};

/// Reference pattern matching `MemorySource::patterned`.
fn pattern(offset: u64, len: usize) -> Vec<u8> {
    (0..len).map(|i| ((offset as usize + i) % 251) as u8).collect()
}

fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn cold_sequential_read_to_end_of_stream() {
    const LEN: usize = 2 * 1024 * 1024 + 300_000; // not page-aligned
    let engine = CachedSource::with_config(
        Arc::new(MemorySource::patterned(LEN)),
        Some("64/1024/0"),
        false,
        false,
    );

    let mut offset = 0u64;
    let mut buf = [0u8; 8192];
    loop {
        match engine.read_at(offset, &mut buf) {
            Ok(n) => {
                assert!(n > 0, "zero-length success is not part of the contract here");
                assert_eq!(
                    &buf[..n],
                    &pattern(offset, n)[..],
                    "data mismatch at offset {offset}"
                );
                offset += n as u64;
            }
            Err(WeirError::EndOfStream) => break,
            Err(err) => panic!("unexpected error at offset {offset}: {err}"),
        }
    }
    assert_eq!(offset, LEN as u64, "every byte must be read exactly once");
}

#[test]
fn backwards_seek_outside_window() {
    const LEN: usize = 2 * 1024 * 1024;
    let engine = CachedSource::with_config(
        Arc::new(MemorySource::patterned(LEN)),
        Some("64/512/0"),
        false,
        false,
    );

    // march the window forward
    let mut buf = [0u8; 8192];
    let mut offset = 0u64;
    while offset < 1_500_000 {
        let n = engine.read_at(offset, &mut buf).unwrap();
        offset += n as u64;
    }

    // jump back to the very beginning
    let n = engine.read_at(0, &mut buf).unwrap();
    assert_eq!(n, buf.len());
    assert_eq!(&buf[..], &pattern(0, buf.len())[..]);
}

#[test]
fn short_forward_seek_lands_with_back_padding() {
    const LEN: usize = 3 * 1024 * 1024;
    let engine = CachedSource::with_config(
        Arc::new(MemorySource::patterned(LEN)),
        Some("64/512/0"),
        false,
        false,
    );

    let mut buf = [0u8; 4096];
    engine.read_at(0, &mut buf).unwrap();

    // far outside the 512 KiB window
    let target = 2_000_000u64;
    let n = engine.read_at(target, &mut buf).unwrap();
    assert_eq!(n, buf.len());
    assert_eq!(&buf[..], &pattern(target, buf.len())[..]);

    // the window was re-seeded 256 KiB early, so a near-miss just before
    // the target is already cached and needs no further seek
    let behind = target - 100_000;
    let n = engine.read_at(behind, &mut buf).unwrap();
    assert_eq!(n, buf.len());
    assert_eq!(&buf[..], &pattern(behind, buf.len())[..]);
}

#[test]
fn transient_failure_is_masked_and_recovers() {
    let source = Arc::new(FaultSource::new(MemorySource::patterned(512 * 1024)).http_like());
    source.push_read_fault(ReadFault::Error(WeirError::transport("connection reset")));

    let engine = CachedSource::with_config(
        Arc::clone(&source) as Arc<dyn DataSource>,
        Some("64/256/0"),
        false,
        false,
    );

    // the first fetch fails; while retries remain the consumer sees a
    // healthy status
    assert!(wait_until(|| source.read_calls() >= 1, Duration::from_secs(2)));
    let (_, status) = engine.approx_data_remaining();
    assert_eq!(status, None, "transient failure must be masked");

    // the retry fires after the cooldown, reconnects, and recovers
    assert!(
        wait_until(|| engine.cached_size() > 0, Duration::from_secs(6)),
        "prefetcher should recover after the retry cooldown"
    );
    assert!(source.reconnect_calls() >= 1);

    let mut buf = [0u8; 2048];
    let n = engine.read_at(0, &mut buf).unwrap();
    assert_eq!(n, buf.len());
    assert_eq!(&buf[..], &pattern(0, buf.len())[..]);

    let (_, status) = engine.approx_data_remaining();
    assert_eq!(status, None, "recovery must clear the latched failure");
}

#[test]
fn permanent_failure_surfaces_and_keeps_window_readable() {
    let source = Arc::new(FaultSource::new(MemorySource::patterned(512 * 1024)).http_like());
    let engine = CachedSource::with_config(
        Arc::clone(&source) as Arc<dyn DataSource>,
        Some("16/64/0"),
        false,
        false,
    );

    // let the first page land, then fail everything afterwards
    assert!(wait_until(
        || engine.cached_size() >= 64 * 1024,
        Duration::from_secs(5)
    ));
    source.fail_reads_forever(WeirError::Unsupported);

    // bytes already cached stay readable
    let mut buf = [0u8; 512];
    let n = engine.read_at(0, &mut buf).unwrap();
    assert_eq!(n, buf.len());
    assert_eq!(&buf[..], &pattern(0, buf.len())[..]);

    // a miss forces a fetch attempt, which latches the permanent failure
    // and surfaces it to the reader
    assert_eq!(
        engine.read_at(40 * 1024 * 1024, &mut buf),
        Err(WeirError::Unsupported),
        "out-of-window read must surface the permanent error"
    );

    let (_, status) = engine.approx_data_remaining();
    assert_eq!(
        status,
        Some(WeirError::Unsupported),
        "permanent failures are not masked"
    );
}

#[test]
fn suspend_halts_fetching_and_resume_restarts() {
    let source = Arc::new(FaultSource::new(MemorySource::patterned(1024 * 1024)).http_like());
    let engine = CachedSource::with_config(
        Arc::clone(&source) as Arc<dyn DataSource>,
        Some("16/128/0"),
        false,
        false,
    );

    assert!(wait_until(
        || engine.cached_size() >= 128 * 1024,
        Duration::from_secs(5)
    ));

    engine.suspend();
    // the next pump activation drops the connection and parks
    assert!(wait_until(
        || source.disconnect_calls() >= 1,
        Duration::from_secs(2)
    ));
    std::thread::sleep(Duration::from_millis(150));
    let calls_while_parked = source.read_calls();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(
        source.read_calls(),
        calls_while_parked,
        "a suspended engine must not touch the upstream"
    );

    engine.resume();

    // a read past the parked window forces a reconnect and fresh data
    let target = 512 * 1024u64;
    let mut buf = [0u8; 4096];
    let n = engine.read_at(target, &mut buf).unwrap();
    assert_eq!(n, buf.len());
    assert_eq!(&buf[..], &pattern(target, buf.len())[..]);
    assert!(source.reconnect_calls() >= 1);
}

#[test]
fn disconnect_unblocks_waiting_reader() {
    let source = Arc::new(FaultSource::new(MemorySource::patterned(512 * 1024)).http_like());
    source.fail_reads_forever(WeirError::transport("black hole"));

    let engine = CachedSource::with_config(
        Arc::clone(&source) as Arc<dyn DataSource>,
        Some("16/64/0"),
        false,
        false,
    );

    std::thread::scope(|scope| {
        let reader = scope.spawn(|| {
            let mut buf = [0u8; 1024];
            engine.read_at(0, &mut buf)
        });

        // give the reader time to block on the deferred-read loop
        std::thread::sleep(Duration::from_millis(150));
        engine.disconnect();

        let result = reader.join().expect("reader thread must not panic");
        assert_eq!(result, Err(WeirError::EndOfStream));
    });

    // and it stays torn down
    let mut buf = [0u8; 16];
    assert_eq!(engine.read_at(0, &mut buf), Err(WeirError::EndOfStream));
}

#[test]
fn high_watermark_disconnect_and_reconnect_on_miss() {
    let source = Arc::new(FaultSource::new(MemorySource::patterned(1024 * 1024)).http_like());
    let engine = CachedSource::with_config(
        Arc::clone(&source) as Arc<dyn DataSource>,
        Some("16/64/0"),
        true, // disconnect at high watermark
        false,
    );

    // the window fills to one page and the connection is dropped
    assert!(wait_until(
        || source.disconnect_calls() >= 1,
        Duration::from_secs(5)
    ));
    assert!(engine.cached_size() >= 64 * 1024);

    // in-window reads are unaffected
    let mut buf = [0u8; 2048];
    let n = engine.read_at(0, &mut buf).unwrap();
    assert_eq!(n, buf.len());
    assert_eq!(&buf[..], &pattern(0, buf.len())[..]);

    // a miss past the window reconnects at an offset and refills
    let reconnects_before = source.reconnect_calls();
    let target = 512 * 1024u64;
    let n = engine.read_at(target, &mut buf).unwrap();
    assert_eq!(n, buf.len());
    assert_eq!(&buf[..], &pattern(target, buf.len())[..]);
    assert!(source.reconnect_calls() > reconnects_before);
}

#[test]
fn random_access_reads_match_upstream() {
    const LEN: usize = 1_200_000;
    let engine = CachedSource::with_config(
        Arc::new(MemorySource::patterned(LEN)),
        Some("64/512/0"),
        false,
        false,
    );

    let offsets = [0u64, 700_000, 123, 999_999, 500_000, 1_100_000, 42];
    let mut buf = [0u8; 1000];
    for &offset in &offsets {
        let n = engine.read_at(offset, &mut buf).unwrap();
        let expected = (LEN as u64 - offset).min(buf.len() as u64) as usize;
        assert_eq!(n, expected, "length mismatch at offset {offset}");
        assert_eq!(
            &buf[..n],
            &pattern(offset, n)[..],
            "data mismatch at offset {offset}"
        );
    }
}

#[test]
fn resume_fetching_if_necessary_restarts_an_idle_engine() {
    const LEN: usize = 4 * 1024 * 1024;
    let engine = CachedSource::with_config(
        Arc::new(MemorySource::patterned(LEN)),
        Some("64/2048/0"),
        false,
        false,
    );

    // fill to the high watermark and march the reader deep into the window
    assert!(wait_until(
        || engine.cached_size() >= 2 * 1024 * 1024,
        Duration::from_secs(5)
    ));
    let mut buf = [0u8; 8192];
    let mut offset = 0u64;
    while offset < 1_800_000 {
        let n = engine.read_at(offset, &mut buf).unwrap();
        offset += n as u64;
    }

    let before = engine.cached_size();
    engine.resume_fetching_if_necessary();
    assert!(
        wait_until(|| engine.cached_size() > before, Duration::from_secs(5)),
        "explicit resume must evict behind the reader and fetch further"
    );
}
