//! Many independent TCP connections sharing one event loop: each client
//! sends a handful of random writes tagged with its own id, and the
//! server must reassemble each connection's bytes without any mixing
//! between pairs.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;

use reactor::{Config, Connection, EventLoop, TcpListener};

const PAIRS: u32 = 100;
const WRITES_PER_PAIR: usize = 10;

#[test]
fn hundred_pairs_no_cross_contamination() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rng = rand::rng();
    let mut expected: HashMap<u32, Vec<u8>> = HashMap::new();
    for pair_id in 0..PAIRS {
        let mut payload = Vec::new();
        for _ in 0..WRITES_PER_PAIR {
            let len = rng.random_range(1..=256);
            payload.extend((0..len).map(|_| rng.random::<u8>()));
        }
        expected.insert(pair_id, payload);
    }

    let mut event_loop = EventLoop::new(Config::new()).unwrap();

    let per_conn: Arc<Mutex<HashMap<u64, Vec<u8>>>> = Arc::new(Mutex::new(HashMap::new()));
    let results: Arc<Mutex<HashMap<u32, Vec<u8>>>> = Arc::new(Mutex::new(HashMap::new()));

    let per_conn_msg = per_conn.clone();
    let on_message: reactor::ConnectionHook = Arc::new(move |conn: &Arc<Connection>| {
        let mut buf = [0u8; 4096];
        loop {
            let n = conn.read(&mut buf);
            if n == 0 {
                break;
            }
            per_conn_msg.lock().unwrap().entry(conn.id()).or_default().extend_from_slice(&buf[..n]);
        }
    });

    let per_conn_close = per_conn.clone();
    let results_close = results.clone();
    let on_close: reactor::ConnectionHook = Arc::new(move |conn: &Arc<Connection>| {
        if let Some(data) = per_conn_close.lock().unwrap().remove(&conn.id()) {
            if data.len() >= 4 {
                let pair_id = u32::from_le_bytes(data[0..4].try_into().unwrap());
                results_close.lock().unwrap().insert(pair_id, data[4..].to_vec());
            }
        }
    });

    let listener = TcpListener::bind(
        &mut event_loop,
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
        1024,
        Arc::new(AtomicU64::new(PAIRS as u64 + 1)),
        Box::new(|_loop_, _conn| {}),
        Some(on_message),
        Some(on_close),
    )
    .unwrap();

    let addr = listener.local_addr().unwrap();
    let server_addr = SocketAddrV4::new(addr.ip(), addr.port());

    for pair_id in 0..PAIRS {
        let mut wire = Vec::with_capacity(4 + expected[&pair_id].len());
        wire.extend_from_slice(&pair_id.to_le_bytes());
        wire.extend_from_slice(&expected[&pair_id]);

        let conn = reactor::connect(
            &mut event_loop,
            server_addr,
            pair_id as u64,
            format!("client-{}", pair_id),
            None,
            None,
        )
        .unwrap();
        conn.send(Some(&mut event_loop), &wire);
        conn.shutdown(&mut event_loop);
    }

    for _ in 0..2000 {
        event_loop.run_once().unwrap();
        if results.lock().unwrap().len() == PAIRS as usize {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    let results = results.lock().unwrap();
    assert_eq!(results.len(), PAIRS as usize, "not every pair completed");
    for (pair_id, expected_bytes) in &expected {
        let got = results.get(pair_id).unwrap_or_else(|| panic!("pair {} missing", pair_id));
        assert_eq!(got, expected_bytes, "pair {} received mismatched bytes", pair_id);
    }
}
