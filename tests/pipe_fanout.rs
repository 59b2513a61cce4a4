//! Scenario: 100 independent pipe pairs registered on one loop; a second
//! thread picks 10 at random and writes a `u64` to each. The corresponding
//! buffers must contain exactly those bytes, and no other buffer may see
//! any data at all.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;

use reactor::sys::{socket, Pipe};
use reactor::{Config, EventLoop};

const PAIR_COUNT: usize = 100;
const WRITTEN_COUNT: usize = 10;

#[test]
fn hundred_pipe_pairs_only_chosen_ten_receive_data() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut event_loop = EventLoop::new(Config::new()).unwrap();
    let mut pipes = Vec::with_capacity(PAIR_COUNT);
    let received: Vec<Arc<Mutex<Vec<u8>>>> = (0..PAIR_COUNT).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();

    for slot in &received {
        let pipe = Pipe::new().unwrap();
        let read_fd = pipe.read_fd();
        let slot = slot.clone();
        event_loop
            .register_io(
                read_fd,
                reactor::Interest::READABLE,
                Some(Box::new(move |_: &mut EventLoop| {
                    let mut buf = [0u8; 64];
                    loop {
                        let mut slices = [std::io::IoSliceMut::new(&mut buf)];
                        match socket::readv(read_fd, &mut slices) {
                            Ok(0) => break,
                            Ok(n) => slot.lock().unwrap().extend_from_slice(&buf[..n]),
                            Err(_) => break,
                        }
                    }
                })),
                None,
            )
            .unwrap();
        pipes.push(pipe);
    }

    let mut rng = rand::rng();
    let mut indices: Vec<usize> = (0..PAIR_COUNT).collect();
    indices.shuffle(&mut rng);
    let chosen = &indices[..WRITTEN_COUNT];

    let mut expected: HashMap<usize, u64> = HashMap::new();
    for (n, &idx) in chosen.iter().enumerate() {
        expected.insert(idx, n as u64 + 1);
    }

    let write_fds: Vec<socket::RawSocket> = pipes.iter().map(|p| p.write_fd()).collect();
    let expected_for_thread = expected.clone();
    let handle = std::thread::spawn(move || {
        for (&idx, &value) in &expected_for_thread {
            let _ = socket::write(write_fds[idx], &value.to_le_bytes());
        }
    });
    handle.join().unwrap();

    // All 10 writes already sit in their kernel buffers by the time the
    // writer thread has joined, so one poll delivers every one of them.
    event_loop.run_once().unwrap();

    for (idx, slot) in received.iter().enumerate() {
        let got = slot.lock().unwrap();
        match expected.get(&idx) {
            Some(&value) => assert_eq!(&got[..], &value.to_le_bytes(), "pair {} mismatched", idx),
            None => assert!(got.is_empty(), "pair {} received unexpected data", idx),
        }
    }
}
