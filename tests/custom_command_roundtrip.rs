//! End-to-end: a custom opcode registered on a server `LocalNode` is
//! reachable from a real TCP client connection, and nothing is left
//! queued afterward.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use collage_core::{ConnectionDescription, LocalNode, NodeSettings, Runtime};

const HELLO_OPCODE: u32 = 200;

fn wait_for<F: Fn() -> bool>(f: F, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    f()
}

#[test]
fn custom_opcode_round_trips_over_tcp() {
    let server = LocalNode::new(Runtime::new(), NodeSettings::default());
    server.listen(&[ConnectionDescription::tcp("127.0.0.1", 0)]).unwrap();
    let addr = server.local_addr().unwrap();

    let received = Arc::new(AtomicBool::new(false));
    let seen_text: Arc<parking_lot::Mutex<String>> = Arc::new(parking_lot::Mutex::new(String::new()));
    let received2 = received.clone();
    let seen_text2 = seen_text.clone();
    server.register_custom_handler(
        HELLO_OPCODE,
        false,
        Arc::new(move |cmd| {
            let mut is = cmd.istream();
            match is.read_string() {
                Ok(text) => {
                    *seen_text2.lock() = text;
                    received2.store(true, Ordering::SeqCst);
                    true
                }
                Err(_) => false,
            }
        }),
    );

    let client = LocalNode::new(Runtime::new(), NodeSettings::default());
    client.listen(&[ConnectionDescription::tcp("127.0.0.1", 0)]).unwrap();
    let server_id = client.connect(&ConnectionDescription::tcp("127.0.0.1", addr.port())).unwrap();

    let mut builder = client.send_custom(server_id, HELLO_OPCODE).unwrap();
    builder.write_str("hello");
    builder.send().unwrap();

    assert!(wait_for(|| received.load(Ordering::SeqCst), Duration::from_secs(2)));
    assert_eq!(*seen_text.lock(), "hello");

    client.close();
    server.close();
}
