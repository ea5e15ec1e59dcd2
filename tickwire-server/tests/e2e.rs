//! End-to-end tests: a real client on a background thread talking to a server
//! ticked on the test thread.

use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};
use tickwire_client::{Client, ClientConfig, ClientError};
use tickwire_protocol::{Decoder, ErrorCode, Frame};
use tickwire_server::{
    arg_as, ExtraPeerPolicy, InvocationError, Registry, Server, ServerConfig, ServerState,
};

fn test_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register("Add", |args: &[Value]| {
        let a: i64 = arg_as(args, 0)?;
        let b: i64 = arg_as(args, 1)?;
        Ok(json!(a + b))
    });
    registry.register("Echo", |args: &[Value]| Ok(Value::Array(args.to_vec())));
    registry.register("Blob", |args: &[Value]| {
        let len: usize = arg_as(args, 0)?;
        Ok(Value::String("x".repeat(len)))
    });
    registry.register("Fail", |_: &[Value]| Err(InvocationError::new("deliberate failure")));
    registry.register("Boom", |_: &[Value]| -> Result<Value, InvocationError> {
        panic!("function blew up")
    });
    registry
}

fn start_with(config: ServerConfig) -> Server<Registry> {
    Server::bind(config, test_registry()).unwrap()
}

fn start() -> Server<Registry> {
    start_with(ServerConfig::new("127.0.0.1:0".parse().unwrap()))
}

fn client_for(server: &Server<Registry>) -> Client {
    Client::new(ClientConfig::from_addr(server.local_addr()))
}

/// Runs `f` on a background thread while ticking the server, returning what
/// `f` returned. Panics in `f` fail the test.
fn drive<T, F>(server: &mut Server<Registry>, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let handle = thread::spawn(f);
    let deadline = Instant::now() + Duration::from_secs(10);
    while !handle.is_finished() {
        assert!(Instant::now() < deadline, "client thread did not finish");
        server.tick();
        thread::sleep(Duration::from_millis(1));
    }
    handle.join().unwrap()
}

/// Ticks until `done` holds or a deadline passes.
fn tick_until(server: &mut Server<Registry>, done: impl Fn(&Server<Registry>) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(server) {
        assert!(Instant::now() < deadline, "condition not reached");
        server.tick();
        thread::sleep(Duration::from_millis(1));
    }
}

fn send_raw(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(&Frame::encode(payload).unwrap()).unwrap();
}

fn read_raw(stream: &mut TcpStream, decoder: &mut Decoder) -> Value {
    let mut buf = [0u8; 4096];
    loop {
        if let Some(frame) = decoder.decode_frame().unwrap() {
            return serde_json::from_slice(&frame).unwrap();
        }
        let n = stream.read(&mut buf).unwrap();
        assert!(n > 0, "server closed the connection");
        decoder.extend(&buf[..n]);
    }
}

fn raw_stream(server: &Server<Registry>) -> TcpStream {
    let stream = TcpStream::connect(server.local_addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

#[test]
fn test_add_wire_format() {
    let mut server = start();
    let mut stream = raw_stream(&server);

    let response = drive(&mut server, move || {
        send_raw(
            &mut stream,
            br#"{"id":1,"type":"call","name":"Add","args":[2,3]}"#,
        );
        read_raw(&mut stream, &mut Decoder::new())
    });

    assert_eq!(response, json!({"id": 1, "type": "result", "value": 5}));
}

#[test]
fn test_correlation_across_calls() {
    let mut server = start();
    let mut client = client_for(&server);

    let values = drive(&mut server, move || {
        let mut values = Vec::new();
        for i in 0..5 {
            values.push(client.call("Add", vec![json!(i), json!(10)]).unwrap());
        }
        assert_eq!(client.next_id(), 6);
        values
    });

    assert_eq!(values, (10..15).map(|v| json!(v)).collect::<Vec<_>>());
    assert_eq!(server.stats().requests_handled, 5);
}

#[test]
fn test_unknown_function_then_recover() {
    let mut server = start();
    let mut client = client_for(&server);

    let (err, next) = drive(&mut server, move || {
        let err = client.call("Nope", vec![]).unwrap_err();
        let next = client.call("Echo", vec![json!("still here")]).unwrap();
        (err, next)
    });

    assert_eq!(err.remote_code(), Some(ErrorCode::NotFound));
    assert_eq!(next, json!(["still here"]));
    assert_eq!(server.stats().errors_returned, 1);
}

#[test]
fn test_invocation_failure_and_panic() {
    let mut server = start();
    let mut client = client_for(&server);

    let (failed, panicked, after) = drive(&mut server, move || {
        let failed = client.call("Fail", vec![]).unwrap_err();
        let panicked = client.call("Boom", vec![]).unwrap_err();
        let after = client.call("Add", vec![json!(1), json!(1)]).unwrap();
        (failed, panicked, after)
    });

    assert_eq!(failed.remote_code(), Some(ErrorCode::InvocationFailure));
    assert!(failed.to_string().contains("deliberate failure"));
    assert_eq!(panicked.remote_code(), Some(ErrorCode::InvocationFailure));
    assert!(panicked.to_string().contains("function blew up"));
    assert_eq!(after, json!(2));
}

#[test]
fn test_malformed_json_keeps_connection() {
    let mut server = start();
    let mut stream = raw_stream(&server);

    let (bad, good) = drive(&mut server, move || {
        let mut decoder = Decoder::new();
        send_raw(&mut stream, b"{this is not json");
        let bad = read_raw(&mut stream, &mut decoder);
        send_raw(
            &mut stream,
            br#"{"id":2,"type":"call","name":"Echo","args":[]}"#,
        );
        let good = read_raw(&mut stream, &mut decoder);
        (bad, good)
    });

    assert_eq!(bad["id"], Value::Null);
    assert_eq!(bad["type"], "error");
    assert!(bad["traceback"]
        .as_str()
        .unwrap()
        .starts_with("FRAMING_ERROR: "));
    assert_eq!(good, json!({"id": 2, "type": "result", "value": []}));
    assert_eq!(server.stats().resets, 0);
}

#[test]
fn test_non_list_args_rejected() {
    let mut server = start();
    let mut stream = raw_stream(&server);

    let response = drive(&mut server, move || {
        send_raw(
            &mut stream,
            br#"{"id":4,"type":"call","name":"Add","args":"2,3"}"#,
        );
        read_raw(&mut stream, &mut Decoder::new())
    });

    assert_eq!(response["id"], 4);
    let traceback = response["traceback"].as_str().unwrap();
    assert_eq!(
        ErrorCode::from_traceback(traceback),
        Some(ErrorCode::InvalidArgs)
    );
}

#[test]
fn test_large_response_flushed_across_ticks() {
    const LEN: usize = 32 * 1024 * 1024;
    let mut server = start();
    let mut stream = raw_stream(&server);

    let handle = thread::spawn(move || {
        send_raw(
            &mut stream,
            format!(r#"{{"id":1,"type":"call","name":"Blob","args":[{}]}}"#, LEN).as_bytes(),
        );
        // Let the server fill the socket before anything is read.
        thread::sleep(Duration::from_millis(200));
        read_raw(&mut stream, &mut Decoder::new())
    });

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut flushing_ticks = 0;
    let mut max_pending = 0;
    while !handle.is_finished() {
        assert!(Instant::now() < deadline, "client thread did not finish");
        let before = server.pending_output();
        server.tick();
        let after = server.pending_output();
        if after < before {
            flushing_ticks += 1;
        }
        max_pending = max_pending.max(after);
        thread::sleep(Duration::from_millis(1));
    }
    let response = handle.join().unwrap();

    assert_eq!(response["id"], 1);
    let value = response["value"].as_str().unwrap();
    assert_eq!(value.len(), LEN);
    assert!(value.bytes().all(|b| b == b'x'));
    // The tick that answered left a suffix, and later ticks wrote it out.
    assert!(max_pending > 0);
    assert!(flushing_ticks > 1);
    assert_eq!(server.pending_output(), 0);
}

#[test]
fn test_hold_batch_in_single_tick() {
    let mut server = start();
    let mut client = client_for(&server);

    let handle = thread::spawn(move || {
        client
            .with_hold(|c| {
                for i in 0..3 {
                    c.call("Add", vec![json!(i), json!(i)])?;
                }
                Ok(())
            })
            .unwrap();
    });

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut largest_tick = 0;
    while !handle.is_finished() {
        assert!(Instant::now() < deadline, "client thread did not finish");
        let before = server.stats().requests_handled;
        server.tick();
        largest_tick = largest_tick.max(server.stats().requests_handled - before);
        thread::sleep(Duration::from_millis(1));
    }
    handle.join().unwrap();

    // HOLD, three calls and RELEASE.
    assert_eq!(largest_tick, 5);
    assert_eq!(server.stats().holds_entered, 1);
    assert_ne!(server.state(), ServerState::Holding);
}

#[test]
fn test_hold_released_when_body_fails() {
    let mut server = start();
    let mut client = client_for(&server);

    let (result, after) = drive(&mut server, move || {
        let result: Result<(), ClientError> = client.with_hold(|c| {
            c.call("Nope", vec![])?;
            Ok(())
        });
        assert!(!client.is_holding());
        let after = client.call("Echo", vec![json!(1)]).unwrap();
        (result, after)
    });

    assert_eq!(
        result.unwrap_err().remote_code(),
        Some(ErrorCode::NotFound)
    );
    assert_eq!(after, json!([1]));
    assert!(!server.is_holding());
    // HOLD, Nope, RELEASE, Echo.
    assert_eq!(server.stats().requests_handled, 4);
}

#[test]
fn test_hold_guard_released_on_drop() {
    let mut server = start();
    let mut client = client_for(&server);

    drive(&mut server, move || {
        {
            let mut guard = client.hold().unwrap();
            assert_eq!(guard.call("Add", vec![json!(2), json!(3)]).unwrap(), json!(5));
        }
        assert!(!client.is_holding());
    });

    assert!(!server.is_holding());
    assert_eq!(server.stats().requests_handled, 3);
}

#[test]
fn test_nested_hold_sends_nothing() {
    let mut server = start();
    let mut client = client_for(&server);

    let nested = drive(&mut server, move || {
        let mut guard = client.hold().unwrap();
        let nested = guard.hold().err();
        guard.release().unwrap();
        nested
    });

    assert!(matches!(nested, Some(ClientError::InvalidState(_))));
    assert_eq!(server.stats().holds_entered, 1);
    // Only HOLD and RELEASE reached the server.
    assert_eq!(server.stats().requests_handled, 2);
}

#[test]
fn test_peer_closes_mid_message() {
    let mut server = start();
    let mut stream = raw_stream(&server);

    drive(&mut server, move || {
        // Declares 100 bytes, sends 10, then disappears.
        stream.write_all(&100u32.to_le_bytes()).unwrap();
        stream.write_all(&[b'x'; 10]).unwrap();
        thread::sleep(Duration::from_millis(50));
    });
    tick_until(&mut server, |s| s.stats().resets == 1);
    assert!(!server.is_connected());

    let mut client = client_for(&server);
    let value = drive(&mut server, move || {
        client.call("Add", vec![json!(20), json!(22)]).unwrap()
    });
    assert_eq!(value, json!(42));
    assert_eq!(server.stats().connections_accepted, 2);
}

#[test]
fn test_oversized_frame_resets() {
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_max_frame_size(1024);
    let mut server = start_with(config);
    let mut stream = raw_stream(&server);

    let received = drive(&mut server, move || {
        stream.write_all(&1_000_000u32.to_le_bytes()).unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return received,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
    });

    assert!(!server.is_connected());
    assert_eq!(server.stats().resets, 1);

    // Whatever made it out before the reset is the framing error.
    let mut decoder = Decoder::new();
    decoder.extend(&received);
    if let Some(response) = decoder.decode_response().unwrap() {
        assert_eq!(response.id, None);
        let traceback = response.into_result().unwrap_err();
        assert!(traceback.starts_with("FRAMING_ERROR: "));
    }
}

#[test]
fn test_refuse_extra_peer() {
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap())
        .with_extra_peers(ExtraPeerPolicy::Refuse);
    let mut server = start_with(config);
    let addr = server.local_addr();
    let mut first = client_for(&server);

    let (refused_read, still_works) = drive(&mut server, move || {
        first.call("Echo", vec![]).unwrap();

        let mut second = TcpStream::connect(addr).unwrap();
        second
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf = [0u8; 16];
        let refused_read = match second.read(&mut buf) {
            Ok(n) => n,
            Err(_) => 0,
        };

        let still_works = first.call("Add", vec![json!(1), json!(2)]).unwrap();
        (refused_read, still_works)
    });

    assert_eq!(refused_read, 0);
    assert_eq!(still_works, json!(3));
    assert_eq!(server.stats().peers_refused, 1);
    assert_eq!(server.stats().connections_accepted, 1);
}

#[test]
fn test_queued_peer_served_after_first_leaves() {
    let mut server = start();
    let mut first = client_for(&server);
    let mut second = client_for(&server);

    let value = drive(&mut server, move || {
        first.call("Echo", vec![]).unwrap();
        second.connect().unwrap();
        first.close();
        second.call("Add", vec![json!(5), json!(5)]).unwrap()
    });

    assert_eq!(value, json!(10));
    assert_eq!(server.stats().connections_accepted, 2);
    assert_eq!(server.stats().peers_refused, 0);
}

#[test]
fn test_shutdown_ends_hold() {
    let mut server = start();
    let shutdown = server.shutdown_handle();
    let mut client = client_for(&server);

    let lost = drive(&mut server, move || {
        let mut guard = client.hold().unwrap();
        shutdown.shutdown();
        thread::sleep(Duration::from_millis(300));
        let lost = guard.call("Echo", vec![]).unwrap_err();
        drop(guard);
        assert!(!client.is_connected());
        lost
    });

    assert!(lost.is_connection_error());
    assert_eq!(server.state(), ServerState::Listening);
    assert_eq!(server.stats().resets, 1);
}

#[test]
fn test_connect_and_close_idempotent() {
    let mut server = start();
    let mut client = client_for(&server);

    drive(&mut server, move || {
        client.connect().unwrap();
        client.connect().unwrap();
        assert_eq!(client.call("Echo", vec![json!(true)]).unwrap(), json!([true]));
        client.close();
        client.close();
        assert!(!client.is_connected());

        // Reconnects on demand and keeps counting ids.
        assert_eq!(client.call("Echo", vec![]).unwrap(), json!([]));
        assert_eq!(client.next_id(), 3);
    });

    assert_eq!(server.stats().connections_accepted, 2);
}
