//! A device talking to a TCP peer on the loopback interface

mod common;

use codelink_core::config::DeviceConfig;
use codelink_core::device::Device;
use codelink_core::transport::TcpConnector;
use common::{codeword, init_tracing, Inbox, PATIENCE};
use pretty_assertions::assert_eq;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

#[test]
fn test_ping_pong_over_tcp() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = vec![0u8; codeword("PING").len()];
        stream.read_exact(&mut request).unwrap();
        stream.write_all(&codeword("PONG")).unwrap();
        request
    });

    let config = DeviceConfig::for_port(address, 115200);
    let device = Device::with_connector(config, Arc::new(TcpConnector));
    let inbox = Inbox::new();
    let sink = inbox.clone();
    device.set_response_handler(move |message| sink.push(message));
    device.connect().unwrap();

    device.command("PING").unwrap();
    assert_eq!(peer.join().unwrap(), codeword("PING"));
    assert_eq!(inbox.wait_for(1, PATIENCE), vec!["PONG".to_string()]);

    device.disconnect();
    assert!(!device.is_ready());
}
