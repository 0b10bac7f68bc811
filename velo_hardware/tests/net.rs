use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rstest::rstest;
use velo_hardware::error::HwError;
use velo_hardware::{TcpAcceptor, TcpConnector, TcpLink};
use velo_traits::{Connector, LinkStatus, Received, Transport};

fn connected_pair() -> (TcpLink, TcpLink) {
    let mut acceptor = TcpAcceptor::bind("127.0.0.1:0", Duration::from_millis(2)).unwrap();
    let addr = acceptor.local_addr().unwrap();
    let client = thread::spawn(move || {
        TcpConnector::new(addr.to_string())
            .establish(Duration::from_secs(2))
            .unwrap()
    });
    let server = acceptor.establish(Duration::from_secs(2)).unwrap();
    (client.join().unwrap(), server)
}

#[test]
fn bytes_cross_the_loopback() {
    let (client, server) = connected_pair();
    assert_eq!(client.send(&[1, 2, 3, 4], Duration::from_millis(100)).unwrap(), 4);

    let mut buf = [0u8; 4];
    let mut got = 0;
    while got < 4 {
        match server.receive(&mut buf[got..], Duration::from_millis(500)).unwrap() {
            Received::Data(n) => got += n,
            Received::WouldBlock => panic!("no data"),
        }
    }
    assert_eq!(buf, [1, 2, 3, 4]);
    assert_eq!(server.status(), LinkStatus::Established);
}

#[test]
fn zero_timeout_receive_polls() {
    let (client, _server) = connected_pair();
    let mut buf = [0u8; 8];
    assert_eq!(client.receive(&mut buf, Duration::ZERO).unwrap(), Received::WouldBlock);
}

#[test]
fn accept_gives_up_at_deadline() {
    let mut acceptor = TcpAcceptor::bind("127.0.0.1:0", Duration::from_millis(5)).unwrap();
    let t0 = Instant::now();
    let err = acceptor.establish(Duration::from_millis(30)).unwrap_err();
    assert!(t0.elapsed() >= Duration::from_millis(30));
    assert!(matches!(
        err.downcast_ref::<HwError>(),
        Some(HwError::AcceptTimeout(_))
    ));
}

#[test]
fn close_aborts_blocked_receive() {
    let (client, _server) = connected_pair();
    let client = Arc::new(client);
    let reader = Arc::clone(&client);
    let t0 = Instant::now();
    let h = thread::spawn(move || {
        let mut buf = [0u8; 8];
        reader.receive(&mut buf, Duration::from_secs(10))
    });
    thread::sleep(Duration::from_millis(50));
    client.close();
    let res = h.join().unwrap();
    assert!(res.is_err());
    assert!(t0.elapsed() < Duration::from_secs(5));
    assert_eq!(client.status(), LinkStatus::Closed);
}

#[test]
fn peer_hangup_is_an_error() {
    let (client, server) = connected_pair();
    server.close();
    drop(server);
    let mut buf = [0u8; 8];
    let err = client.receive(&mut buf, Duration::from_millis(500)).unwrap_err();
    assert!(matches!(err.downcast_ref::<HwError>(), Some(HwError::Closed | HwError::Io(_))));
}

#[rstest]
#[case::free_text("not an address")]
#[case::bad_port("localhost:notaport")]
#[case::missing_port("127.0.0.1")]
#[case::empty("")]
fn unresolvable_peer_is_address_error(#[case] peer: &str) {
    let err = TcpConnector::new(peer)
        .establish(Duration::from_millis(50))
        .unwrap_err();
    assert!(
        matches!(err.downcast_ref::<HwError>(), Some(HwError::Address(_))),
        "{peer:?}: {err}"
    );
}

#[rstest]
#[case::free_text("not an address")]
#[case::port_out_of_range("127.0.0.1:70000")]
#[case::missing_port("127.0.0.1")]
fn bad_listen_address_is_address_error(#[case] listen: &str) {
    let err = TcpAcceptor::bind(listen, Duration::from_millis(5)).err().unwrap();
    assert!(matches!(err, HwError::Address(_)), "{listen:?}: {err}");
}

#[rstest]
#[case::one_byte(&[0x7f])]
#[case::sample_sized(&[1, 2, 3, 4, 5, 6, 7, 8])]
#[case::command_sized(&[0xff, 0, 0x80, 0x3f])]
fn payloads_arrive_intact(#[case] payload: &[u8]) {
    let (client, server) = connected_pair();
    assert_eq!(client.send(payload, Duration::from_millis(100)).unwrap(), payload.len());
    let mut buf = vec![0u8; payload.len()];
    let mut got = 0;
    while got < payload.len() {
        match server.receive(&mut buf[got..], Duration::from_millis(500)).unwrap() {
            Received::Data(n) => got += n,
            Received::WouldBlock => panic!("no data"),
        }
    }
    assert_eq!(buf, payload);
}
