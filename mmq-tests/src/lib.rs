//! Shared fixtures for the end-to-end tests: a simulated board served over TCP on a
//! background thread.
use std::{
    net::{SocketAddr, TcpListener},
    thread,
    time::Duration,
};

use mmq_server::{
    server::Builder,
    sim::{SimDevice, SimulatedBoard},
};

/// Starts a frame loop for `chains` and `sensors` on an ephemeral local port.
pub fn spawn_board(chains: Vec<Option<SimDevice>>, sensors: SimulatedBoard) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
    let addr = listener.local_addr().expect("local address");
    thread::spawn(move || {
        let mut server = Builder::new()
            .rw_timeout(Duration::from_secs(5))
            .status_poll_timeout(Duration::from_millis(50))
            .build(SimulatedBoard::new(chains), sensors);
        if let Err(e) = server.serve(listener) {
            panic!("test server failed: {}", e);
        }
    });
    addr
}

/// A board with a device on each of the first `count` chains and no sensors.
pub fn spawn_devices(count: usize) -> SocketAddr {
    spawn_board(
        vec![Some(SimDevice::default()); count],
        SimulatedBoard::new(vec![]),
    )
}

/// A bitstream of `len` bytes that carries the configuration sync word.
pub fn bitstream(len: usize) -> Vec<u8> {
    let mut image: Vec<u8> = (0..len).map(|i| i as u8).collect();
    image[16..20].copy_from_slice(&[0xAA, 0x99, 0x55, 0x66]);
    image
}
