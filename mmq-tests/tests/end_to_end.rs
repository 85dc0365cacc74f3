use std::{
    io::{Read, Write},
    net::TcpStream,
};

use mmq_client::{MmqClient, nonblocking::AsyncMmqClient};
use mmq_protocol::{Command, WORK_WORDS};
use mmq_server::sim::{DEFAULT_IDCODE, SimDevice, SimulatedBoard};
use mmq_tests::{bitstream, spawn_board, spawn_devices};

fn work() -> [u32; WORK_WORDS] {
    let mut work = [0u32; WORK_WORDS];
    for (i, word) in work.iter_mut().enumerate() {
        *word = 0x0101_0101u32.wrapping_mul(i as u32 + 1) ^ 0xDEAD_0000;
    }
    work
}

fn xor(work: &[u32]) -> u32 {
    work.iter().fold(0, |acc, word| acc ^ word)
}

#[test]
fn identifies_board_and_discovers_devices() {
    let addr = spawn_board(
        vec![
            Some(SimDevice::default()),
            None,
            Some(SimDevice::default().with_idcode(0x1234_5093)),
            Some(SimDevice::default().with_usercode(0xCAFE_F00D)),
        ],
        SimulatedBoard::new(vec![]),
    );
    let mut client = MmqClient::new(addr).unwrap();

    client.ping().unwrap();
    assert_eq!(client.version().unwrap(), "ModMiner Quad v0.4-ljr-alpha");
    assert_eq!(client.device_count().unwrap(), 3);
    assert_eq!(client.read_idcode(0).unwrap(), DEFAULT_IDCODE);
    // the empty chain is skipped, so logical device 1 is the third chain
    assert_eq!(client.read_idcode(1).unwrap(), 0x1234_5093);
    assert_eq!(client.read_usercode(2).unwrap(), 0xCAFE_F00D);
}

#[test]
fn uploads_bitstreams() {
    let addr = spawn_devices(2);
    let mut client = MmqClient::new(addr).unwrap();
    assert_eq!(client.device_count().unwrap(), 2);

    assert!(client.program_bitstream(1, &bitstream(100)).unwrap());
    assert!(client.program_bitstream(0, &bitstream(32)).unwrap());
    assert!(!client.program_bitstream(0, &[0u8; 64]).unwrap());

    // the connection is still in sync after the transfers
    client.ping().unwrap();
}

#[test]
fn clocks_and_mines() {
    let addr = spawn_devices(1);
    let mut client = MmqClient::new(addr).unwrap();
    client.device_count().unwrap();
    let work = work();

    assert!(client.set_clock(0, 200).unwrap());
    assert_eq!(client.read_clock(0).unwrap(), 200);
    client.submit_work(0, &work).unwrap();
    assert_eq!(client.read_result(0).unwrap(), xor(&work));

    assert!(!client.set_clock(0, 251).unwrap());
    assert_eq!(client.read_clock(0).unwrap(), 50);
    assert_eq!(client.read_result(0).unwrap(), xor(&work) & 0xFFFF_FF00);
}

#[test]
fn raw_registers_and_user1() {
    let addr = spawn_devices(1);
    let mut client = MmqClient::new(addr).unwrap();
    client.device_count().unwrap();

    client.write_register(0, 0x7, 0x89AB_CDEF).unwrap();
    assert_eq!(client.read_register(0, 0x7).unwrap(), 0x89AB_CDEF);

    assert_eq!(&*client.shift_user1(0, 16, &[0x12, 0x34]).unwrap(), [0, 0]);
    assert_eq!(
        &*client.shift_user1(0, 16, &[0x56, 0x78]).unwrap(),
        [0x12, 0x34]
    );
}

#[test]
fn reads_temperatures() {
    let addr = spawn_board(
        vec![Some(SimDevice::default()); 2],
        SimulatedBoard::new(vec![])
            .with_temperature(0, 0x1900)
            .with_temperature(1, 0x1980),
    );
    let mut client = MmqClient::new(addr).unwrap();

    // before discovery every slot below four maps to the first sensor
    assert_eq!(client.read_temperature_high_res(1).unwrap(), 0x1900);
    assert_eq!(client.device_count().unwrap(), 2);
    assert_eq!(client.read_temperature(0).unwrap(), 0x32);
    assert_eq!(client.read_temperature(1).unwrap(), 0x33);
    assert_eq!(client.read_temperature_high_res(1).unwrap(), 0x1980);
    // slot four is never assigned
    assert_eq!(client.read_temperature_high_res(4).unwrap(), 0);
}

#[test]
fn recovers_from_rejected_frames() {
    let addr = spawn_devices(1);
    let mut tcp = TcpStream::connect(addr).unwrap();

    // unknown opcode, then a scan-chain command before discovery
    tcp.write_all(&[0x0F]).unwrap();
    Command::ReadIdCode { device: 0 }.write_to(&mut tcp).unwrap();
    Command::Ping.write_to(&mut tcp).unwrap();

    let mut response = [0xFFu8; 1];
    tcp.read_exact(&mut response).unwrap();
    assert_eq!(response, [0]);
}

#[tokio::test]
async fn async_client_drives_a_board() {
    let addr = spawn_board(
        vec![Some(SimDevice::default()); 4],
        SimulatedBoard::new(vec![]).with_temperature(3, 0x1a40),
    );
    let mut client = AsyncMmqClient::connect(addr).await.unwrap();
    let work = work();

    client.ping().await.unwrap();
    assert_eq!(client.version().await.unwrap(), "ModMiner Quad v0.4-ljr-alpha");
    assert_eq!(client.device_count().await.unwrap(), 4);
    assert!(client.program_bitstream(3, &bitstream(96)).await.unwrap());
    assert!(client.set_clock(3, 190).await.unwrap());
    client.submit_work(3, &work).await.unwrap();
    assert_eq!(client.read_result(3).await.unwrap(), xor(&work));
    client.write_register(2, 0x5, 42).await.unwrap();
    assert_eq!(client.read_register(2, 0x5).await.unwrap(), 42);
    assert_eq!(client.read_temperature_high_res(3).await.unwrap(), 0x1a40);
}
