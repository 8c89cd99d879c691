mod common;

use amnb::core::Type;
use amnb::interface::{Interface, ReceiveError, TransmitError};
use amnb::message::Message;
use common::{Bus, BusDevice};
use futures_executor::block_on;

const MAX_HEAP: usize = 1024;

type TestInterface = Interface<BusDevice, MAX_HEAP>;

const A: usize = 0;
const B: usize = 1;

fn pair(bus: &Bus) -> (TestInterface, TestInterface) {
    (
        Interface::new(bus.endpoint()),
        Interface::new(bus.endpoint()),
    )
}

fn valid(mut msg: Message) -> Message {
    msg.set_valid();
    msg
}

fn large_payload() -> Vec<u8> {
    // Four-byte words starting at 0x0302017d, crossing both marker bytes.
    (0..8u32)
        .flat_map(|i| (0x0302_017d + i).to_le_bytes())
        .collect()
}

async fn receive(interface: &mut TestInterface, allocate: bool) -> Result<Message, ReceiveError> {
    let mut msg = Message::default();
    interface.receive_header(&mut msg).await?;
    interface.receive_data(&mut msg, allocate).await?;
    Ok(msg)
}

#[test]
fn test_wire_bytes_small_empty() {
    let bus = Bus::new();
    let (mut tx, _rx) = pair(&bus);

    let msg = valid(Message::new(7, 0x7d, Type::Broadcast));
    block_on(tx.transmit(&msg)).unwrap();

    // Command 0x7d goes on the wire escaped.
    assert_eq!(bus.pending(B), [0x7e, 0x7e, 69, 7, 0x7d, 0x5d, 0]);
}

#[test]
fn test_wire_bytes_small_payload() {
    let bus = Bus::new();
    let (mut tx, _rx) = pair(&bus);

    let payload = [0u8, 1, 2, 3, 0x7d, 0x7e, 6, 7];
    let msg = valid(Message::with_payload(200, 0x7e, Type::Request, &payload).unwrap());
    block_on(tx.transmit(&msg)).unwrap();

    assert_eq!(
        bus.pending(B),
        [
            0x7e, 0x7e, 246, 200, 0x7d, 0x5e, 0x48, 0, 1, 2, 3, 0x7d, 0x5d, 0x7d, 0x5e, 6, 7
        ]
    );
}

#[test]
fn test_wire_bytes_large() {
    let bus = Bus::new();
    let (mut tx, _rx) = pair(&bus);

    let msg = valid(Message::with_payload(10, 14, Type::Error, &large_payload()).unwrap());
    block_on(tx.transmit(&msg)).unwrap();

    assert_eq!(
        bus.pending(B),
        [
            0x7e, 0x7e, 185, 10, 14, 0x9f, 32, 0, 205, 202, 0x7d, 0x5d, 1, 2, 3, 0x7d, 0x5e, 1,
            2, 3, 0x7f, 1, 2, 3, 0x80, 1, 2, 3, 0x81, 1, 2, 3, 0x82, 1, 2, 3, 0x83, 1, 2, 3,
            0x84, 1, 2, 3
        ]
    );
}

#[test]
fn test_round_trip_small() {
    let bus = Bus::new();
    let (mut tx, mut rx) = pair(&bus);

    let msg = valid(Message::with_payload(5, 15, Type::Request, &[0x7e, 1, 2, 3]).unwrap());
    block_on(tx.transmit(&msg)).unwrap();

    let received = block_on(receive(&mut rx, true)).unwrap();
    assert_eq!(received, msg);
    assert!(received.is_header_valid());
    assert!(received.is_data_valid());
    assert!(!rx.is_medium_busy());
}

#[test]
fn test_round_trip_large() {
    let bus = Bus::new();
    let (mut tx, mut rx) = pair(&bus);

    let msg = valid(Message::with_payload(10, 14, Type::Error, &large_payload()).unwrap());
    block_on(tx.transmit(&msg)).unwrap();

    let received = block_on(receive(&mut rx, true)).unwrap();
    assert_eq!(received, msg);
    assert!(received.is_large());
    assert!(received.is_data_valid());
    assert!(!rx.is_medium_busy());
}

#[test]
fn test_round_trip_consecutive_markers() {
    let bus = Bus::new();
    let (mut tx, mut rx) = pair(&bus);

    let payload = [0x7e, 0x7e, 0x7d, 0x7d, 0x7e, 0x7d, 0x7e];
    let msg = valid(Message::with_payload(3, 4, Type::Broadcast, &payload).unwrap());
    block_on(tx.transmit(&msg)).unwrap();

    let received = block_on(receive(&mut rx, true)).unwrap();
    assert_eq!(received.payload(), Some(&payload[..]));
}

#[test]
fn test_single_byte_corruption_is_rejected() {
    for fixture in [
        valid(Message::new(7, 0x7d, Type::Broadcast)),
        valid(Message::with_payload(5, 15, Type::Request, &[0x7e, 1, 2, 3]).unwrap()),
        valid(Message::with_payload(10, 14, Type::Error, &large_payload()).unwrap()),
    ] {
        let bus = Bus::new();
        let (mut tx, mut rx) = pair(&bus);

        block_on(tx.transmit(&fixture)).unwrap();
        let wire_length = bus.pending(B).len();
        bus.clear(B);

        for position in 0..wire_length {
            block_on(tx.transmit(&fixture)).unwrap();
            bus.corrupt(B, position);

            let result = block_on(receive(&mut rx, true));
            assert!(
                result.is_err(),
                "corrupt byte {position} slipped through as {result:?}"
            );
            bus.clear(B);
        }
    }
}

#[test]
fn test_medium_empty() {
    let bus = Bus::new();
    let (mut rx, _other) = pair(&bus);

    let mut msg = Message::default();
    let result = block_on(rx.receive_header(&mut msg));
    assert_eq!(result, Err(ReceiveError::MediumEmpty));
}

#[test]
fn test_sync_failure() {
    let bus = Bus::new();
    let (mut rx, _other) = pair(&bus);

    bus.inject(A, &[0x7e, 0x42, 0x01]);
    let mut msg = Message::default();
    let result = block_on(rx.receive_header(&mut msg));
    assert_eq!(result, Err(ReceiveError::SyncReadFailed));
}

#[test]
fn test_truncated_header() {
    let bus = Bus::new();
    let (mut rx, _other) = pair(&bus);

    bus.inject(A, &[0x7e, 0x7e, 185, 20]);
    let mut msg = Message::default();
    let result = block_on(rx.receive_header(&mut msg));
    assert_eq!(result, Err(ReceiveError::HeaderReadFailed));
}

#[test]
fn test_busy_while_bytes_pending() {
    let bus = Bus::new();
    let (mut tx, mut rx) = pair(&bus);

    let msg = valid(Message::new(1, 2, Type::Broadcast));
    block_on(tx.transmit(&msg)).unwrap();

    // rx has a full unread frame pending; it must not start a transmission.
    assert!(rx.is_medium_busy());
    let result = block_on(rx.transmit(&msg));
    assert_eq!(result, Err(TransmitError::MediumBusy));

    block_on(receive(&mut rx, true)).unwrap();
    assert!(!rx.is_medium_busy());
    block_on(rx.transmit(&msg)).unwrap();
}

#[test]
fn test_busy_while_large_frame_incomplete() {
    let bus = Bus::new();
    let (mut rx, _other) = pair(&bus);

    // Header only; the 36-byte payload is still outstanding.
    bus.inject(A, &[0x7e, 0x7e, 185, 20, 54, 0x5f, 36, 0, 143, 101]);
    let mut msg = Message::default();
    block_on(rx.receive_header(&mut msg)).unwrap();
    assert!(msg.is_large());
    assert_eq!(msg.length(), 36);

    assert!(rx.is_medium_busy());
    let probe = valid(Message::new(1, 2, Type::Broadcast));
    assert_eq!(block_on(rx.transmit(&probe)), Err(TransmitError::MediumBusy));

    let payload: Vec<u8> = (0..9u32)
        .flat_map(|i| (0x0403_0201 + i).to_le_bytes())
        .collect();
    bus.inject(A, &payload);
    block_on(rx.receive_data(&mut msg, true)).unwrap();
    assert_eq!(msg.payload().map(|p| p.len()), Some(36));

    assert!(!rx.is_medium_busy());
    block_on(rx.transmit(&probe)).unwrap();
}

#[test]
fn test_allocation_cap_keeps_sync() {
    let bus = Bus::new();
    let mut tx: Interface<BusDevice, MAX_HEAP> = Interface::new(bus.endpoint());
    // Cap below the 36-byte payload sent first.
    let mut rx: Interface<BusDevice, 35> = Interface::new(bus.endpoint());

    let payload = [0x55u8; 36];
    let big = valid(Message::with_payload(20, 54, Type::Request, &payload).unwrap());
    block_on(tx.transmit(&big)).unwrap();

    let mut msg = Message::default();
    block_on(rx.receive_header(&mut msg)).unwrap();
    let result = block_on(rx.receive_data(&mut msg, true));
    assert_eq!(result, Err(ReceiveError::AllocationFailed));
    assert_eq!(msg.payload(), None);

    // The oversized payload was drained; the next frame arrives intact.
    assert!(!rx.is_medium_busy());
    let small = valid(Message::with_payload(20, 55, Type::Request, &[9, 9]).unwrap());
    block_on(tx.transmit(&small)).unwrap();

    let mut next = Message::default();
    block_on(rx.receive_header(&mut next)).unwrap();
    block_on(rx.receive_data(&mut next, true)).unwrap();
    assert_eq!(next, small);
}

#[test]
fn test_skipped_allocation_drains_payload() {
    let bus = Bus::new();
    let (mut tx, mut rx) = pair(&bus);

    let msg = valid(Message::with_payload(20, 54, Type::Request, &[0xAA; 40]).unwrap());
    block_on(tx.transmit(&msg)).unwrap();

    let received = block_on(receive(&mut rx, false)).unwrap();
    assert_eq!(received.payload(), None);
    assert_eq!(received.length(), 40);
    assert!(!rx.is_medium_busy());
}
