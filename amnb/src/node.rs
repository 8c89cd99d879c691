use core::cell::Cell;
use core::mem;

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Timer, with_timeout};
use serde::Serialize;
use serde::de::DeserializeOwned;

use amnb_driver::device::Device;

use crate::core::{Error, Type};
use crate::handler::{Action, Listener, RequestError, decode_reply};
use crate::interface::{Interface, TransmitError};
use crate::message::Message;
use crate::time::Duration;

const MIN_TX_TRIES: u8 = 20;
const PRIORITY_BITS: u8 = 6;
const RESCHEDULE_MASK_SHORT: u8 = 7;
const RESCHEDULE_MASK_LONG: u8 = 11;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// One AMNB bus participant.
///
/// Holds the shared state behind the [`Caller`] and [`Runner`] handles obtained
/// from [`split`](Self::split). The mutex type `M` must match how the handles are
/// distributed across executors; `TX_QUEUE` bounds the transmit queue.
///
/// ```ignore
/// let node = Node::<CriticalSectionRawMutex>::new(42);
/// let node = Box::leak(Box::new(node));
/// let (caller, runner) = node.split(Interface::<_, 1024>::new(device), actions, &[]);
/// spawner.spawn(run(runner)).unwrap();
/// caller.broadcast(BUTTON_PRESSED);
/// ```
pub struct Node<M: RawMutex, const TX_QUEUE: usize = 2> {
    state: NodeState<M, TX_QUEUE>,
}

impl<M: RawMutex, const TX_QUEUE: usize> Node<M, TX_QUEUE> {
    const QUEUE_BOUND: () = assert!(TX_QUEUE >= 2, "transmit queue must hold at least two messages");

    pub fn new(address: u8) -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::QUEUE_BOUND;
        Self {
            state: NodeState {
                address,
                lfsr_seed: u16::from(address) << 8 | u16::from(address.wrapping_add(1)),
                tx_queue: Channel::new(),
                pending: Mutex::new(Cell::new(None)),
                response: Signal::new(),
            },
        }
    }

    pub fn address(&self) -> u8 {
        self.state.address
    }

    pub fn set_address(&mut self, address: u8) {
        self.state.address = address;
        self.state.lfsr_seed = u16::from(address) << 8 | u16::from(address.wrapping_add(1));
    }

    /// Overrides the backoff jitter seed derived from the address.
    pub fn set_seed(&mut self, seed: u16) {
        self.state.lfsr_seed = seed;
    }

    /// Splits the node into an application handle and the bus worker.
    ///
    /// `actions` answer requests addressed to this node; `listeners` observe
    /// broadcasts. The returned [`Runner`] owns the interface and must be polled
    /// as a task for the node to function.
    pub fn split<'a, D: Device, const MAX_HEAP: usize>(
        &'a mut self,
        interface: Interface<D, MAX_HEAP>,
        actions: &'a mut [Action],
        listeners: &'a [Listener],
    ) -> (
        Caller<'a, M, TX_QUEUE>,
        Runner<'a, M, D, TX_QUEUE, MAX_HEAP>,
    ) {
        let caller = Caller { node: &self.state };
        let runner = Runner {
            node: &self.state,
            interface,
            actions,
            listeners,
            rx_msg: Message::default(),
            lfsr: self.state.lfsr_seed,
            tx_counter: 0,
        };
        (caller, runner)
    }
}

struct NodeState<M: RawMutex, const TX_QUEUE: usize> {
    address: u8,
    lfsr_seed: u16,
    tx_queue: Channel<M, Message, TX_QUEUE>,
    pending: Mutex<M, Cell<Option<PendingRequest>>>,
    response: Signal<M, Message>,
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    address: u8,
    command: u8,
}

/// Application handle: enqueues broadcasts and issues correlated requests.
pub struct Caller<'a, M: RawMutex, const TX_QUEUE: usize> {
    node: &'a NodeState<M, TX_QUEUE>,
}

impl<M: RawMutex, const TX_QUEUE: usize> Caller<'_, M, TX_QUEUE> {
    /// Enqueues an empty broadcast. Returns false when the queue is full.
    pub fn broadcast(&self, command: u8) -> bool {
        let msg = Message::new(self.node.address, command, Type::Broadcast);
        self.node.tx_queue.try_send(msg).is_ok()
    }

    /// Enqueues a broadcast carrying raw payload bytes. Returns false when the
    /// queue is full or payload allocation fails.
    pub fn broadcast_payload(&self, command: u8, payload: &[u8]) -> bool {
        let Some(msg) =
            Message::with_payload(self.node.address, command, Type::Broadcast, payload)
        else {
            return false;
        };
        self.node.tx_queue.try_send(msg).is_ok()
    }

    /// Enqueues a broadcast carrying an encoded value.
    pub fn broadcast_value<T: Serialize>(&self, command: u8, value: &T) -> bool {
        let Some(msg) = Message::with_value(self.node.address, command, Type::Broadcast, value)
        else {
            return false;
        };
        self.node.tx_queue.try_send(msg).is_ok()
    }

    /// Sends an argument-less request to node `from` and awaits its reply for up
    /// to one second.
    pub async fn request<T, E>(&mut self, from: u8, command: u8) -> Result<T, RequestError<E>>
    where
        T: DeserializeOwned,
        E: DeserializeOwned,
    {
        self.request_msg(Message::new(from, command, Type::Request))
            .await
    }

    /// Sends a request carrying raw payload bytes.
    pub async fn request_payload<T, E>(
        &mut self,
        from: u8,
        command: u8,
        payload: &[u8],
    ) -> Result<T, RequestError<E>>
    where
        T: DeserializeOwned,
        E: DeserializeOwned,
    {
        let Some(msg) = Message::with_payload(from, command, Type::Request, payload) else {
            return Err(RequestError::System(Error::RequestAllocationFailed));
        };
        self.request_msg(msg).await
    }

    /// Sends a request carrying an encoded argument.
    pub async fn request_value<T, E, A>(
        &mut self,
        from: u8,
        command: u8,
        argument: &A,
    ) -> Result<T, RequestError<E>>
    where
        T: DeserializeOwned,
        E: DeserializeOwned,
        A: Serialize,
    {
        let Some(msg) = Message::with_value(from, command, Type::Request, argument) else {
            return Err(RequestError::System(Error::RequestAllocationFailed));
        };
        self.request_msg(msg).await
    }

    async fn request_msg<T, E>(&mut self, msg: Message) -> Result<T, RequestError<E>>
    where
        T: DeserializeOwned,
        E: DeserializeOwned,
    {
        let pending = PendingRequest {
            address: msg.address(),
            command: msg.command(),
        };
        self.node.response.reset();
        self.node.pending.lock(|slot| slot.set(Some(pending)));
        self.node.tx_queue.send(msg).await;

        let reply = with_timeout(RESPONSE_TIMEOUT, self.node.response.wait()).await;
        self.node.pending.lock(|slot| slot.set(None));

        match reply {
            Ok(msg) => decode_reply(&msg),
            Err(_) => Err(RequestError::System(Error::RequestTimeout)),
        }
    }
}

/// Bus worker: drains the transmit queue with collision backoff and dispatches
/// received frames. Must run as a task.
pub struct Runner<'a, M: RawMutex, D: Device, const TX_QUEUE: usize, const MAX_HEAP: usize> {
    node: &'a NodeState<M, TX_QUEUE>,
    interface: Interface<D, MAX_HEAP>,
    actions: &'a mut [Action],
    listeners: &'a [Listener],
    rx_msg: Message,
    lfsr: u16,
    tx_counter: u8,
}

impl<M: RawMutex, D: Device, const TX_QUEUE: usize, const MAX_HEAP: usize>
    Runner<'_, M, D, TX_QUEUE, MAX_HEAP>
{
    pub async fn run(&mut self) -> ! {
        loop {
            let tx = self.node.tx_queue.receive();
            let rx = self.interface.wait_rx_pending();
            let event = select(tx, rx).await;
            match event {
                Either::First(msg) => self.send(msg).await,
                Either::Second(()) => self.receive().await,
            }
        }
    }

    async fn send(&mut self, mut msg: Message) {
        msg.set_valid();
        // At least one attempt even for the lowest-priority commands.
        self.tx_counter = MIN_TX_TRIES
            .min(msg.command() >> (8 - PRIORITY_BITS))
            .max(1);

        loop {
            while self.interface.is_medium_busy() {
                self.receive().await;
                self.backoff(RESCHEDULE_MASK_SHORT).await;
            }

            match self.interface.transmit(&msg).await {
                Ok(()) => break,
                Err(TransmitError::MediumBusy) => continue,
                Err(error) => {
                    // A collision or other write issue occurred.
                    if self.tx_counter <= 1 {
                        warn!(
                            "dropping message after retry budget: command={} error={:?}",
                            msg.command(),
                            error
                        );
                        break;
                    }
                    self.tx_counter -= 1;
                    while self.interface.is_medium_busy() {
                        self.receive().await;
                    }
                    self.backoff(RESCHEDULE_MASK_LONG).await;
                }
            }
        }
    }

    async fn receive(&mut self) {
        // Releases the previous frame's heap block before reuse.
        self.rx_msg.deallocate();
        if self.interface.receive_header(&mut self.rx_msg).await.is_err() {
            return;
        }
        // Header-only pass: decide interest before paying for the payload.
        let interested = self.handle_rx_message(false);
        if self
            .interface
            .receive_data(&mut self.rx_msg, interested)
            .await
            .is_ok()
            && interested
        {
            self.handle_rx_message(true);
        }
    }

    fn handle_rx_message(&mut self, complete: bool) -> bool {
        match self.rx_msg.message_type() {
            Type::Broadcast => {
                if !complete {
                    return self
                        .listeners
                        .iter()
                        .any(|listener| listener.command() == self.rx_msg.command());
                }
                for listener in self.listeners {
                    if listener.command() == self.rx_msg.command() {
                        listener.call(&self.rx_msg);
                    }
                }
                false
            }

            Type::Request if self.rx_msg.address() == self.node.address => {
                for action in self.actions.iter_mut() {
                    if action.command() == self.rx_msg.command() {
                        if complete {
                            let mut reply = action.call(&self.rx_msg);
                            reply.set_address(self.node.address);
                            reply.set_command(action.command());
                            // Full queue drops the reply, the requester times out.
                            let _ = self.node.tx_queue.try_send(reply);
                        }
                        return true;
                    }
                }
                debug!("no action bound for command={}", self.rx_msg.command());
                let reply =
                    Message::with_error(self.node.address, self.rx_msg.command(), Error::NoAction);
                let _ = self.node.tx_queue.try_send(reply);
                false
            }

            ty if ty.is_reply() => {
                let Some(pending) = self.node.pending.lock(|slot| slot.get()) else {
                    return false;
                };
                if complete
                    && pending.address == self.rx_msg.address()
                    && pending.command == self.rx_msg.command()
                {
                    self.node.response.signal(mem::take(&mut self.rx_msg));
                }
                // The outstanding command is unknown until compared, so payload
                // allocation is always requested while a request waits.
                true
            }

            _ => false,
        }
    }

    async fn backoff(&mut self, mask: u8) {
        let delay = self.reschedule(mask);
        Timer::after(Duration::from_micros(u64::from(delay))).await;
    }

    /// Advances the per-node xorshift LFSR and derives the next backoff delay in
    /// microseconds: random jitter below the mask, a deterministic
    /// priority offset above it that grows with consumed retries.
    fn reschedule(&mut self, mask: u8) -> u16 {
        self.lfsr ^= self.lfsr >> 7;
        self.lfsr ^= self.lfsr << 9;
        self.lfsr ^= self.lfsr >> 13;

        let priority = ((1u16 << PRIORITY_BITS) - 1 - u16::from(self.tx_counter)) >> 3;
        (self.lfsr & ((1u16 << mask) - 1)) | (priority << mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lfsr_sequence_is_deterministic() {
        let mut a = Lfsr::new(42);
        let mut b = Lfsr::new(42);
        for _ in 0..100 {
            assert_eq!(a.next(), b.next());
        }
    }

    #[test]
    fn test_lfsr_differs_per_address() {
        let mut a = Lfsr::new(1);
        let mut b = Lfsr::new(2);
        let same = (0..16).filter(|_| a.next() == b.next()).count();
        assert!(same < 16);
    }

    struct Lfsr(u16);

    impl Lfsr {
        fn new(address: u8) -> Self {
            Self(u16::from(address) << 8 | u16::from(address.wrapping_add(1)))
        }

        fn next(&mut self) -> u16 {
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 9;
            self.0 ^= self.0 >> 13;
            self.0
        }
    }
}
