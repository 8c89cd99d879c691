#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::poll_fn;
use std::rc::Rc;
use std::task::{Poll, Waker};

use amnb::device::{Device, DeviceTimeout};

/// In-memory shared half-duplex bus. Every byte written by one endpoint becomes
/// readable at all other endpoints.
#[derive(Clone, Default)]
pub struct Bus {
    inner: Rc<RefCell<BusInner>>,
}

#[derive(Default)]
struct BusInner {
    endpoints: Vec<Endpoint>,
}

#[derive(Default)]
struct Endpoint {
    queue: VecDeque<u8>,
    waker: Option<Waker>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self) -> BusDevice {
        let mut inner = self.inner.borrow_mut();
        inner.endpoints.push(Endpoint::default());
        BusDevice {
            inner: self.inner.clone(),
            index: inner.endpoints.len() - 1,
        }
    }

    /// Wire bytes currently pending at `endpoint`.
    pub fn pending(&self, endpoint: usize) -> Vec<u8> {
        self.inner.borrow().endpoints[endpoint]
            .queue
            .iter()
            .copied()
            .collect()
    }

    /// Flips one bit of a pending byte, emulating corruption on the medium.
    pub fn corrupt(&self, endpoint: usize, position: usize) {
        self.inner.borrow_mut().endpoints[endpoint].queue[position] ^= 0x01;
    }

    pub fn clear(&self, endpoint: usize) {
        self.inner.borrow_mut().endpoints[endpoint].queue.clear();
    }

    /// Places raw wire bytes at `endpoint`, as if a peer had transmitted them.
    pub fn inject(&self, endpoint: usize, bytes: &[u8]) {
        let mut inner = self.inner.borrow_mut();
        let endpoint = &mut inner.endpoints[endpoint];
        endpoint.queue.extend(bytes);
        if let Some(waker) = endpoint.waker.take() {
            waker.wake();
        }
    }
}

pub struct BusDevice {
    inner: Rc<RefCell<BusInner>>,
    index: usize,
}

impl Device for BusDevice {
    fn has_received(&self) -> bool {
        !self.inner.borrow().endpoints[self.index].queue.is_empty()
    }

    async fn wait_received(&mut self) {
        poll_fn(|cx| {
            let mut inner = self.inner.borrow_mut();
            let endpoint = &mut inner.endpoints[self.index];
            if endpoint.queue.is_empty() {
                endpoint.waker = Some(cx.waker().clone());
                Poll::Pending
            } else {
                Poll::Ready(())
            }
        })
        .await
    }

    async fn read(&mut self) -> Result<u8, DeviceTimeout> {
        // An empty queue models an expired inter-byte timeout.
        self.inner.borrow_mut().endpoints[self.index]
            .queue
            .pop_front()
            .ok_or(DeviceTimeout)
    }

    async fn write(&mut self, byte: u8) -> Result<(), DeviceTimeout> {
        let index = self.index;
        let mut inner = self.inner.borrow_mut();
        for (other, endpoint) in inner.endpoints.iter_mut().enumerate() {
            if other != index {
                endpoint.queue.push_back(byte);
                if let Some(waker) = endpoint.waker.take() {
                    waker.wake();
                }
            }
        }
        Ok(())
    }
}
