//! # AMNB
//!
//! This library provides an async implementation of the AMNB (asynchronous multi-node
//! bus) protocol for no_std environments: addressed request/response and broadcast
//! messaging between up to 256 peers sharing one half-duplex byte medium (a single-wire
//! or RS-485 bus). Collisions are resolved by listen-before-talk checks and randomized,
//! priority-biased backoff.
//!
//! The library primarily targets the Embassy async framework.
//!
//! ## Architecture
//!
//! ```text
//!  application           ┌────────┐
//!      │                 │ Runner │◄── spawned as a task
//!      ▼                 └───┬────┘
//!  ┌────────┐   ┌──────┐     │   ┌───────────┐  ┌───────────┐
//!  │ Caller ├──►│ Node │◄────┴──►│ Interface ├─►│  Device   │
//!  └────────┘   └──────┘         └───────────┘  └───────────┘
//!                  ▲                 framing        bus I/O
//!         Actions ─┤
//!       Listeners ─┘
//! ```
//!
//! Components:
//! * _Message_ owns one frame: header fields plus a payload held inline (up to 28
//!   bytes) or on the heap.
//! * _Interface_ implements the wire codec over a byte [`device::Device`]: sync
//!   markers, byte-stuffing, and header/payload checksums.
//! * _Listener_ and _Action_ bind command ids to application callbacks for incoming
//!   broadcasts and requests.
//! * _Node_ is the protocol engine. It splits into a `Caller` handle for the
//!   application and a `Runner` that owns the interface and must run as a task.
//!
//! ## Concurrency model
//!
//! All bus activity happens inside the `Runner` future; the `Caller` communicates
//! with it through a bounded transmit queue and a response signal, both generic over
//! an `embassy_sync` `RawMutex`. One node supports at most one outstanding request,
//! enforced by `&mut` on [`node::Caller::request`].
#![no_std]

extern crate alloc;

pub use amnb_core as core;
pub use amnb_driver::{device, time};

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

mod format;
pub mod handler;
pub mod interface;
pub mod message;
pub mod node;
