use embassy_futures::yield_now;

/// The device gave up on a byte transfer within its own timeout window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceTimeout;

/// Half-duplex byte transport.
///
/// Implementations transfer exactly one byte per call and bound each call with a
/// device-specific timeout. The stack never retries a timed-out byte; the frame
/// is abandoned instead.
#[allow(async_fn_in_trait)]
pub trait Device {
    /// Non-suspending poll for unread received bytes.
    fn has_received(&self) -> bool;

    /// Suspends until at least one received byte is pending.
    ///
    /// Drivers with interrupt-driven receive buffers should override this with a
    /// waker-based wait instead of the polling default.
    async fn wait_received(&mut self) {
        while !self.has_received() {
            yield_now().await;
        }
    }

    /// Reads one byte, suspending until it arrives or the device timeout elapses.
    async fn read(&mut self) -> Result<u8, DeviceTimeout>;

    /// Writes one byte, suspending until it is accepted or the device timeout elapses.
    async fn write(&mut self, byte: u8) -> Result<(), DeviceTimeout>;
}
