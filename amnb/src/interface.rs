use amnb_driver::device::{Device, DeviceTimeout};

use crate::core::Type;
use crate::format::{DataCrc, HeaderCrc};
use crate::message::{
    LARGE_HEADER_SIZE, Message, SMALL_HEADER_SIZE, SMALL_PAYLOAD_SIZE,
};

/// Frame start marker, sent twice to reduce the false-sync probability.
pub const STX: u8 = 0x7e;
/// Escape marker. A payload or header byte equal to `STX` or `DLE` goes on the
/// wire as `DLE` followed by the byte XOR-ed with [`ESCAPE_XOR`].
pub const DLE: u8 = 0x7d;
pub const ESCAPE_XOR: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitError {
    /// A frame is arriving or unread bytes are pending; sending now would collide.
    MediumBusy,
    SyncWriteFailed,
    HeaderWriteFailed,
    DataWriteFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReceiveError {
    /// No bytes are pending on the device.
    MediumEmpty,
    /// The frame did not open with two `STX` bytes.
    SyncReadFailed,
    HeaderReadFailed,
    /// Header checksum mismatch. Also releases the receiving state so no
    /// inter-byte timeout is kept waiting on a corrupt frame.
    HeaderInvalid,
    DataReadFailed,
    /// Payload checksum mismatch.
    DataInvalid,
    /// The declared payload length exceeds the allocation cap, or the allocator
    /// refused. The payload bytes are still drained to keep the medium in sync.
    AllocationFailed,
}

/// Wire codec for one shared half-duplex medium.
///
/// `MAX_HEAP` caps the heap allocation for any received large payload; 0 restricts
/// reception to inline payloads entirely.
pub struct Interface<D: Device, const MAX_HEAP: usize = 0> {
    device: D,
    receiving: bool,
}

impl<D: Device, const MAX_HEAP: usize> Interface<D, MAX_HEAP> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            receiving: false,
        }
    }

    /// True while a frame reception is in progress or the device holds unread
    /// bytes. Transmissions must not start while this holds.
    pub fn is_medium_busy(&self) -> bool {
        self.receiving || self.device.has_received()
    }

    pub(crate) async fn wait_rx_pending(&mut self) {
        self.device.wait_received().await
    }

    /// Sends one complete frame: two raw sync bytes, then the header and payload
    /// through the escaping transform.
    pub async fn transmit(&mut self, msg: &Message) -> Result<(), TransmitError> {
        if self.is_medium_busy() {
            return Err(TransmitError::MediumBusy);
        }

        for _ in 0..2 {
            self.device
                .write(STX)
                .await
                .map_err(|_| TransmitError::SyncWriteFailed)?;
        }

        let (header, header_length) = msg.header_bytes();
        for &byte in &header[..header_length] {
            self.write_escaped(byte)
                .await
                .map_err(|_| TransmitError::HeaderWriteFailed)?;
        }

        if let Some(payload) = msg.payload() {
            for &byte in payload {
                self.write_escaped(byte)
                    .await
                    .map_err(|_| TransmitError::DataWriteFailed)?;
            }
        }

        trace!(
            "tx frame: address={} command={} length={}",
            msg.address(),
            msg.command(),
            msg.length()
        );
        Ok(())
    }

    /// Receives one frame header, plus the inline payload of a small frame.
    ///
    /// On success for a large frame the medium stays busy until [`receive_data`]
    /// consumes the payload; small frames complete here.
    ///
    /// [`receive_data`]: Self::receive_data
    pub async fn receive_header(&mut self, msg: &mut Message) -> Result<(), ReceiveError> {
        match self.receive_header_inner(msg).await {
            Ok(()) => {
                self.receiving = msg.is_large();
                Ok(())
            }
            Err(error) => {
                self.receiving = false;
                Err(error)
            }
        }
    }

    async fn receive_header_inner(&mut self, msg: &mut Message) -> Result<(), ReceiveError> {
        if !self.device.has_received() {
            return Err(ReceiveError::MediumEmpty);
        }

        for _ in 0..2 {
            let byte = self
                .device
                .read()
                .await
                .map_err(|_| ReceiveError::SyncReadFailed)?;
            if byte != STX {
                return Err(ReceiveError::SyncReadFailed);
            }
        }

        let mut header = [0u8; LARGE_HEADER_SIZE];
        for byte in header[..SMALL_HEADER_SIZE].iter_mut() {
            *byte = self.read_header_byte().await?;
        }
        let length_bits = header[3] & !Type::MASK;
        let message_type =
            Type::try_from_u8(header[3]).ok_or(ReceiveError::HeaderInvalid)?;

        if usize::from(length_bits) <= SMALL_PAYLOAD_SIZE {
            // Small frame: the inline payload belongs to this call.
            let length = usize::from(length_bits);
            let mut payload = [0u8; SMALL_PAYLOAD_SIZE];
            for byte in payload[..length].iter_mut() {
                *byte = self.read_header_byte().await?;
            }

            let mut crc = HeaderCrc::default();
            crc.add_bytes(&header[1..SMALL_HEADER_SIZE]);
            crc.add_bytes(&payload[..length]);
            if crc.get() != header[0] {
                return Err(ReceiveError::HeaderInvalid);
            }

            *msg = Message::from_small_wire(
                header[0],
                header[1],
                header[2],
                message_type,
                &payload[..length],
            );
        } else {
            for byte in header[SMALL_HEADER_SIZE..].iter_mut() {
                *byte = self.read_header_byte().await?;
            }

            let mut crc = HeaderCrc::default();
            crc.add_bytes(&header[1..LARGE_HEADER_SIZE]);
            if crc.get() != header[0] {
                return Err(ReceiveError::HeaderInvalid);
            }

            let length = u16::from_le_bytes([header[4], header[5]]);
            let data_crc = u16::from_le_bytes([header[6], header[7]]);
            *msg = Message::from_large_wire(
                header[0],
                header[1],
                header[2],
                message_type,
                length,
                data_crc,
            );
        }
        Ok(())
    }

    /// Receives a large frame's payload; a no-op for small messages.
    ///
    /// With `allocate` unset (the message is of no local interest) or when the
    /// declared length exceeds `MAX_HEAP`, the bytes are read and discarded so the
    /// next frame stays in sync.
    pub async fn receive_data(
        &mut self,
        msg: &mut Message,
        allocate: bool,
    ) -> Result<(), ReceiveError> {
        let result = self.receive_data_inner(msg, allocate).await;
        self.receiving = false;
        result
    }

    async fn receive_data_inner(
        &mut self,
        msg: &mut Message,
        allocate: bool,
    ) -> Result<(), ReceiveError> {
        if !msg.is_large() {
            return Ok(());
        }

        let length = msg.length();
        let stored = allocate && length <= MAX_HEAP && msg.allocate();

        let mut crc = DataCrc::default();
        for index in 0..length {
            let byte = match self.read_unescaped().await {
                Ok(byte) => byte,
                Err(DeviceTimeout) => return Err(ReceiveError::DataReadFailed),
            };
            crc.add(byte);
            if stored {
                if let Some(payload) = msg.payload_mut() {
                    payload[index] = byte;
                }
            }
        }

        if allocate && !stored {
            return Err(ReceiveError::AllocationFailed);
        }
        if crc.get() != msg.data_crc() {
            return Err(ReceiveError::DataInvalid);
        }
        trace!(
            "rx frame: address={} command={} length={}",
            msg.address(),
            msg.command(),
            length
        );
        Ok(())
    }

    async fn read_header_byte(&mut self) -> Result<u8, ReceiveError> {
        self.read_unescaped()
            .await
            .map_err(|_| ReceiveError::HeaderReadFailed)
    }

    async fn read_unescaped(&mut self) -> Result<u8, DeviceTimeout> {
        let byte = self.device.read().await?;
        if byte == DLE {
            Ok(self.device.read().await? ^ ESCAPE_XOR)
        } else {
            Ok(byte)
        }
    }

    async fn write_escaped(&mut self, byte: u8) -> Result<(), DeviceTimeout> {
        if byte == STX || byte == DLE {
            self.device.write(DLE).await?;
            self.device.write(byte ^ ESCAPE_XOR).await
        } else {
            self.device.write(byte).await
        }
    }
}
