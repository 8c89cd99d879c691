/// Running CRC-8 over the unescaped header bytes (and, for small frames, the
/// payload). Dallas/Maxim iButton polynomial, reflected.
#[derive(Debug, Clone, Copy)]
pub struct HeaderCrc(u8);

impl Default for HeaderCrc {
    fn default() -> Self {
        Self(Self::INIT_VALUE)
    }
}

impl HeaderCrc {
    pub const LENGTH: usize = 1;
    const INIT_VALUE: u8 = 0x00;
    const POLYNOMIAL: u8 = 0x8C;

    pub fn add(&mut self, byte: u8) {
        self.0 ^= byte;
        for _bit in 0..8 {
            if (self.0 & 0x01) != 0 {
                self.0 = (self.0 >> 1) ^ Self::POLYNOMIAL;
            } else {
                self.0 >>= 1;
            }
        }
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        bytes.iter().for_each(|&byte| self.add(byte));
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

/// Running CRC-16 over the unescaped payload bytes of a large frame.
/// MCRF4XX parameterization: reflected 0x1021, init 0xffff, no final XOR.
#[derive(Debug, Clone, Copy)]
pub struct DataCrc(u16);

impl Default for DataCrc {
    fn default() -> Self {
        Self(Self::INIT_VALUE)
    }
}

impl DataCrc {
    pub const LENGTH: usize = 2;
    const INIT_VALUE: u16 = 0xffff;
    const POLYNOMIAL: u16 = 0x8408;

    pub fn add(&mut self, byte: u8) {
        self.0 ^= u16::from(byte);
        for _bit in 0..8 {
            if (self.0 & 0x0001) != 0 {
                self.0 = (self.0 >> 1) ^ Self::POLYNOMIAL;
            } else {
                self.0 >>= 1;
            }
        }
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        bytes.iter().for_each(|&byte| self.add(byte));
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}
