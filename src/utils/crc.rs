/// Ogg page checksum: CRC-32, polynomial 0x04C11DB7, initial value 0,
/// no reflection, no final xor. Computed with the checksum field zeroed.
const CRC32_POLY: u32 = 0x04C11DB7;

pub struct OggCrc {
    table: [u32; 256],
}

impl OggCrc {
    pub fn new() -> Self {
        let mut table = [0u32; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let mut crc = (i as u32) << 24;
            for _ in 0..8 {
                crc = if crc & 0x8000_0000 != 0 {
                    (crc << 1) ^ CRC32_POLY
                } else {
                    crc << 1
                };
            }
            *slot = crc;
        }
        Self { table }
    }

    pub fn update(&self, mut crc: u32, data: &[u8]) -> u32 {
        for &byte in data {
            let index = ((crc >> 24) ^ byte as u32) & 0xFF;
            crc = (crc << 8) ^ self.table[index as usize];
        }
        crc
    }

    pub fn calculate(&self, data: &[u8]) -> u32 {
        self.update(0, data)
    }
}

impl Default for OggCrc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_check_value() {
        let crc = OggCrc::new();
        assert_eq!(crc.calculate(b"123456789"), 0x89A1_897F);
        assert_eq!(crc.calculate(&[]), 0);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let crc = OggCrc::new();
        let data = b"OggS\x00\x02 split across calls";
        let partial = crc.update(0, &data[..7]);
        assert_eq!(crc.update(partial, &data[7..]), crc.calculate(data));
    }

    #[quickcheck]
    fn prop_appended_checksum_leaves_zero_residue(data: Vec<u8>) -> bool {
        let crc = OggCrc::new();
        let mut framed = data.clone();
        framed.extend_from_slice(&crc.calculate(&data).to_be_bytes());
        crc.calculate(&framed) == 0
    }
}
