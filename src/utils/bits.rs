use crate::error::{DemuxError, Result};

/// A bit-level reader over a byte slice, most significant bit first.
///
/// Used by the keyframe heuristics that peek into video payloads.
///
/// Example:
/// ```
/// use vdkdemux::utils::BitReader;
///
/// let data = [0b10110011];
/// let mut reader = BitReader::new(&data);
///
/// assert_eq!(reader.read_bit().unwrap(), true);   // 1
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011); // 011
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Reads a single bit. Fails at end of data.
    pub fn read_bit(&mut self) -> Result<bool> {
        let byte = *self
            .data
            .get(self.byte_offset)
            .ok_or_else(|| DemuxError::InvalidData("bit reader exhausted".into()))?;

        let bit = (byte >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }
        Ok(bit == 1)
    }

    /// Reads `n <= 32` bits as a big-endian number.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(DemuxError::InvalidData(format!("cannot read {} bits at once", n)));
        }
        if n as usize > self.available_bits() {
            return Err(DemuxError::InvalidData("bit reader exhausted".into()));
        }

        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Ok(value as u32)
    }

    /// Unsigned exponential Golomb code, ue(v).
    pub fn read_golomb(&mut self) -> Result<u32> {
        let mut leading_zeros = 0;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(DemuxError::InvalidData("invalid exp-Golomb code".into()));
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let info = self.read_bits(leading_zeros)?;
        Ok((1u32 << leading_zeros) - 1 + info)
    }

    pub fn available_bits(&self) -> usize {
        (self.data.len().saturating_sub(self.byte_offset)) * 8 - self.bit_offset as usize
    }
}

/// Offset of the first `00 00 01 <code>` start code in `data`.
pub fn find_start_code(data: &[u8], code: u8) -> Option<usize> {
    data.windows(4)
        .position(|w| w[0] == 0 && w[1] == 0 && w[2] == 1 && w[3] == code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_read_bits() {
        let data = [0b10110011, 0b01011010];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits(8).unwrap(), 0b10011010);
        assert_eq!(reader.read_bits(0).unwrap(), 0);
        assert_eq!(reader.available_bits(), 5);
        assert!(reader.read_bits(6).is_err());
        assert!(reader.read_bits(33).is_err());
    }

    #[test]
    fn test_read_golomb() {
        let cases: [(u8, u32); 5] = [
            (0b1000_0000, 0),
            (0b0100_0000, 1),
            (0b0110_0000, 2),
            (0b0010_0000, 3),
            (0b0011_1000, 6),
        ];
        for (byte, expected) in cases {
            let data = [byte];
            let mut reader = BitReader::new(&data);
            assert_eq!(reader.read_golomb().unwrap(), expected, "byte {:08b}", byte);
        }

        let zeros = [0u8; 5];
        assert!(BitReader::new(&zeros).read_golomb().is_err());
    }

    #[test]
    fn test_find_start_code() {
        let data = [0x12, 0x00, 0x00, 0x01, 0xB0, 0x00, 0x00, 0x01, 0xB6, 0x40];
        assert_eq!(find_start_code(&data, 0xB6), Some(5));
        assert_eq!(find_start_code(&data, 0xB3), None);
    }

    #[quickcheck]
    fn prop_read_bits_matches_manual(data: Vec<u8>, n: u8) -> bool {
        let n = (n % 33) as usize;
        let mut reader = BitReader::new(&data);
        match reader.read_bits(n as u32) {
            Ok(result) => {
                let mut expected = 0u64;
                for i in 0..n {
                    let bit = (data[i / 8] >> (7 - (i % 8))) & 1;
                    expected = (expected << 1) | bit as u64;
                }
                result as u64 == expected
            }
            Err(_) => n > data.len() * 8,
        }
    }
}
