//! A forward, MSB-first bit reader that removes stuffing bits.

#[derive(Debug, Clone)]
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    cur_pos: usize,
}

impl<'a> BitReader<'a> {
    #[inline]
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, cur_pos: 0 }
    }

    #[inline]
    pub(crate) fn align(&mut self) {
        let bit_pos = self.bit_pos();

        if !bit_pos.is_multiple_of(8) {
            self.cur_pos += 8 - bit_pos;
        }
    }

    #[inline(always)]
    pub(crate) fn read_bit(&mut self) -> Option<u32> {
        let byte = *self.data.get(self.byte_pos())? as u32;
        let shift = 7 - self.bit_pos();
        self.cur_pos += 1;

        Some((byte >> shift) & 1)
    }

    #[inline]
    pub(crate) fn byte_pos(&self) -> usize {
        self.cur_pos / 8
    }

    #[inline]
    pub(crate) fn bit_pos(&self) -> usize {
        self.cur_pos % 8
    }

    /// Read `bit_size` bits, skipping the stuffing bit that follows each
    /// 0xFF byte.
    #[inline]
    pub(crate) fn read_bits_with_stuffing(&mut self, bit_size: u8) -> Option<u32> {
        let mut bits = 0;

        for _ in 0..bit_size {
            let needs_stuff_bit = self.needs_to_read_stuff_bit();

            bits = (bits << 1) | self.read_bit()?;

            if needs_stuff_bit {
                self.read_stuff_bit()?;
            }
        }

        Some(bits)
    }

    /// Like [`Self::read_bits_with_stuffing`], but without advancing the
    /// reader.
    #[inline]
    pub(crate) fn peek_bits_with_stuffing(&self, bit_size: u8) -> Option<u32> {
        self.clone().read_bits_with_stuffing(bit_size)
    }

    fn needs_to_read_stuff_bit(&self) -> bool {
        // B.10.1: "If the value of the byte is 0xFF, the next byte includes an extra zero bit
        // stuffed into the MSB."
        self.bit_pos() == 7 && self.data.get(self.byte_pos()) == Some(&0xff)
    }

    #[inline]
    fn read_stuff_bit(&mut self) -> Option<()> {
        if self.read_bit()? != 0 {
            return None;
        }

        Some(())
    }
}

/// Pack a sequence of bits (MSB-first) into bytes, inserting a stuffing bit
/// after each 0xFF byte.
#[cfg(test)]
pub(crate) fn pack_bits(bits: &[u8]) -> Vec<u8> {
    let mut out = vec![];
    let mut cur = 0_u8;
    let mut count = 0;
    let mut capacity = 8;

    let padding = core::iter::repeat(0).take(7);

    for (idx, bit) in bits.iter().copied().chain(padding).enumerate() {
        if idx >= bits.len() && count == 0 {
            break;
        }

        cur = (cur << 1) | bit;
        count += 1;

        if count == capacity {
            out.push(cur);
            capacity = if cur == 0xff { 7 } else { 8 };
            cur = 0;
            count = 0;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_bits() {
        let data = [0b1001_1000, 0b0001_0000];
        let mut reader = BitReader::new(&data);

        assert_eq!(reader.read_bits_with_stuffing(4), Some(0b1001));
        assert_eq!(reader.read_bits_with_stuffing(1), Some(1));
        reader.align();
        assert_eq!(reader.byte_pos(), 1);
        assert_eq!(reader.read_bits_with_stuffing(4), Some(0b0001));
    }

    #[test]
    fn stuffing_bit_is_skipped() {
        let data = [0xff, 0b0101_0000];
        let mut reader = BitReader::new(&data);

        assert_eq!(reader.read_bits_with_stuffing(8), Some(0xff));
        // The MSB of the second byte is the stuffing bit.
        assert_eq!(reader.read_bits_with_stuffing(3), Some(0b101));
    }

    #[test]
    fn stuffing_bit_must_be_zero() {
        let data = [0xff, 0x80];
        let mut reader = BitReader::new(&data);

        assert_eq!(reader.read_bits_with_stuffing(9), None);
    }

    #[test]
    fn pack_bits_inserts_stuffing() {
        let bits = [1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 1];
        let packed = pack_bits(&bits);
        assert_eq!(packed, vec![0xff, 0b0101_0000]);

        let mut reader = BitReader::new(&packed);
        for bit in bits {
            assert_eq!(reader.read_bits_with_stuffing(1), Some(bit as u32));
        }
    }
}
