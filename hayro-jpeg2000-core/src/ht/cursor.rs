//! Bit cursors over the byte streams of an HT code-block.
//!
//! An HT cleanup segment holds three interleaved streams: the MagSgn bytes
//! are read forwards from the start, the MEL bytes forwards from the start of
//! the suffix and the VLC bytes backwards from the end. The refinement
//! segment holds the SigProp bits read forwards and the MagRef bits read
//! backwards. All of them skip stuffing bits following `0xFF` bytes, but
//! each in its own way.

/// `MEL_E` from Table 2 of Rec. ITU-T T.814.
const MEL_EXPONENTS: [u8; 13] = [0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 4, 5];

/// Reads bits from the least significant end of a 64-bit buffer that is
/// refilled by walking the data backwards.
///
/// Used for the VLC stream of the cleanup segment and the MagRef stream of
/// the refinement segment.
#[derive(Debug)]
pub(super) struct BackwardReader<'a> {
    data: &'a [u8],
    pos: isize,
    bit_buf: u64,
    bits_left: u32,
}

impl<'a> BackwardReader<'a> {
    /// Create a reader whose first byte is the second to last byte of
    /// `data`. The last byte is only used to detect stuffing bits.
    pub(super) fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: data.len() as isize - 2,
            bit_buf: 0,
            bits_left: 0,
        }
    }

    /// Create a reader for the VLC stream, which starts with the upper
    /// nibble of the byte holding the suffix length.
    pub(super) fn new_vlc(data: &'a [u8]) -> Self {
        let mut reader = Self::new(data);
        reader.refill();
        reader.drop_bits(4);

        reader
    }

    #[inline(always)]
    fn byte(&self, idx: isize) -> u64 {
        if idx < 0 {
            return 0;
        }

        self.data.get(idx as usize).copied().unwrap_or(0) as u64
    }

    /// Pull in (at least) another 28 bits, unless the buffer already holds
    /// 32 bits.
    pub(super) fn refill(&mut self) {
        if self.bits_left >= 32 {
            return;
        }

        let last = self.byte(self.pos + 1);
        let mut tmp = 0_u64;

        if self.pos >= 3 {
            for i in (0..4).rev() {
                tmp = (tmp << 8) | self.byte(self.pos - i);
            }

            self.pos -= 4;
        } else {
            for i in (0..3).rev() {
                if self.pos >= i {
                    tmp = (tmp << 8) | self.byte(self.pos - i);
                }
            }

            self.pos = 0;
        }

        // The extra byte allows detecting a stuffing bit in the lowest byte.
        tmp = (tmp << 8) | last;
        let mut new_bits = 32;

        // A byte following (in reading order) a byte larger than 0x8F whose
        // lower seven bits are all set has a stuffing bit as its MSB.
        if (tmp & 0x7FFF_0000_00) > 0x7F8F_0000_00 {
            tmp &= 0x7F_FFFF_FFFF;
            new_bits -= 1;
        }

        if (tmp & 0x007F_FF00_00) > 0x007F_8F00_00 {
            tmp = (tmp & 0x007F_FFFF_FF) + ((tmp & 0xFF_0000_0000) >> 1);
            new_bits -= 1;
        }

        if (tmp & 0x0000_7FFF_00) > 0x0000_7F8F_00 {
            tmp = (tmp & 0x0000_7FFF_FF) + ((tmp & 0xFF_FF00_0000) >> 1);
            new_bits -= 1;
        }

        if (tmp & 0x0000_007F_FF) > 0x0000_007F_8F {
            tmp = (tmp & 0x0000_007F_FF) + ((tmp & 0xFF_FFFF_0000) >> 1);
            new_bits -= 1;
        }

        tmp >>= 8;

        self.bit_buf |= tmp << self.bits_left;
        self.bits_left += new_bits;
    }

    #[inline(always)]
    pub(super) fn peek_bits(&self, num_bits: u32) -> u32 {
        (self.bit_buf & ((1_u64 << num_bits) - 1)) as u32
    }

    #[inline(always)]
    pub(super) fn drop_bits(&mut self, num_bits: u32) {
        self.bit_buf >>= num_bits;
        self.bits_left = self.bits_left.saturating_sub(num_bits);
    }

    #[inline(always)]
    pub(super) fn read_bits(&mut self, num_bits: u32) -> u32 {
        if self.bits_left < num_bits {
            self.refill();
        }

        let bits = self.peek_bits(num_bits);
        self.drop_bits(num_bits);

        bits
    }

    /// Decode the prefix of an unsigned residual (7.3.6).
    pub(super) fn read_u_prefix(&mut self) -> u32 {
        const VALUES: [u8; 8] = [5, 1, 2, 1, 3, 1, 2, 1];
        const LENGTHS: [u8; 8] = [3, 1, 2, 1, 3, 1, 2, 1];

        if self.bits_left < 3 {
            self.refill();
        }

        let bits = self.peek_bits(3) as usize;
        self.drop_bits(LENGTHS[bits] as u32);

        VALUES[bits] as u32
    }

    /// Decode the suffix of an unsigned residual with the given prefix.
    pub(super) fn read_u_suffix(&mut self, prefix: u32) -> u32 {
        if prefix < 3 {
            return 0;
        }

        if self.bits_left < 5 {
            self.refill();
        }

        let bits = self.peek_bits(5);

        if prefix == 3 {
            self.drop_bits(1);
            bits & 1
        } else {
            self.drop_bits(5);
            bits & 31
        }
    }

    /// Decode the extension of an unsigned residual with the given suffix.
    pub(super) fn read_u_extension(&mut self, suffix: u32) -> u32 {
        if suffix >= 28 { self.read_bits(4) } else { 0 }
    }

    /// Decode a complete unsigned residual.
    pub(super) fn read_u(&mut self) -> u32 {
        let prefix = self.read_u_prefix();
        let suffix = self.read_u_suffix(prefix);
        let extension = self.read_u_extension(suffix);

        prefix + suffix + 4 * extension
    }
}

/// Reads the MagSgn stream forwards, LSB first.
#[derive(Debug)]
pub(super) struct MagSgnReader<'a> {
    data: &'a [u8],
    pos: usize,
    last: u8,
    bit_buf: u64,
    bits_left: u32,
    bits_read: usize,
}

impl<'a> MagSgnReader<'a> {
    pub(super) fn new(data: &'a [u8]) -> Self {
        let mut reader = Self {
            data,
            pos: 0,
            last: 0,
            bit_buf: 0,
            bits_left: 0,
            bits_read: 0,
        };
        reader.refill();

        reader
    }

    fn refill(&mut self) {
        while self.bits_left < 32 {
            // A byte following 0xFF only contributes seven bits. Past the end
            // of the data, the stream is padded with 0xFF.
            let num_bits = if self.last == 0xFF { 7 } else { 8 };
            let mut byte = 0xFF;

            if let Some(&b) = self.data.get(self.pos) {
                byte = b;
                self.pos += 1;
                self.last = b;
            }

            self.bit_buf |= (byte as u64) << self.bits_left;
            self.bits_left += num_bits;
        }
    }

    #[inline(always)]
    pub(super) fn read_bits(&mut self, num_bits: u32) -> u32 {
        if self.bits_left <= num_bits {
            self.refill();
        }

        let bits = (self.bit_buf & ((1_u64 << num_bits) - 1)) as u32;
        self.bit_buf >>= num_bits;
        self.bits_left = self.bits_left.saturating_sub(num_bits);
        self.bits_read += num_bits as usize;

        bits
    }

    /// The number of magnitude and sign bits read so far.
    pub(super) fn bits_read(&self) -> usize {
        self.bits_read
    }
}

/// The adaptive run-length decoder of the MEL stream (7.3.3).
#[derive(Debug)]
pub(super) struct MelDecoder<'a> {
    data: &'a [u8],
    start: usize,
    pos: usize,
    bits: u32,
    tmp: u8,
    k: usize,
    run: u32,
    one: bool,
}

impl<'a> MelDecoder<'a> {
    /// Create a decoder that starts reading at `start` and may read up to the
    /// end of `data`.
    pub(super) fn new(data: &'a [u8], start: usize) -> Self {
        Self {
            data,
            start,
            pos: start,
            bits: 0,
            tmp: 0,
            k: 0,
            run: 0,
            one: false,
        }
    }

    fn read_bit(&mut self) -> u32 {
        if self.bits == 0 {
            self.bits = if self.tmp == 0xFF { 7 } else { 8 };

            if self.pos < self.data.len() {
                self.tmp = self.data[self.pos];
                self.pos += 1;
            } else {
                self.tmp = 0xFF;
            }
        }

        self.bits -= 1;

        ((self.tmp >> self.bits) & 1) as u32
    }

    /// Decode the next MEL symbol. A zero symbol signals that the current
    /// quad (or pair of residuals) is insignificant.
    pub(super) fn decode(&mut self) -> u32 {
        if self.run == 0 && !self.one {
            let exponent = MEL_EXPONENTS[self.k];

            if self.read_bit() == 1 {
                self.run = 1 << exponent;
                self.k = (self.k + 1).min(12);
            } else {
                self.run = 0;

                for _ in 0..exponent {
                    self.run = (self.run << 1) | self.read_bit();
                }

                self.k = self.k.saturating_sub(1);
                self.one = true;
            }
        }

        if self.run > 0 {
            self.run -= 1;
            0
        } else {
            self.one = false;
            1
        }
    }

    /// The number of bytes fetched from the segment, without the 0xFF
    /// padding past its end.
    pub(super) fn bytes_read(&self) -> usize {
        self.pos - self.start
    }
}

/// Reads the SigProp bits of the refinement segment forwards, LSB first.
#[derive(Debug)]
pub(super) struct SigPropReader<'a> {
    data: &'a [u8],
    pos: usize,
    bits: u32,
    tmp: u8,
    last: u8,
}

impl<'a> SigPropReader<'a> {
    pub(super) fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            bits: 0,
            tmp: 0,
            last: 0,
        }
    }

    pub(super) fn read_bit(&mut self) -> u32 {
        if self.bits == 0 {
            self.bits = if self.last == 0xFF { 7 } else { 8 };
            self.tmp = self.data.get(self.pos).copied().unwrap_or(0);

            if self.pos < self.data.len() {
                self.pos += 1;
            }

            self.last = self.tmp;
        }

        let bit = self.tmp & 1;
        self.tmp >>= 1;
        self.bits -= 1;

        bit as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_runs() {
        // With k = 0..2 every 1 bit is a run of a single zero symbol, at
        // k = 3 a 1 bit is a run of two.
        let data = [0b1111_0000];
        let mut mel = MelDecoder::new(&data, 0);

        let symbols = (0..5).map(|_| mel.decode()).collect::<Vec<_>>();
        assert_eq!(symbols, [0, 0, 0, 0, 0]);
        assert_eq!(mel.k, 4);
    }

    #[test]
    fn mel_terminated_run() {
        // A 0 bit at k = 3 is followed by one bit of run length.
        let data = [0b1110_1000];
        let mut mel = MelDecoder::new(&data, 0);

        let symbols = (0..6).map(|_| mel.decode()).collect::<Vec<_>>();
        // Three runs of one, then a run of one terminated by a one. Back at
        // k = 2, a 0 bit is an empty run terminated by a one.
        assert_eq!(symbols, [0, 0, 0, 0, 1, 1]);
        assert_eq!(mel.k, 1);
    }

    #[test]
    fn mag_sgn_skips_stuffing() {
        let data = [0xFF, 0x7F, 0x01];
        let mut reader = MagSgnReader::new(&data);

        assert_eq!(reader.read_bits(8), 0xFF);
        // Only seven bits of the byte following 0xFF are used.
        assert_eq!(reader.read_bits(7), 0x7F);
        assert_eq!(reader.read_bits(8), 0x01);
        // Padding.
        assert_eq!(reader.read_bits(4), 0xF);
    }

    #[test]
    fn backward_reader_order() {
        // The bytes are consumed from the end, each one LSB first.
        let data = [0x21, 0x43, 0x65, 0x87, 0x00];
        let mut reader = BackwardReader::new(&data);

        assert_eq!(reader.read_bits(8), 0x87);
        assert_eq!(reader.read_bits(8), 0x65);
        assert_eq!(reader.read_bits(16), 0x2143);
    }

    #[test]
    fn u_residuals() {
        // Prefix codeword `1` (LSB first) has the value 1.
        let data = [0x01, 0x00];
        let mut reader = BackwardReader::new(&data);
        assert_eq!(reader.read_u(), 1);

        // Prefix codeword `001` has the value 3 and a one bit suffix.
        let data = [0b0000_1100, 0x00];
        let mut reader = BackwardReader::new(&data);
        assert_eq!(reader.read_u(), 4);
    }

    #[test]
    fn sig_prop_bits() {
        let data = [0b0000_0101];
        let mut reader = SigPropReader::new(&data);

        let bits = (0..4).map(|_| reader.read_bit()).collect::<Vec<_>>();
        assert_eq!(bits, [1, 0, 1, 0]);
    }
}
