//! The MQ arithmetic coder, described in Annex C.
//!
//! A context is a single byte holding `2 * state + mps`. The probability
//! transition table from Table C.2 is expanded at compile time into three
//! lookup arrays indexed by that byte, so updating a context after a decision
//! is a single load without any branching on the switch flag.

/// Number of contexts used by the EBCOT tier-1 coder (Table D.7).
pub const NUM_CONTEXTS: usize = 19;
/// The run-length context.
pub const CTX_RL: usize = 17;
/// The uniform context.
pub const CTX_UNI: usize = 18;
/// The largest state index of Table C.2.
pub const MAX_STATE: u8 = 46;

/// A single adaptive context state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MqContext(u8);

impl MqContext {
    /// Create a context with the given state index and most probable symbol.
    ///
    /// State indices beyond the last entry of Table C.2 are clamped to it.
    pub const fn new(state: u8, mps: u8) -> Self {
        let state = if state > MAX_STATE { MAX_STATE } else { state };

        Self((state << 1) | (mps & 1))
    }

    /// The index into Table C.2.
    pub fn state(&self) -> u8 {
        self.0 >> 1
    }

    /// The current most probable symbol.
    pub fn mps(&self) -> u32 {
        (self.0 & 1) as u32
    }
}

/// The full set of contexts used while coding a single code-block.
#[derive(Clone, Debug, Default)]
pub struct MqContexts([MqContext; NUM_CONTEXTS]);

impl MqContexts {
    /// Create a context set with every state zeroed.
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// Create a context set initialized as in Table D.7.
    pub fn new() -> Self {
        let mut contexts = Self::zeroed();
        contexts.reset();

        contexts
    }

    /// Reset all contexts to their initial states from Table D.7.
    pub fn reset(&mut self) {
        self.0 = [MqContext::default(); NUM_CONTEXTS];
        self.0[CTX_UNI] = MqContext::new(MAX_STATE, 0);
        self.0[CTX_RL] = MqContext::new(3, 0);
        self.0[0] = MqContext::new(4, 0);
    }

    /// Return a mutable reference to the context with the given label, or
    /// `None` if the label is not below [`NUM_CONTEXTS`].
    pub fn get_mut(&mut self, label: usize) -> Option<&mut MqContext> {
        self.0.get_mut(label)
    }

    /// Like [`MqContexts::get_mut`], for the fixed labels of the tier-1
    /// coder.
    #[inline(always)]
    pub(crate) fn context_mut(&mut self, label: usize) -> &mut MqContext {
        &mut self.0[label]
    }
}

/// The MQ decoder.
///
/// We use the software conventions from Annex G of
/// <https://www.itu.int/rec/T-REC-T.88-201808-I>.
pub struct MqDecoder<'a> {
    /// The underlying encoded data.
    data: &'a [u8],
    /// The C-register (see Table C.1).
    c: u32,
    /// The A-register (see Table C.1).
    a: u32,
    /// The pointer to the current byte.
    base_pointer: usize,
    /// The bit shift counter.
    shift_count: u32,
}

impl<'a> MqDecoder<'a> {
    /// Create a new decoder and run the INITDEC procedure.
    pub fn new(data: &'a [u8]) -> Self {
        let mut decoder = MqDecoder {
            data,
            c: 0,
            a: 0,
            base_pointer: 0,
            shift_count: 0,
        };

        decoder.initialize();

        decoder
    }

    /// The INITDEC procedure from C.3.5.
    fn initialize(&mut self) {
        self.c = ((self.current_byte() as u32) ^ 0xff) << 16;
        self.read_byte();

        self.c <<= 7;
        self.shift_count -= 7;
        self.a = 0x8000;
    }

    /// Decode the next decision using the given context (DECODE, C.3.2).
    #[inline(always)]
    pub fn decode(&mut self, context: &mut MqContext) -> u32 {
        let idx = context.0 as usize;
        let qe = QE[idx];

        self.a -= qe;

        if (self.c >> 16) < self.a {
            if self.a & 0x8000 != 0 {
                return context.mps();
            }

            let d = self.exchange_mps(context, qe);
            self.renormalize();
            d
        } else {
            self.c -= self.a << 16;

            let d = self.exchange_lps(context, qe);
            self.renormalize();
            d
        }
    }

    /// The `MPS_EXCHANGE` procedure from C.3.2.
    #[inline(always)]
    fn exchange_mps(&mut self, context: &mut MqContext, qe: u32) -> u32 {
        let idx = context.0 as usize;
        let mps = context.mps();

        if self.a < qe {
            context.0 = NLPS[idx];
            1 - mps
        } else {
            context.0 = NMPS[idx];
            mps
        }
    }

    /// The `LPS_EXCHANGE` procedure from C.3.2.
    #[inline(always)]
    fn exchange_lps(&mut self, context: &mut MqContext, qe: u32) -> u32 {
        let idx = context.0 as usize;
        let mps = context.mps();
        let a = self.a;
        self.a = qe;

        if a < qe {
            context.0 = NMPS[idx];
            mps
        } else {
            context.0 = NLPS[idx];
            1 - mps
        }
    }

    /// The RENORMD procedure from C.3.3.
    #[inline(always)]
    fn renormalize(&mut self) {
        loop {
            if self.shift_count == 0 {
                self.read_byte();
            }

            self.a <<= 1;
            self.c <<= 1;
            self.shift_count -= 1;

            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    /// The BYTEIN procedure from C.3.4.
    #[inline(always)]
    fn read_byte(&mut self) {
        if self.current_byte() == 0xff {
            if self.next_byte() > 0x8f {
                // A marker. Keep feeding 1-bits without advancing.
                self.shift_count = 8;
            } else {
                self.base_pointer += 1;
                // The C register is modulo 2^32, bytes 0x80 to 0x8F after 0xFF
                // (only found in corrupt data) make it wrap.
                self.c = self
                    .c
                    .wrapping_add(0xfe00)
                    .wrapping_sub((self.current_byte() as u32) << 9);
                self.shift_count = 7;
            }
        } else {
            self.base_pointer += 1;
            self.c = self
                .c
                .wrapping_add(0xff00)
                .wrapping_sub((self.current_byte() as u32) << 8);
            self.shift_count = 8;
        }
    }

    #[inline(always)]
    fn current_byte(&self) -> u8 {
        // The decoder extends the data with 0xFF bytes as necessary until
        // all symbols have been decoded.
        self.data.get(self.base_pointer).copied().unwrap_or(0xff)
    }

    #[inline(always)]
    fn next_byte(&self) -> u8 {
        self.data.get(self.base_pointer + 1).copied().unwrap_or(0xff)
    }
}

/// The MQ encoder.
///
/// The output starts with a placeholder byte that absorbs carries from the
/// very first `BYTEOUT` and is dropped in [`MqEncoder::finish`].
pub struct MqEncoder {
    out: Vec<u8>,
    a: u32,
    c: u32,
    shift_count: u32,
}

impl Default for MqEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MqEncoder {
    /// Create a new encoder (INITENC, C.2.8).
    pub fn new() -> Self {
        Self {
            out: vec![0],
            a: 0x8000,
            c: 0,
            shift_count: 12,
        }
    }

    /// Encode a single decision with the given context (ENCODE, C.2.2).
    #[inline]
    pub fn encode(&mut self, context: &mut MqContext, bit: u32) {
        let idx = context.0 as usize;
        let qe = QE[idx];

        self.a -= qe;

        if context.mps() == (bit & 1) {
            if self.a & 0x8000 == 0 {
                if self.a < qe {
                    self.a = qe;
                } else {
                    self.c += qe;
                }

                context.0 = NMPS[idx];
                self.renormalize();
            } else {
                self.c += qe;
            }
        } else {
            if self.a < qe {
                self.c += qe;
            } else {
                self.a = qe;
            }

            context.0 = NLPS[idx];
            self.renormalize();
        }
    }

    /// Flush the encoder (FLUSH, C.2.9) and return the coded bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.set_bits();
        self.c <<= self.shift_count;
        self.write_byte();
        self.c <<= self.shift_count;
        self.write_byte();

        // A trailing 0xFF is implied by the decoder's padding.
        if self.out.last() == Some(&0xff) {
            self.out.pop();
        }

        self.out.remove(0);
        self.out
    }

    /// The RENORME procedure from C.2.6.
    fn renormalize(&mut self) {
        loop {
            self.a <<= 1;
            self.c <<= 1;
            self.shift_count -= 1;

            if self.shift_count == 0 {
                self.write_byte();
            }

            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    /// The BYTEOUT procedure from C.2.7.
    fn write_byte(&mut self) {
        loop {
            let last = self.out.len() - 1;

            if self.out[last] == 0xff {
                self.out.push((self.c >> 20) as u8);
                self.c &= 0xfffff;
                self.shift_count = 7;
            } else if self.c & 0x8000000 != 0 {
                // Propagate the carry into the previous byte and try again.
                self.out[last] = self.out[last].wrapping_add(1);
                self.c &= 0x7ffffff;
                continue;
            } else {
                self.out.push((self.c >> 19) as u8);
                self.c &= 0x7ffff;
                self.shift_count = 8;
            }

            break;
        }
    }

    /// The SETBITS procedure from C.2.9.
    fn set_bits(&mut self) {
        let tmp = self.c + self.a;
        self.c |= 0xffff;

        if self.c >= tmp {
            self.c -= 0x8000;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct QeData {
    qe: u32,
    nmps: u8,
    nlps: u8,
    switch: bool,
}

macro_rules! qe {
    ($($qe:expr, $nmps:expr, $nlps:expr, $switch:expr),+ $(,)?) => {
        [
            $(
                QeData {
                    qe: $qe,
                    nmps: $nmps,
                    nlps: $nlps,
                    switch: $switch,
                }
            ),+
        ]
    };
}

/// QE values and associated data from Table C.2.
#[rustfmt::skip]
const QE_TABLE: [QeData; 47] = qe!(
    0x5601, 1, 1, true,
    0x3401, 2, 6, false,
    0x1801, 3, 9, false,
    0x0AC1, 4, 12, false,
    0x0521, 5, 29, false,
    0x0221, 38, 33, false,
    0x5601, 7, 6, true,
    0x5401, 8, 14, false,
    0x4801, 9, 14, false,
    0x3801, 10, 14, false,
    0x3001, 11, 17, false,
    0x2401, 12, 18, false,
    0x1C01, 13, 20, false,
    0x1601, 29, 21, false,
    0x5601, 15, 14, true,
    0x5401, 16, 14, false,
    0x5101, 17, 15, false,
    0x4801, 18, 16, false,
    0x3801, 19, 17, false,
    0x3401, 20, 18, false,
    0x3001, 21, 19, false,
    0x2801, 22, 19, false,
    0x2401, 23, 20, false,
    0x2201, 24, 21, false,
    0x1C01, 25, 22, false,
    0x1801, 26, 23, false,
    0x1601, 27, 24, false,
    0x1401, 28, 25, false,
    0x1201, 29, 26, false,
    0x1101, 30, 27, false,
    0x0AC1, 31, 28, false,
    0x09C1, 32, 29, false,
    0x08A1, 33, 30, false,
    0x0521, 34, 31, false,
    0x0441, 35, 32, false,
    0x02A1, 36, 33, false,
    0x0221, 37, 34, false,
    0x0141, 38, 35, false,
    0x0111, 39, 36, false,
    0x0085, 40, 37, false,
    0x0049, 41, 38, false,
    0x0025, 42, 39, false,
    0x0015, 43, 40, false,
    0x0009, 44, 41, false,
    0x0005, 45, 42, false,
    0x0001, 45, 43, false,
    0x5601, 46, 46, false,
);

const NUM_STATES: usize = 2 * QE_TABLE.len();

const fn expand_qe() -> [u32; NUM_STATES] {
    let mut out = [0; NUM_STATES];
    let mut i = 0;

    while i < NUM_STATES {
        out[i] = QE_TABLE[i >> 1].qe;
        i += 1;
    }

    out
}

const fn expand_transitions(lps: bool) -> [u8; NUM_STATES] {
    let mut out = [0; NUM_STATES];
    let mut i = 0;

    while i < NUM_STATES {
        let entry = QE_TABLE[i >> 1];
        let mps = (i & 1) as u8;

        out[i] = if lps {
            2 * entry.nlps + (mps ^ entry.switch as u8)
        } else {
            2 * entry.nmps + mps
        };

        i += 1;
    }

    out
}

static QE: [u32; NUM_STATES] = expand_qe();
static NMPS: [u8; NUM_STATES] = expand_transitions(false);
static NLPS: [u8; NUM_STATES] = expand_transitions(true);

#[cfg(test)]
mod tests {
    use super::*;

    /// Test from Section H.2 of the T.88 specification.
    #[test]
    fn decode_t88_sequence() {
        let input = [
            0x84, 0xC7, 0x3B, 0xFC, 0xE1, 0xA1, 0x43, 0x04, 0x02, 0x20, 0x00, 0x00, 0x41, 0x0D,
            0xBB, 0x86, 0xF4, 0x31, 0x7F, 0xFF, 0x88, 0xFF, 0x37, 0x47, 0x1A, 0xDB, 0x6A, 0xDF,
            0xFF, 0xAC,
        ];

        let expected = [
            0x00, 0x02, 0x00, 0x51, 0x00, 0x00, 0x00, 0xC0, 0x03, 0x52, 0x87, 0x2A, 0xAA, 0xAA,
            0xAA, 0xAA, 0x82, 0xC0, 0x20, 0x00, 0xFC, 0xD7, 0x9E, 0xF6, 0xBF, 0x7F, 0xED, 0x90,
            0x4F, 0x46, 0xA3, 0xBF,
        ];

        let mut decoder = MqDecoder::new(&input);
        let mut context = MqContext::default();

        let mut decoded = vec![];

        for _ in 0..expected.len() {
            let mut byte = 0_u8;
            for _ in 0..8 {
                byte = (byte << 1) | decoder.decode(&mut context) as u8;
            }
            decoded.push(byte);
        }

        assert_eq!(decoded, expected);
    }

    #[test]
    fn transitions_follow_table() {
        // State 0 switches the MPS on an LPS.
        assert_eq!(NLPS[0], 2 + 1);
        assert_eq!(NLPS[1], 2);
        assert_eq!(NMPS[0], 2);
        assert_eq!(NMPS[1], 3);
        assert_eq!(QE[2 * 46], 0x5601);
        assert_eq!(NMPS[2 * 46], 2 * 46);
    }

    #[test]
    fn simple_round_trip() {
        let bits = [1, 0, 1, 1, 0];

        let mut contexts = MqContexts::zeroed();
        let mut encoder = MqEncoder::new();
        for bit in bits {
            encoder.encode(contexts.context_mut(0), bit);
        }
        let data = encoder.finish();

        let mut contexts = MqContexts::zeroed();
        let mut decoder = MqDecoder::new(&data);
        let decoded = (0..bits.len())
            .map(|_| decoder.decode(contexts.context_mut(0)))
            .collect::<Vec<_>>();

        assert_eq!(decoded, bits);
    }

    #[test]
    fn random_round_trip() {
        let mut state = 0x2545_f491_u32;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };

        let symbols = (0..20_000)
            .map(|_| {
                let r = next();
                let label = (r % NUM_CONTEXTS as u32) as usize;
                // Skewed distribution so that contexts actually adapt.
                let bit = u32::from((r >> 8) % 7 == 0) ^ (label as u32 & 1);
                (label, bit)
            })
            .collect::<Vec<_>>();

        let mut contexts = MqContexts::new();
        let mut encoder = MqEncoder::new();
        for &(label, bit) in &symbols {
            encoder.encode(contexts.context_mut(label), bit);
        }
        let data = encoder.finish();

        // No marker may appear in the coded data.
        for pair in data.windows(2) {
            assert!(!(pair[0] == 0xff && pair[1] > 0x8f));
        }

        let mut contexts = MqContexts::new();
        let mut decoder = MqDecoder::new(&data);
        for &(label, bit) in &symbols {
            assert_eq!(decoder.decode(contexts.context_mut(label)), bit);
        }
    }

    #[test]
    fn corrupt_byte_after_0xff() {
        // 0x80 after 0xFF is neither a marker nor a valid stuffed byte.
        let mut decoder = MqDecoder::new(&[0xff, 0x80, 0x00]);
        let mut context = MqContext::default();

        for _ in 0..64 {
            assert!(decoder.decode(&mut context) <= 1);
        }

        for second in 0x80..=0x8f {
            let data = [0x12, 0xff, second, 0xff, second, 0x00];
            let mut decoder = MqDecoder::new(&data);
            let mut contexts = MqContexts::new();

            for label in (0..NUM_CONTEXTS).cycle().take(200) {
                assert!(decoder.decode(contexts.context_mut(label)) <= 1);
            }
        }
    }

    #[test]
    fn out_of_range_state_is_clamped() {
        let mut context = MqContext::new(200, 1);
        assert_eq!(context.state(), MAX_STATE);
        assert_eq!(context.mps(), 1);

        let mut encoder = MqEncoder::new();
        encoder.encode(&mut context, 1);
        let data = encoder.finish();

        let mut context = MqContext::new(u8::MAX, 1);
        assert_eq!(MqDecoder::new(&data).decode(&mut context), 1);
    }

    #[test]
    fn context_labels_are_checked() {
        let mut contexts = MqContexts::new();

        assert!(contexts.get_mut(CTX_UNI).is_some());
        assert!(contexts.get_mut(NUM_CONTEXTS).is_none());
        assert!(contexts.get_mut(usize::MAX).is_none());
    }

    #[test]
    fn reset_contexts() {
        let mut contexts = MqContexts::new();
        *contexts.context_mut(5) = MqContext::new(20, 1);
        contexts.reset();

        assert_eq!(contexts.context_mut(5).state(), 0);
        assert_eq!(contexts.context_mut(0).state(), 4);
        assert_eq!(contexts.context_mut(CTX_RL).state(), 3);
        assert_eq!(contexts.context_mut(CTX_UNI).state(), 46);
    }
}
