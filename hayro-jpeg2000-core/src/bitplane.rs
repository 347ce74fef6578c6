//! Bitplane decoding of MQ-coded code-blocks, described in Annex D.
//!
//! Each bitplane of a code-block is coded in up to three passes, using
//! context modeling on top of the MQ coder. Decoding reverts the context
//! modeling to rebuild the magnitudes and signs of each coefficient.
//!
//! Coefficients are produced with one fractional bit, see the
//! [`quantization`](crate::quantization) module.
//!
//! Some of the references are taken from the
//! "JPEG2000 Standard for Image Compression" book instead of the specification.

use crate::coding_style::{CodeBlockStyle, SubBandType};
use crate::component::CodeBlock;
use crate::error::{DecodingError, Result, bail, try_resize};
use crate::mq::{CTX_RL, CTX_UNI, MqContext, MqContexts, MqDecoder};
use crate::packet::codeword_segment;
use crate::quantization::MAX_BITPLANE_COUNT;

/// The maximum width or height of a code-block.
pub(crate) const MAX_CODE_BLOCK_SIZE: u32 = 1024;
/// The maximum number of samples in a code-block.
pub(crate) const MAX_CODE_BLOCK_AREA: u32 = 4096;

const SIGNIFICANT: u8 = 1 << 0;
const NEGATIVE: u8 = 1 << 1;
const REFINED: u8 = 1 << 2;
const CODED: u8 = 1 << 3;

/// Decode the coding passes of the given code-block into coefficients.
///
/// The result is stored in the decode context.
pub(crate) fn decode(
    code_block: &CodeBlock,
    sub_band_type: SubBandType,
    num_bitplanes: u8,
    style: &CodeBlockStyle,
    ctx: &mut CodeBlockDecodeContext,
) -> Result<()> {
    ctx.reset(
        code_block.rect.width(),
        code_block.rect.height(),
        sub_band_type,
        style,
    )?;

    if num_bitplanes > MAX_BITPLANE_COUNT {
        bail!(DecodingError::TooManyBitplanes);
    }

    ctx.collect_segments(code_block, style)?;
    let num_passes = ctx.segments.iter().map(|s| s.passes).sum::<u32>();

    if num_passes == 0 {
        return Ok(());
    }

    if code_block.zero_bitplanes >= num_bitplanes {
        bail!(DecodingError::InvalidBitplaneCount);
    }

    // The index of the first bitplane that is coded.
    let start_bitplane = num_bitplanes - 1 - code_block.zero_bitplanes;

    // The first bitplane only has a cleanup pass, all others have three.
    if num_passes > 3 * start_bitplane as u32 + 1 {
        bail!(DecodingError::TooManyCodingPasses);
    }

    ltrace!(
        "decoding {}x{} code-block, {num_passes} passes from bitplane {start_bitplane}",
        ctx.width,
        ctx.height
    );

    let data = code_block.data();
    let mut pass_idx = 0;

    for segment_idx in 0..ctx.segments.len() {
        let segment = ctx.segments[segment_idx];
        let data = &data[segment.start..segment.end];

        // See Table D.9: after the fourth bitplane, the significance
        // propagation and magnitude refinement passes are raw coded.
        let raw = style.selective_arithmetic_coding_bypass && pass_idx >= 10 && pass_idx % 3 != 0;

        if raw {
            let mut decoder = RawDecoder::new(data);
            decode_passes(ctx, &mut decoder, pass_idx, segment.passes, start_bitplane, style)?;
        } else {
            let mut decoder = MqDecoder::new(data);
            decode_passes(ctx, &mut decoder, pass_idx, segment.passes, start_bitplane, style)?;
        }

        pass_idx += segment.passes;
    }

    Ok(())
}

fn decode_passes(
    ctx: &mut CodeBlockDecodeContext,
    decoder: &mut impl BitDecoder,
    first_pass: u32,
    num_passes: u32,
    start_bitplane: u8,
    style: &CodeBlockStyle,
) -> Result<()> {
    for coding_pass in first_pass..first_pass + num_passes {
        let bitplane = start_bitplane - ((coding_pass + 2) / 3) as u8;

        // The first bitplane only has a cleanup pass, all other bitplanes
        // are in the order SPP -> MRR -> C.
        match coding_pass % 3 {
            0 => {
                cleanup_pass(ctx, decoder, bitplane);

                if style.segmentation_symbols {
                    let mut symbol = 0;

                    for _ in 0..4 {
                        symbol = (symbol << 1) | decoder.read_bit(ctx.contexts.context_mut(CTX_UNI));
                    }

                    if symbol != 0b1010 {
                        lwarn!("encountered invalid segmentation symbol {symbol:#x}");
                        bail!(DecodingError::InvalidSegmentationSymbol);
                    }
                }

                ctx.reset_for_next_bitplane();
            }
            1 => significance_propagation_pass(ctx, decoder, bitplane),
            _ => magnitude_refinement_pass(ctx, decoder, bitplane),
        }

        if style.reset_context_probabilities {
            ctx.contexts.reset();
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct CodewordSegment {
    idx: u32,
    start: usize,
    end: usize,
    passes: u32,
}

/// Reusable state for decoding MQ-coded code-blocks.
pub(crate) struct CodeBlockDecodeContext {
    /// The decoded coefficients, in raster order.
    coefficients: Vec<i32>,
    /// The state flags of each coefficient, with a border of one sample
    /// on each side so that neighbors can be accessed without bound checks.
    states: Vec<u8>,
    /// The width of the code-block we are processing.
    width: u32,
    /// The height of the code-block we are processing.
    height: u32,
    /// Whether the vertical causal flag is enabled.
    vertically_causal: bool,
    /// The type of sub-band the current code block belongs to.
    sub_band_type: SubBandType,
    /// The arithmetic decoder contexts for each context label.
    contexts: MqContexts,
    /// The codeword segments of the current code-block.
    segments: Vec<CodewordSegment>,
}

impl Default for CodeBlockDecodeContext {
    fn default() -> Self {
        Self {
            coefficients: vec![],
            states: vec![],
            width: 0,
            height: 0,
            vertically_causal: false,
            sub_band_type: SubBandType::LowLow,
            contexts: MqContexts::new(),
            segments: vec![],
        }
    }
}

impl CodeBlockDecodeContext {
    /// Completely reset context so that it can be reused for a new code-block.
    fn reset(
        &mut self,
        width: u32,
        height: u32,
        sub_band_type: SubBandType,
        style: &CodeBlockStyle,
    ) -> Result<()> {
        if width > MAX_CODE_BLOCK_SIZE
            || height > MAX_CODE_BLOCK_SIZE
            || width * height > MAX_CODE_BLOCK_AREA
        {
            bail!(DecodingError::CodeBlockTooLarge);
        }

        try_resize(&mut self.coefficients, (width * height) as usize, 0)?;
        try_resize(&mut self.states, ((width + 2) * (height + 2)) as usize, 0)?;

        self.width = width;
        self.height = height;
        self.sub_band_type = sub_band_type;
        self.vertically_causal = style.vertically_causal_context;
        self.contexts.reset();

        Ok(())
    }

    /// The decoded coefficients of the last code-block, in raster order.
    pub(crate) fn coefficients(&self) -> &[i32] {
        &self.coefficients
    }

    /// Group the contributions of the code-block into codeword segments,
    /// each of which is decoded with a fresh decoder.
    fn collect_segments(&mut self, code_block: &CodeBlock, style: &CodeBlockStyle) -> Result<()> {
        self.segments.clear();

        let mut pass = 0;
        let mut offset = 0;

        for contribution in code_block.segments() {
            if contribution.num_passes == 0 {
                continue;
            }

            let idx = codeword_segment(style, pass);

            if codeword_segment(style, pass + contribution.num_passes - 1) != idx {
                bail!(DecodingError::InvalidSegmentLength);
            }

            let end = offset + contribution.length as usize;

            if end > code_block.data().len() {
                bail!(DecodingError::InvalidSegmentLength);
            }

            match self.segments.last_mut() {
                Some(last) if last.idx == idx => {
                    last.end = end;
                    last.passes += contribution.num_passes;
                }
                _ => {
                    self.segments.try_reserve(1)?;
                    self.segments.push(CodewordSegment {
                        idx,
                        start: offset,
                        end,
                        passes: contribution.num_passes,
                    });
                }
            }

            pass += contribution.num_passes;
            offset = end;
        }

        Ok(())
    }

    fn reset_for_next_bitplane(&mut self) {
        for state in &mut self.states {
            *state &= !CODED;
        }
    }

    #[inline(always)]
    fn state_idx(&self, pos: &Position) -> usize {
        (pos.y as usize + 1) * (self.width as usize + 2) + pos.x as usize + 1
    }

    #[inline(always)]
    fn has_state(&self, pos: &Position, flag: u8) -> bool {
        self.states[self.state_idx(pos)] & flag != 0
    }

    #[inline(always)]
    fn set_state(&mut self, pos: &Position, flag: u8) {
        let idx = self.state_idx(pos);
        self.states[idx] |= flag;
    }

    /// Mark a coefficient as significant in the given bitplane.
    #[inline(always)]
    fn set_significant(&mut self, pos: &Position, negative: bool, bitplane: u8) {
        let magnitude = 3 << bitplane;
        self.coefficients[pos.index(self.width)] = if negative { -magnitude } else { magnitude };
        self.set_state(pos, if negative { SIGNIFICANT | NEGATIVE } else { SIGNIFICANT });
    }

    /// Refine the magnitude of a significant coefficient by one bit.
    #[inline(always)]
    fn refine(&mut self, pos: &Position, bit: u32, bitplane: u8) {
        let coefficient = &mut self.coefficients[pos.index(self.width)];
        let delta = 1 << bitplane;

        let magnitude = coefficient.abs();
        let magnitude = if bit == 1 {
            magnitude + delta
        } else {
            magnitude - delta
        };

        *coefficient = if *coefficient < 0 { -magnitude } else { magnitude };
        self.set_state(pos, REFINED);
    }

    /// The significance of the neighbor at the given offset, taking the
    /// vertically causal mode into account.
    #[inline(always)]
    fn neighbor(&self, pos: &Position, dx: isize, dy: isize) -> u8 {
        if dy == 1 && self.vertically_causal && pos.y % 4 == 3 {
            return 0;
        }

        let idx = self.state_idx(pos) as isize + dy * (self.width as isize + 2) + dx;

        self.states[idx as usize]
    }

    #[inline(always)]
    fn significance(&self, pos: &Position, dx: isize, dy: isize) -> u8 {
        self.neighbor(pos, dx, dy) & SIGNIFICANT
    }

    #[inline(always)]
    fn horizontal_significance_states(&self, pos: &Position) -> u8 {
        self.significance(pos, -1, 0) + self.significance(pos, 1, 0)
    }

    #[inline(always)]
    fn vertical_significance_states(&self, pos: &Position) -> u8 {
        self.significance(pos, 0, -1) + self.significance(pos, 0, 1)
    }

    #[inline(always)]
    fn diagonal_significance_states(&self, pos: &Position) -> u8 {
        self.significance(pos, -1, -1)
            + self.significance(pos, 1, -1)
            + self.significance(pos, -1, 1)
            + self.significance(pos, 1, 1)
    }

    #[inline(always)]
    fn neighborhood_significance_states(&self, pos: &Position) -> u8 {
        self.horizontal_significance_states(pos)
            + self.vertical_significance_states(pos)
            + self.diagonal_significance_states(pos)
    }
}

/// Perform the cleanup pass, specified in D.3.4.
/// See also the flow chart in Figure 7.3 in the JPEG2000 book.
fn cleanup_pass(ctx: &mut CodeBlockDecodeContext, decoder: &mut impl BitDecoder, bitplane: u8) {
    let mut position_iterator = PositionIterator::new(ctx.width, ctx.height);

    while let Some(mut cur_pos) = position_iterator.next() {
        if ctx.has_state(&cur_pos, SIGNIFICANT | CODED) {
            continue;
        }

        let use_rl = cur_pos.y % 4 == 0
            && (ctx.height - cur_pos.y) >= 4
            && (0..4).all(|i| {
                ctx.neighborhood_significance_states(&Position::new(cur_pos.x, cur_pos.y + i))
                    == 0
            });

        let bit = if use_rl {
            // "If the four contiguous coefficients in the column being scanned are all decoded
            // in the cleanup pass and the context label for all is 0 (including context
            // coefficients from previous magnitude, significance and cleanup passes), then the
            // unique run-length context is given to the arithmetic decoder along with the bit
            // stream."
            if decoder.read_bit(ctx.contexts.context_mut(CTX_RL)) == 0 {
                // "If the symbol 0 is returned, then all four contiguous coefficients in
                // the column remain insignificant and are set to zero."
                for _ in 0..3 {
                    position_iterator.next();
                }

                continue;
            }

            // "The next two bits, returned with the UNIFORM context, denote which
            // coefficient from the top of the column down is the first to be found
            // significant."
            let mut num_zeroes = decoder.read_bit(ctx.contexts.context_mut(CTX_UNI));
            num_zeroes = (num_zeroes << 1) | decoder.read_bit(ctx.contexts.context_mut(CTX_UNI));

            for _ in 0..num_zeroes {
                if let Some(next) = position_iterator.next() {
                    cur_pos = next;
                }
            }

            1
        } else {
            let ctx_label = context_label_zero_coding(&cur_pos, ctx);
            decoder.read_bit(ctx.contexts.context_mut(ctx_label as usize))
        };

        if bit == 1 {
            decode_sign_bit(&cur_pos, ctx, decoder, bitplane);
        }
    }
}

/// Perform the significance propagation pass (Section D.3.1).
///
/// See also the flow chart in Figure 7.4 in the JPEG2000 book.
fn significance_propagation_pass(
    ctx: &mut CodeBlockDecodeContext,
    decoder: &mut impl BitDecoder,
    bitplane: u8,
) {
    for cur_pos in PositionIterator::new(ctx.width, ctx.height) {
        // "The significance propagation pass only includes bits of coefficients
        // that were insignificant (the significance state has yet to be set)
        // and have a non-zero context."
        if ctx.has_state(&cur_pos, SIGNIFICANT)
            || ctx.neighborhood_significance_states(&cur_pos) == 0
        {
            continue;
        }

        let ctx_label = context_label_zero_coding(&cur_pos, ctx);
        let bit = decoder.read_bit(ctx.contexts.context_mut(ctx_label as usize));
        ctx.set_state(&cur_pos, CODED);

        if bit == 1 {
            decode_sign_bit(&cur_pos, ctx, decoder, bitplane);
        }
    }
}

/// Perform the magnitude refinement pass, specified in Section D.3.3.
///
/// See also the flow chart in Figure 7.5 in the JPEG2000 book.
fn magnitude_refinement_pass(
    ctx: &mut CodeBlockDecodeContext,
    decoder: &mut impl BitDecoder,
    bitplane: u8,
) {
    for cur_pos in PositionIterator::new(ctx.width, ctx.height) {
        if ctx.has_state(&cur_pos, SIGNIFICANT) && !ctx.has_state(&cur_pos, CODED) {
            let ctx_label = context_label_magnitude_refinement_coding(&cur_pos, ctx);
            let bit = decoder.read_bit(ctx.contexts.context_mut(ctx_label as usize));
            ctx.refine(&cur_pos, bit, bitplane);
        }
    }
}

/// Decode a sign bit (Section D.3.2) and mark the coefficient as significant.
#[inline(always)]
fn decode_sign_bit(
    pos: &Position,
    ctx: &mut CodeBlockDecodeContext,
    decoder: &mut impl BitDecoder,
    bitplane: u8,
) {
    /// Based on Table D.2.
    #[inline(always)]
    fn context_label_sign_coding(pos: &Position, ctx: &CodeBlockDecodeContext) -> (u8, u32) {
        #[inline(always)]
        fn contribution(ctx: &CodeBlockDecodeContext, pos: &Position, dx: isize, dy: isize) -> i32 {
            let state = ctx.neighbor(pos, dx, dy);

            match (state & SIGNIFICANT != 0, state & NEGATIVE != 0) {
                (false, _) => 0,
                (true, false) => 1,
                (true, true) => -1,
            }
        }

        let h = (contribution(ctx, pos, -1, 0) + contribution(ctx, pos, 1, 0)).clamp(-1, 1);
        let v = (contribution(ctx, pos, 0, -1) + contribution(ctx, pos, 0, 1)).clamp(-1, 1);

        match (h, v) {
            (1, 1) => (13, 0),
            (1, 0) => (12, 0),
            (1, -1) => (11, 0),
            (0, 1) => (10, 0),
            (0, 0) => (9, 0),
            (0, -1) => (10, 1),
            (-1, 1) => (11, 1),
            (-1, 0) => (12, 1),
            _ => (13, 1),
        }
    }

    let sign_bit = if decoder.is_raw() {
        decoder.read_bit(ctx.contexts.context_mut(0))
    } else {
        let (ctx_label, xor_bit) = context_label_sign_coding(pos, ctx);
        decoder.read_bit(ctx.contexts.context_mut(ctx_label as usize)) ^ xor_bit
    };

    ctx.set_significant(pos, sign_bit == 1, bitplane);
}

/// Return the context label for zero coding (Section D.3.1).
#[inline(always)]
fn context_label_zero_coding(pos: &Position, ctx: &CodeBlockDecodeContext) -> u8 {
    let mut horizontal = ctx.horizontal_significance_states(pos);
    let mut vertical = ctx.vertical_significance_states(pos);
    let diagonal = ctx.diagonal_significance_states(pos);

    match ctx.sub_band_type {
        SubBandType::LowLow | SubBandType::LowHigh | SubBandType::HighLow => {
            if ctx.sub_band_type == SubBandType::HighLow {
                std::mem::swap(&mut horizontal, &mut vertical);
            }

            match (horizontal, vertical, diagonal) {
                (2, _, _) => 8,
                (1, 1.., _) => 7,
                (1, 0, 1..) => 6,
                (1, 0, 0) => 5,
                (0, 2, _) => 4,
                (0, 1, _) => 3,
                (0, 0, 2..) => 2,
                (0, 0, 1) => 1,
                _ => 0,
            }
        }
        SubBandType::HighHigh => match (horizontal + vertical, diagonal) {
            (_, 3..) => 8,
            (1.., 2) => 7,
            (0, 2) => 6,
            (2.., 1) => 5,
            (1, 1) => 4,
            (0, 1) => 3,
            (2.., 0) => 2,
            (1, 0) => 1,
            _ => 0,
        },
    }
}

/// Return the context label for magnitude refinement coding (Table D.4).
#[inline(always)]
fn context_label_magnitude_refinement_coding(pos: &Position, ctx: &CodeBlockDecodeContext) -> u8 {
    if ctx.has_state(pos, REFINED) {
        16
    } else if ctx.neighborhood_significance_states(pos) >= 1 {
        15
    } else {
        14
    }
}

#[derive(Default, Copy, Clone, Debug)]
struct Position {
    x: u32,
    y: u32,
}

impl Position {
    fn new(x: u32, y: u32) -> Position {
        Self { x, y }
    }

    fn index(&self, width: u32) -> usize {
        self.x as usize + self.y as usize * width as usize
    }
}

/// Iterates over a code-block in stripes of four rows, column by column
/// within each stripe (D.1).
struct PositionIterator {
    cur_row: u32,
    position: Position,
    width: u32,
    height: u32,
}

impl PositionIterator {
    fn new(width: u32, height: u32) -> Self {
        Self {
            cur_row: 0,
            position: Position::default(),
            width,
            height,
        }
    }
}

impl Iterator for PositionIterator {
    type Item = Position;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position.y >= self.height || self.position.y == self.cur_row + 4 {
            self.position.x += 1;
            self.position.y = self.cur_row;
        }

        if self.position.x >= self.width {
            self.position.x = 0;
            self.cur_row += 4;
            self.position.y = self.cur_row;
        }

        if self.position.y >= self.height {
            return None;
        }

        let pos = self.position;
        self.position.y += 1;

        Some(pos)
    }
}

/// A source of decisions for the coding passes.
trait BitDecoder {
    fn read_bit(&mut self, context: &mut MqContext) -> u32;

    /// Whether decisions are read without context modeling.
    fn is_raw(&self) -> bool {
        false
    }
}

impl BitDecoder for MqDecoder<'_> {
    #[inline(always)]
    fn read_bit(&mut self, context: &mut MqContext) -> u32 {
        self.decode(context)
    }
}

/// The decoder for raw segments in bypass mode (D.6).
struct RawDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    c: u32,
    ct: u32,
}

impl<'a> RawDecoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            c: 0,
            ct: 0,
        }
    }

    fn next_byte(&mut self) -> u32 {
        // Reading past the end yields 0xFF bytes.
        let byte = self.data.get(self.pos).copied().unwrap_or(0xff);
        self.pos += 1;

        byte as u32
    }
}

impl BitDecoder for RawDecoder<'_> {
    #[inline(always)]
    fn read_bit(&mut self, _: &mut MqContext) -> u32 {
        if self.ct == 0 {
            if self.c == 0xff {
                // A 0xFF byte is followed by a stuffed zero bit, unless the
                // next byte is a marker.
                if self.data.get(self.pos).copied().unwrap_or(0xff) > 0x8f {
                    self.c = 0xff;
                    self.ct = 8;
                } else {
                    self.c = self.next_byte();
                    self.ct = 7;
                }
            } else {
                self.c = self.next_byte();
                self.ct = 8;
            }
        }

        self.ct -= 1;

        (self.c >> self.ct) & 1
    }

    fn is_raw(&self) -> bool {
        true
    }
}
