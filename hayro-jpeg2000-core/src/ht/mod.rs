//! Decoding of HTJ2K code-blocks, described in Rec. ITU-T T.814.
//!
//! An HT code-block carries at most one HT set that is decoded: a cleanup
//! segment that codes all magnitude bits down to one bitplane, followed by
//! an optional refinement segment holding the SigProp and MagRef passes for
//! the next lower bitplane. Earlier (placeholder) passes carry no data.
//!
//! While decoding, samples are kept in sign-magnitude form with the most
//! significant magnitude bit of the sub-band in bit 30. They are converted
//! to coefficients with one fractional bit at the end, see the
//! [`quantization`](crate::quantization) module.

mod cursor;
mod tables;

use crate::bitplane::{MAX_CODE_BLOCK_AREA, MAX_CODE_BLOCK_SIZE};
use crate::coding_style::CodeBlockStyle;
use crate::component::CodeBlock;
use crate::error::{DecodingError, Result, bail, try_resize};
use crate::quantization::MAX_BITPLANE_COUNT;
use cursor::{BackwardReader, MagSgnReader, MelDecoder, SigPropReader};
use tables::{VLC_TABLE_0, VLC_TABLE_1};

const SIGMA: u8 = 1 << 0;
const REF: u8 = 1 << 3;
const SCAN: u8 = 1 << 4;

const SIGN_BIT: u32 = 1 << 31;

/// The maximum length of the suffix of a cleanup segment (MEL and VLC
/// bytes).
const MAX_SUFFIX_LENGTH: usize = 4079;

/// Decode the HT set of the given code-block into coefficients.
///
/// The result is stored in the decode context.
pub(crate) fn decode(
    code_block: &CodeBlock,
    num_bitplanes: u8,
    style: &CodeBlockStyle,
    ctx: &mut HtDecodeContext,
) -> Result<()> {
    ctx.reset(code_block.rect.width(), code_block.rect.height(), style)?;

    if num_bitplanes > MAX_BITPLANE_COUNT {
        bail!(DecodingError::TooManyBitplanes);
    }

    let num_passes = code_block.segments().iter().map(|s| s.num_passes).sum::<u32>();

    if num_passes == 0 || ctx.width == 0 || ctx.height == 0 {
        return Ok(());
    }

    // All complete HT sets except for the last one are placeholders.
    let placeholder_passes = match num_passes % 3 {
        0 => num_passes - 3,
        rem => num_passes - rem,
    };
    let num_ht_passes = num_passes - placeholder_passes;

    ctx.collect_segments(code_block, placeholder_passes)?;

    // The number of skipped magnitude bitplanes.
    let skipped = placeholder_passes / 3 + code_block.zero_bitplanes as u32;

    if skipped >= num_bitplanes as u32 {
        bail!(DecodingError::InvalidBitplaneCount);
    }

    // The refinement passes code the bitplane below the cleanup bitplane.
    if num_ht_passes > 1 && skipped + 1 >= num_bitplanes as u32 {
        bail!(DecodingError::TooManyCodingPasses);
    }

    let lsb = 30 - skipped;

    ltrace!(
        "decoding {}x{} HT code-block, {num_ht_passes} passes from bitplane {}",
        ctx.width,
        ctx.height,
        num_bitplanes as u32 - 1 - skipped
    );

    ctx.decode_cleanup(skipped + 1, lsb)?;

    if num_ht_passes > 1 {
        ctx.decode_sig_prop(lsb - 1);
    }

    if num_ht_passes > 2 {
        ctx.decode_mag_ref(lsb - 1);
    }

    let shift = 30 - num_bitplanes as u32;

    for (coefficient, &sample) in ctx.coefficients.iter_mut().zip(&ctx.samples) {
        let magnitude = ((sample & !SIGN_BIT) >> shift) as i32;
        *coefficient = if sample & SIGN_BIT != 0 {
            -magnitude
        } else {
            magnitude
        };
    }

    Ok(())
}

/// The significance pattern and exponent information of a quad, as decoded
/// from the MEL and VLC streams.
#[derive(Debug, Default, Clone, Copy)]
struct Quad {
    significance: u8,
    residual_offset: bool,
    emb_k: u8,
    emb_1: u8,
}

/// Reusable state for decoding HT code-blocks.
#[derive(Debug, Default)]
pub(crate) struct HtDecodeContext {
    /// The decoded coefficients, in raster order.
    coefficients: Vec<i32>,
    /// The samples in sign-magnitude form, in raster order.
    samples: Vec<u32>,
    /// The state flags of each sample, with a border of one sample on each
    /// side.
    states: Vec<u8>,
    /// The significance of each sample, four per quad.
    sigma: Vec<u8>,
    /// The exponent of each sample, four per quad.
    exponents: Vec<u8>,
    /// The magnitudes of each sample, four per quad.
    mu: Vec<u32>,
    /// A copy of the cleanup segment.
    cleanup: Vec<u8>,
    /// A copy of the refinement segment with a trailing 0xFF.
    refinement: Vec<u8>,
    width: u32,
    height: u32,
    vertically_causal: bool,
    /// The number of MagSgn bits read by the last cleanup pass.
    mag_sgn_bits: usize,
    /// The number of MEL bytes read by the last cleanup pass.
    mel_bytes: usize,
}

impl HtDecodeContext {
    fn reset(&mut self, width: u32, height: u32, style: &CodeBlockStyle) -> Result<()> {
        if width > MAX_CODE_BLOCK_SIZE
            || height > MAX_CODE_BLOCK_SIZE
            || width * height > MAX_CODE_BLOCK_AREA
        {
            bail!(DecodingError::CodeBlockTooLarge);
        }

        let num_samples = (width * height) as usize;
        let num_quads = (width.div_ceil(2) * height.div_ceil(2)) as usize;

        try_resize(&mut self.coefficients, num_samples, 0)?;
        try_resize(&mut self.samples, num_samples, 0)?;
        try_resize(&mut self.states, ((width + 2) * (height + 2)) as usize, 0)?;
        try_resize(&mut self.sigma, 4 * num_quads, 0)?;
        try_resize(&mut self.exponents, 4 * num_quads, 0)?;
        try_resize(&mut self.mu, 4 * num_quads, 0)?;
        self.cleanup.clear();
        self.refinement.clear();
        self.mag_sgn_bits = 0;
        self.mel_bytes = 0;

        self.width = width;
        self.height = height;
        self.vertically_causal = style.vertically_causal_context;

        Ok(())
    }

    /// The decoded coefficients of the last code-block, in raster order.
    pub(crate) fn coefficients(&self) -> &[i32] {
        &self.coefficients
    }

    /// Split the data of the code-block into the cleanup and refinement
    /// segment of the last HT set.
    fn collect_segments(&mut self, code_block: &CodeBlock, cleanup_pass: u32) -> Result<()> {
        let data = code_block.data();
        let mut pass = 0;
        let mut offset = 0;

        for contribution in code_block.segments() {
            let end = offset + contribution.length as usize;

            let Some(bytes) = data.get(offset..end) else {
                bail!(DecodingError::InvalidSegmentLength);
            };

            let next_pass = pass + contribution.num_passes;

            if next_pass <= cleanup_pass {
                // Placeholder passes and superseded HT sets.
            } else if pass <= cleanup_pass {
                if next_pass > cleanup_pass + 1 {
                    bail!(DecodingError::InvalidSegmentLength);
                }

                self.cleanup.try_reserve(bytes.len())?;
                self.cleanup.extend_from_slice(bytes);
            } else {
                self.refinement.try_reserve(bytes.len())?;
                self.refinement.extend_from_slice(bytes);
            }

            pass = next_pass;
            offset = end;
        }

        self.refinement.try_reserve(1)?;
        self.refinement.push(0xFF);

        Ok(())
    }

    /// Decode the cleanup segment (7.3).
    ///
    /// `max_exponent` bounds the number of magnitude bits of each sample and
    /// `lsb` is the bit position of the cleanup bitplane.
    fn decode_cleanup(&mut self, max_exponent: u32, lsb: u32) -> Result<()> {
        let length = self.cleanup.len();

        if length < 2 {
            bail!(DecodingError::InvalidSegmentLength);
        }

        let suffix_length =
            ((self.cleanup[length - 1] as usize) << 4) + (self.cleanup[length - 2] & 0x0F) as usize;

        if suffix_length < 2 || suffix_length > length || suffix_length > MAX_SUFFIX_LENGTH {
            lwarn!("invalid HT cleanup suffix length {suffix_length}");
            bail!(DecodingError::InvalidSuffixLength);
        }

        let prefix_length = length - suffix_length;

        // The bytes holding the suffix length are read as if they were all
        // ones.
        self.cleanup[length - 1] = 0xFF;
        self.cleanup[length - 2] |= 0x0F;

        let cleanup = &self.cleanup[..];
        let mut mag_sgn = MagSgnReader::new(&cleanup[..prefix_length]);
        let mut mel = MelDecoder::new(cleanup, prefix_length);
        let mut vlc = BackwardReader::new_vlc(&cleanup[prefix_length..]);

        let quads_x = self.width.div_ceil(2) as usize;
        let quads_y = self.height.div_ceil(2) as usize;

        let sigma = &mut self.sigma[..];
        let exponents = &mut self.exponents[..];
        let mu = &mut self.mu[..];

        let mut first_row_context = 0;

        for row in 0..quads_y {
            let first_row = row == 0;
            let table = if first_row { &VLC_TABLE_0 } else { &VLC_TABLE_1 };
            let mut qx = 0;

            while qx < quads_x {
                let q1 = row * quads_x + qx;
                let paired = qx + 1 < quads_x;

                let context = if first_row {
                    first_row_context
                } else {
                    row_context(sigma, q1, qx, quads_x)
                };
                let quad1 = decode_quad(&mut mel, &mut vlc, table, context);
                store_significance(sigma, q1, quad1.significance);

                if first_row {
                    first_row_context = first_row_context_of(sigma, q1);
                }

                let mut quad2 = Quad::default();

                if paired {
                    let context = if first_row {
                        first_row_context
                    } else {
                        row_context(sigma, q1 + 1, qx + 1, quads_x)
                    };
                    quad2 = decode_quad(&mut mel, &mut vlc, table, context);
                    store_significance(sigma, q1 + 1, quad2.significance);

                    if first_row {
                        first_row_context = first_row_context_of(sigma, q1 + 1);
                    }
                }

                vlc.refill();

                let (u1, u2) = if paired {
                    decode_u_pair(&mut mel, &mut vlc, first_row, &quad1, &quad2)
                } else if quad1.residual_offset {
                    (vlc.read_u(), 0)
                } else {
                    (0, 0)
                };

                let kappa1 = kappa(exponents, first_row, q1, qx, quads_x, &quad1);
                let exponent1 = kappa1 + u1;

                let exponent2 = if paired {
                    kappa(exponents, first_row, q1 + 1, qx + 1, quads_x, &quad2) + u2
                } else {
                    0
                };

                if exponent1 > max_exponent || exponent2 > max_exponent {
                    lwarn!("HT exponent bound {} exceeds {max_exponent}", exponent1.max(exponent2));
                    bail!(DecodingError::ExponentBoundExceeded);
                }

                recover_magnitudes(&mut mag_sgn, sigma, exponents, mu, q1, &quad1, exponent1, lsb);

                if paired {
                    recover_magnitudes(
                        &mut mag_sgn,
                        sigma,
                        exponents,
                        mu,
                        q1 + 1,
                        &quad2,
                        exponent2,
                        lsb,
                    );
                }

                qx += if paired { 2 } else { 1 };
            }
        }

        self.mag_sgn_bits = mag_sgn.bits_read();
        self.mel_bytes = mel.bytes_read();
        ltrace!(
            "cleanup read {} MagSgn bits, {} MEL bytes",
            self.mag_sgn_bits,
            self.mel_bytes
        );

        self.quads_to_raster(quads_x);

        Ok(())
    }

    /// Copy the quad-ordered magnitudes and significances into raster order.
    fn quads_to_raster(&mut self, quads_x: usize) {
        let width = self.width as usize;
        let height = self.height as usize;

        for (q, (sigma, mu)) in self
            .sigma
            .chunks_exact(4)
            .zip(self.mu.chunks_exact(4))
            .enumerate()
        {
            let x0 = 2 * (q % quads_x);
            let y0 = 2 * (q / quads_x);

            // The samples of a quad are in column-major order.
            for (i, (dx, dy)) in [(0, 0), (0, 1), (1, 0), (1, 1)].into_iter().enumerate() {
                let (x, y) = (x0 + dx, y0 + dy);

                if x >= width || y >= height {
                    continue;
                }

                self.samples[y * width + x] = mu[i];

                if sigma[i] != 0 {
                    self.states[(y + 1) * (width + 2) + x + 1] |= SIGMA;
                }
            }
        }
    }

    #[inline(always)]
    fn state_idx(&self, x: usize, y: usize) -> usize {
        (y + 1) * (self.width as usize + 2) + x + 1
    }

    /// Whether any sample in the neighborhood of `(x, y)` is significant,
    /// either from the cleanup pass or from the current SigProp pass.
    fn has_significant_neighbor(&self, x: usize, y: usize, include_below: bool) -> bool {
        let stride = self.width as usize + 2;
        let center = self.state_idx(x, y);
        let above = center - stride;
        let below = center + stride;

        let significant = |idx: usize| self.states[idx] & (SIGMA | REF) != 0;

        significant(above - 1)
            || significant(above)
            || significant(above + 1)
            || significant(center - 1)
            || significant(center + 1)
            || (include_below
                && (significant(below - 1) || significant(below) || significant(below + 1)))
    }

    /// Decode the significance propagation pass of the refinement segment
    /// (7.4). `lsb` is the bit position of the refined bitplane.
    fn decode_sig_prop(&mut self, lsb: u32) {
        let refinement = std::mem::take(&mut self.refinement);
        let mut reader = SigPropReader::new(&refinement[..refinement.len() - 1]);

        let width = self.width as usize;
        let height = self.height as usize;

        for y0 in (0..height).step_by(4) {
            let stripe_end = (y0 + 4).min(height);

            for x0 in (0..width).step_by(4) {
                let block_end = (x0 + 4).min(width);

                for x in x0..block_end {
                    for y in y0..stripe_end {
                        let idx = self.state_idx(x, y);
                        let mut state = self.states[idx];

                        if state & SIGMA == 0 {
                            let include_below = !self.vertically_causal || y != stripe_end - 1;

                            if self.has_significant_neighbor(x, y, include_below) {
                                let bit = reader.read_bit();

                                if bit == 1 {
                                    state |= REF;
                                    self.samples[y * width + x] |= (1 << lsb) | (1 << (lsb - 1));
                                }
                            }
                        }

                        self.states[idx] = state | SCAN;
                    }
                }

                // The signs of the newly significant samples of the block.
                for x in x0..block_end {
                    for y in y0..stripe_end {
                        if self.states[self.state_idx(x, y)] & REF != 0 {
                            self.samples[y * width + x] |= reader.read_bit() << 31;
                        }
                    }
                }
            }
        }

        self.refinement = refinement;
    }

    /// Decode the magnitude refinement pass of the refinement segment
    /// (7.5). `lsb` is the bit position of the refined bitplane.
    fn decode_mag_ref(&mut self, lsb: u32) {
        let mut reader = BackwardReader::new(&self.refinement);

        let width = self.width as usize;
        let height = self.height as usize;

        for y0 in (0..height).step_by(4) {
            let stripe_end = (y0 + 4).min(height);

            for x in 0..width {
                for y in y0..stripe_end {
                    if self.states[self.state_idx(x, y)] & SIGMA != 0 {
                        let bit = reader.read_bits(1);
                        let sample = &mut self.samples[y * width + x];

                        *sample &= (0xFFFF_FFFE | bit) << lsb;
                        *sample |= 1 << (lsb - 1);
                    }
                }
            }
        }
    }
}

/// Decode the significance pattern of a quad, reading a MEL symbol first
/// for quads in an all-insignificant neighborhood (7.3.5).
fn decode_quad(
    mel: &mut MelDecoder<'_>,
    vlc: &mut BackwardReader<'_>,
    table: &[u16; 1024],
    context: usize,
) -> Quad {
    if context == 0 && mel.decode() == 0 {
        return Quad::default();
    }

    vlc.refill();

    let value = table[(context << 7) | vlc.peek_bits(7) as usize];
    vlc.drop_bits(((value & 0x0F) >> 1) as u32);

    Quad {
        significance: ((value >> 4) & 0x0F) as u8,
        residual_offset: value & 1 != 0,
        emb_k: ((value >> 8) & 0x0F) as u8,
        emb_1: ((value >> 12) & 0x0F) as u8,
    }
}

/// Decode the unsigned residuals of a pair of quads (7.3.6).
fn decode_u_pair(
    mel: &mut MelDecoder<'_>,
    vlc: &mut BackwardReader<'_>,
    first_row: bool,
    quad1: &Quad,
    quad2: &Quad,
) -> (u32, u32) {
    match (quad1.residual_offset, quad2.residual_offset) {
        (true, true) if first_row && mel.decode() == 0 => {
            let prefix1 = vlc.read_u_prefix();

            if prefix1 > 2 {
                let u2 = vlc.read_bits(1) + 1;
                let suffix1 = vlc.read_u_suffix(prefix1);
                let extension1 = vlc.read_u_extension(suffix1);

                (prefix1 + suffix1 + 4 * extension1, u2)
            } else {
                let prefix2 = vlc.read_u_prefix();
                let suffix1 = vlc.read_u_suffix(prefix1);
                let suffix2 = vlc.read_u_suffix(prefix2);
                let extension1 = vlc.read_u_extension(suffix1);
                let extension2 = vlc.read_u_extension(suffix2);

                (
                    prefix1 + suffix1 + 4 * extension1,
                    prefix2 + suffix2 + 4 * extension2,
                )
            }
        }
        (true, true) => {
            let prefix1 = vlc.read_u_prefix();
            let prefix2 = vlc.read_u_prefix();
            let suffix1 = vlc.read_u_suffix(prefix1);
            let suffix2 = vlc.read_u_suffix(prefix2);
            let extension1 = vlc.read_u_extension(suffix1);
            let extension2 = vlc.read_u_extension(suffix2);

            // In the first row, a one MEL symbol signals that both
            // residuals are larger than two.
            let offset = if first_row { 2 } else { 0 };

            (
                offset + prefix1 + suffix1 + 4 * extension1,
                offset + prefix2 + suffix2 + 4 * extension2,
            )
        }
        (true, false) => (vlc.read_u(), 0),
        (false, true) => (0, vlc.read_u()),
        (false, false) => (0, 0),
    }
}

/// Compute the exponent predictor of a quad (7.3.7).
fn kappa(
    exponents: &[u8],
    first_row: bool,
    q: usize,
    qx: usize,
    quads_x: usize,
    quad: &Quad,
) -> u32 {
    if first_row || matches!(quad.significance, 0 | 1 | 2 | 4 | 8) {
        return 1;
    }

    let above = 4 * (q - quads_x);
    let mut max_exponent = exponents[above + 1].max(exponents[above + 3]);

    if qx > 0 {
        max_exponent = max_exponent.max(exponents[above - 1]);
    }

    if qx + 1 < quads_x {
        max_exponent = max_exponent.max(exponents[above + 5]);
    }

    (max_exponent as u32).saturating_sub(1).max(1)
}

fn store_significance(sigma: &mut [u8], q: usize, pattern: u8) {
    for i in 0..4 {
        sigma[4 * q + i] = (pattern >> i) & 1;
    }
}

/// The context of the quad following `q` in the first row.
fn first_row_context_of(sigma: &[u8], q: usize) -> usize {
    let s = &sigma[4 * q..4 * q + 4];
    ((s[0] | s[1]) + (s[2] << 1) + (s[3] << 2)) as usize
}

/// The context of quad `q` in all rows but the first, formed from its
/// neighbors in the previous row and the quad to its left.
fn row_context(sigma: &[u8], q: usize, qx: usize, quads_x: usize) -> usize {
    let above = 4 * (q - quads_x);
    let mut context = sigma[above + 1] as usize + ((sigma[above + 3] as usize) << 2);

    if qx > 0 {
        context |= sigma[above - 1] as usize;
        context += ((sigma[4 * q - 1] | sigma[4 * q - 2]) as usize) << 1;
    }

    if qx + 1 < quads_x {
        context |= (sigma[above + 5] as usize) << 2;
    }

    context
}

/// Read the magnitude and sign bits of the significant samples of a quad
/// (7.3.8).
fn recover_magnitudes(
    mag_sgn: &mut MagSgnReader<'_>,
    sigma: &[u8],
    exponents: &mut [u8],
    mu: &mut [u32],
    q: usize,
    quad: &Quad,
    exponent: u32,
    lsb: u32,
) {
    for i in 0..4 {
        let n = 4 * q + i;

        if sigma[n] == 0 {
            continue;
        }

        // The number of magnitude and sign bits that are not implied by the
        // exponent bound.
        let num_bits = exponent.saturating_sub(((quad.emb_k >> i) & 1) as u32);
        let known_1 = ((quad.emb_1 >> i) & 1) as u32;
        let value = mag_sgn.read_bits(num_bits) + (known_1 << num_bits);

        exponents[n] = (32 - (value | 1).leading_zeros()) as u8;

        let magnitude = ((((value >> 1) as u64) + 1) << lsb) as u32 & !SIGN_BIT;
        mu[n] = magnitude | (1 << (lsb - 1)) | ((value & 1) << 31);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rect::IntRect;

    fn code_block(width: u32, height: u32, segments: &[(u32, &[u8])]) -> CodeBlock {
        let mut block = CodeBlock::new(IntRect::from_xywh(0, 0, width, height), 0, 0);

        for (passes, data) in segments {
            block.push_segment(*passes, data).unwrap();
        }

        block
    }

    fn decode_block(block: &CodeBlock, num_bitplanes: u8) -> Result<Vec<i32>> {
        let mut ctx = HtDecodeContext::default();
        decode(block, num_bitplanes, &CodeBlockStyle::default(), &mut ctx)?;

        Ok(ctx.coefficients().to_vec())
    }

    #[test]
    fn insignificant_block() {
        // A suffix of two bytes, the MEL stream signals four empty quads.
        let block = code_block(4, 4, &[(1, &[0xF2, 0x00])]);
        assert_eq!(decode_block(&block, 8).unwrap(), vec![0; 16]);

        // The four zero symbols take four bits of the first MEL byte, no
        // magnitude or sign bit is read.
        let mut ctx = HtDecodeContext::default();
        decode(&block, 8, &CodeBlockStyle::default(), &mut ctx).unwrap();
        assert_eq!(ctx.mag_sgn_bits, 0);
        assert_eq!(ctx.mel_bytes, 1);
    }

    #[test]
    fn single_significant_sample() {
        // One MagSgn byte, then a MEL zero bit and the VLC codeword 000 for
        // context 0, which marks the second sample of the quad significant.
        let block = code_block(2, 2, &[(1, &[0x01, 0x02, 0x00])]);

        // Magnitude one at the cleanup bitplane, negative.
        assert_eq!(decode_block(&block, 1).unwrap(), [0, 0, -3, 0]);
        assert_eq!(decode_block(&block, 3).unwrap(), [0, 0, -12, 0]);
    }

    #[test]
    fn refinement_passes() {
        let cleanup: &[u8] = &[0x01, 0x02, 0x00];

        // No newly significant samples and a zero refinement bit.
        let block = code_block(2, 2, &[(1, cleanup), (2, &[0x00])]);
        assert_eq!(decode_block(&block, 3).unwrap(), [0, 0, -10, 0]);

        // The first sample becomes significant with a positive sign, the
        // refinement bit of the cleanup sample is one.
        let block = code_block(2, 2, &[(1, cleanup), (2, &[0x01])]);
        assert_eq!(decode_block(&block, 3).unwrap(), [6, 0, -14, 0]);
    }

    #[test]
    fn placeholder_passes_skip_bitplanes() {
        // Three placeholder passes move the cleanup bitplane down by one.
        let block = code_block(2, 2, &[(3, &[]), (1, &[0x01, 0x02, 0x00])]);
        assert_eq!(decode_block(&block, 3).unwrap(), [0, 0, -6, 0]);
    }

    #[test]
    fn exponent_bound() {
        // The VLC codeword 000101 sets a residual offset for the quad.
        let block = code_block(2, 2, &[(1, &[0x01, 0x52, 0x00])]);
        assert_eq!(
            decode_block(&block, 1),
            Err(DecodingError::ExponentBoundExceeded.into())
        );
    }

    #[test]
    fn invalid_suffix_length() {
        // The suffix length of 0x10 exceeds the segment length.
        let block = code_block(2, 2, &[(1, &[0x00, 0x01])]);
        assert_eq!(
            decode_block(&block, 4),
            Err(DecodingError::InvalidSuffixLength.into())
        );

        let block = code_block(2, 2, &[(1, &[0x00, 0x01, 0x00])]);
        assert_eq!(
            decode_block(&block, 4),
            Err(DecodingError::InvalidSuffixLength.into())
        );
    }

    #[test]
    fn short_cleanup_segment() {
        let block = code_block(2, 2, &[(1, &[0x02])]);
        assert_eq!(
            decode_block(&block, 4),
            Err(DecodingError::InvalidSegmentLength.into())
        );
    }

    #[test]
    fn oversized_block() {
        let block = code_block(128, 64, &[]);
        assert_eq!(
            decode_block(&block, 4),
            Err(DecodingError::CodeBlockTooLarge.into())
        );
    }

    #[test]
    fn refinement_below_last_bitplane() {
        let block = code_block(2, 2, &[(1, &[0x01, 0x02, 0x00]), (1, &[0x00])]);
        assert_eq!(
            decode_block(&block, 1),
            Err(DecodingError::TooManyCodingPasses.into())
        );
    }

    #[test]
    fn block_8x8() {
        // Significant quad pairs in all rows, MEL runs spanning rows and
        // refinement passes over two stripes.
        let cleanup: &[u8] = &[
            0xB5, 0x64, 0x7C, 0x35, 0xE4, 0xE2, 0x61, 0x7A, 0x17, 0xF8, 0xCD, 0x95,
            0xA5, 0x71, 0xCB, 0xE9, 0x68, 0x34, 0xDC, 0x2C, 0x57, 0xEF, 0xF7, 0x7D,
            0xB7, 0x14, 0x20, 0x42, 0xDF, 0x01, 0x5D, 0x77, 0x9C, 0xDD, 0x0B, 0x2A,
            0x29, 0xB8, 0x46, 0xE0, 0x2D, 0xAF, 0xBB, 0xAB, 0xED, 0x17, 0x1F, 0xD6,
            0xEB, 0x60, 0x79, 0x7B, 0x2E, 0x8E, 0x50, 0x74, 0x62, 0x32, 0xCE, 0x00,
            0x68, 0xE9, 0xED, 0x3D, 0x5D, 0xBC, 0x17, 0x62, 0xDE, 0x25, 0xB0, 0x72,
            0x7F, 0x61, 0xDD, 0x0A, 0x93, 0x1B, 0xB1, 0x7D, 0x4D, 0xDB, 0x21, 0x30,
            0x2A, 0x95, 0x38, 0x01,
        ];
        let refinement: &[u8] = &[
            0xE8, 0xCD, 0x4A, 0x97, 0xE1, 0x36, 0xD7, 0x3E, 0x71, 0xD7, 0xD4, 0x7F,
            0x4F, 0x09, 0x20, 0xC4,
        ];

        let decode_passes = |segments: &[(u32, &[u8])]| {
            let mut block = code_block(8, 8, segments);
            block.zero_bitplanes = 12;
            decode_block(&block, 20).unwrap()
        };

        let cleanup_only = [
            0, -896, 0, -896, -384, -640, -2176, -4480,
            0, 0, 0, -640, -1408, 896, -2944, -3456,
            0, 0, 0, 0, 0, 0, 0, 1920,
            0, 0, 0, 0, 0, 0, -896, -640,
            0, 0, 0, 0, 896, -384, -1152, 0,
            0, 0, 0, 0, 0, -896, 0, 0,
            0, 0, 0, 384, 0, 0, 0, 0,
            0, 0, -384, -384, -384, 0, 0, 0,
        ];
        assert_eq!(decode_passes(&[(1, cleanup)]), cleanup_only);

        let with_sig_prop = [
            0, -896, 192, -896, -384, -640, -2176, -4480,
            0, 0, 0, -640, -1408, 896, -2944, -3456,
            0, 0, -192, 192, -192, 0, 0, 1920,
            0, 0, -192, 192, 192, 192, -896, -640,
            0, -192, 192, 0, 896, -384, -1152, 0,
            0, 0, 0, 0, 0, -896, 0, -192,
            0, -192, 192, 384, 192, -192, -192, 192,
            0, 192, -384, -384, -384, -192, 192, 0,
        ];
        assert_eq!(decode_passes(&[(1, cleanup), (1, refinement)]), with_sig_prop);

        let with_mag_ref = [
            0, -832, 192, -832, -320, -576, -2240, -4416,
            0, 0, 0, -704, -1344, 960, -2880, -3392,
            0, 0, -192, 192, -192, 0, 0, 1856,
            0, 0, -192, 192, 192, 192, -832, -704,
            0, -192, 192, 0, 832, -448, -1088, 0,
            0, 0, 0, 0, 0, -832, 0, -192,
            0, -192, 192, 320, 192, -192, -192, 192,
            0, 192, -320, -448, -320, -192, 192, 0,
        ];
        assert_eq!(decode_passes(&[(1, cleanup), (2, refinement)]), with_mag_ref);
    }

    #[test]
    fn large_first_row_residuals() {
        // The first residual prefix of the pair exceeds two, so the second
        // residual is coded with a single bit.
        let mut block = code_block(
            4,
            2,
            &[(
                1,
                &[
                    0x85, 0x64, 0x5A, 0x51, 0x44, 0xA2, 0x37, 0xDA, 0xD7, 0xCA, 0x95, 0x4B,
                    0x73, 0x26, 0xAF, 0x02, 0x96, 0x00,
                ],
            )],
        );
        block.zero_bitplanes = 12;

        assert_eq!(
            decode_block(&block, 20).unwrap(),
            [-896, 2944, 1152, -384, 1408, 1152, 640, -384]
        );
    }
}
