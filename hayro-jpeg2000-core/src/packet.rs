//! Reading of packet headers and bodies, as specified in Annex B.10.
//!
//! A packet carries the contributions of all code-blocks of one precinct of
//! a resolution level to one quality layer. The header is read here and the
//! body is split up into the codeword segments of the individual
//! code-blocks, which are appended to them.

use crate::coding_style::CodeBlockStyle;
use crate::component::{CodingSegment, ResolutionLevel};
use crate::error::{DecodingError, Result, ValidationError, bail};
use crate::quantization::MAX_BITPLANE_COUNT;
use crate::reader::BitReader;

/// The maximum number of coding passes of a code-block.
pub const MAX_CODING_PASSES: u32 = 1 + 3 * (MAX_BITPLANE_COUNT as u32 - 1);

/// The parsed header of a single packet.
#[derive(Debug, Clone, Default)]
pub struct PacketHeader {
    /// The number of bytes occupied by the header.
    pub header_length: usize,
    contributions: Vec<Contribution>,
}

#[derive(Debug, Clone, Copy)]
struct Contribution {
    band: usize,
    code_block: usize,
    segment: CodingSegment,
}

impl PacketHeader {
    /// Whether the packet doesn't contain any code-block data.
    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    /// The number of bytes in the packet body.
    pub fn body_length(&self) -> usize {
        self.contributions
            .iter()
            .map(|c| c.segment.length as usize)
            .sum()
    }
}

/// Return the index of the codeword segment that the given coding pass
/// belongs to.
///
/// Passes with the same index are decoded with a single decoder instance,
/// continuing across layers.
pub fn codeword_segment(style: &CodeBlockStyle, pass_idx: u32) -> u32 {
    if style.high_throughput {
        // Each HT set consists of a cleanup segment followed by a
        // refinement segment holding the SigProp and MagRef passes.
        (pass_idx / 3) * 2 + u32::from(pass_idx % 3 != 0)
    } else if style.termination_on_each_pass {
        pass_idx
    } else if style.selective_arithmetic_coding_bypass {
        // See Table D.9. After the first ten passes, the significance
        // propagation and magnitude refinement passes of a bitplane form a
        // raw segment and each cleanup pass forms an MQ segment.
        if pass_idx < 10 {
            0
        } else {
            1 + 2 * ((pass_idx - 10) / 3) + u32::from((pass_idx - 10) % 3 == 2)
        }
    } else {
        0
    }
}

impl ResolutionLevel {
    /// Read the header of the packet for the given precinct and layer.
    pub fn read_packet_header(
        &mut self,
        precinct: u32,
        layer: u32,
        style: &CodeBlockStyle,
        data: &[u8],
    ) -> Result<PacketHeader> {
        let Some(precinct_count) = self.num_precincts_x.checked_mul(self.num_precincts_y) else {
            bail!(ValidationError::InvalidPrecinctSize);
        };

        if precinct >= precinct_count {
            bail!(DecodingError::InvalidSegmentLength);
        }

        let mut reader = BitReader::new(data);
        let mut header = PacketHeader::default();

        // B.10.3: A leading zero bit signals an empty packet.
        let non_empty = reader.read_bits_with_stuffing(1) == Some(1);

        if non_empty {
            for (band_idx, band) in self.bands.iter_mut().enumerate() {
                let precinct = &mut band.precincts[precinct as usize];

                for (cb_idx, code_block) in precinct.code_blocks.iter_mut().enumerate() {
                    // B.10.4 Code-block inclusion
                    let included = if code_block.included {
                        read_bits(&mut reader, 1)? == 1
                    } else {
                        precinct.inclusion_tree.decode(
                            code_block.x_idx,
                            code_block.y_idx,
                            &mut reader,
                            layer + 1,
                        )? <= layer
                    };

                    ltrace!("code-block {cb_idx} inclusion: {included}");

                    if !included {
                        continue;
                    }

                    // B.10.5 Zero bit-plane information
                    if !code_block.included {
                        let zero_bitplanes = precinct.zero_bitplane_tree.decode(
                            code_block.x_idx,
                            code_block.y_idx,
                            &mut reader,
                            u32::MAX,
                        )?;

                        if zero_bitplanes > MAX_BITPLANE_COUNT as u32 {
                            bail!(DecodingError::InvalidBitplaneCount);
                        }

                        code_block.zero_bitplanes = zero_bitplanes as u8;
                        code_block.included = true;
                    }

                    // B.10.6 Number of coding passes
                    let added_passes = read_coding_passes(&mut reader)?;
                    // B.10.7.1 Lblock
                    code_block.lblock += read_lblock_increment(&mut reader)?;

                    let previous_passes = code_block.num_passes;
                    let cumulative_passes = previous_passes + added_passes;

                    if cumulative_passes > MAX_CODING_PASSES {
                        bail!(DecodingError::TooManyCodingPasses);
                    }

                    let lblock = code_block.lblock;
                    let mut push = |passes: u32| -> Result<()> {
                        // B.10.7.1: bits = Lblock + floor(log2(passes)).
                        let length_bits = lblock + passes.ilog2();

                        if length_bits > 32 {
                            bail!(DecodingError::InvalidSegmentLength);
                        }

                        let length = read_bits(&mut reader, length_bits as u8)?;

                        ltrace!("length of {passes} passes: {length}");

                        header.contributions.try_reserve(1)?;
                        header.contributions.push(Contribution {
                            band: band_idx,
                            code_block: cb_idx,
                            segment: CodingSegment {
                                num_passes: passes,
                                length,
                            },
                        });

                        Ok(())
                    };

                    let mut last_segment = codeword_segment(style, previous_passes);
                    let mut passes_in_segment = 0;

                    for pass in previous_passes..cumulative_passes {
                        let segment = codeword_segment(style, pass);

                        if segment != last_segment {
                            push(passes_in_segment)?;
                            last_segment = segment;
                            passes_in_segment = 1;
                        } else {
                            passes_in_segment += 1;
                        }
                    }

                    if passes_in_segment > 0 {
                        push(passes_in_segment)?;
                    }

                    code_block.num_passes = cumulative_passes;
                }
            }
        }

        reader.align();
        header.header_length = reader.byte_pos().min(data.len());

        Ok(header)
    }

    /// Distribute the body of a packet to its code-blocks, returning the
    /// number of consumed bytes.
    pub fn read_packet_body(
        &mut self,
        precinct: u32,
        header: &PacketHeader,
        body: &[u8],
    ) -> Result<usize> {
        let mut offset = 0_usize;

        for contribution in &header.contributions {
            let length = contribution.segment.length as usize;

            let Some(data) = body.get(offset..offset + length) else {
                bail!(DecodingError::InvalidSegmentLength);
            };

            let Some(code_block) = self
                .bands
                .get_mut(contribution.band)
                .and_then(|b| b.precincts.get_mut(precinct as usize))
                .and_then(|p| p.code_blocks.get_mut(contribution.code_block))
            else {
                bail!(DecodingError::InvalidSegmentLength);
            };

            code_block.append_data(contribution.segment.num_passes, data)?;
            offset += length;
        }

        Ok(offset)
    }
}

fn read_bits(reader: &mut BitReader<'_>, bits: u8) -> Result<u32> {
    match reader.read_bits_with_stuffing(bits) {
        Some(value) => Ok(value),
        None => bail!(DecodingError::UnexpectedEof),
    }
}

/// Read the number of added coding passes (Table B.4).
fn read_coding_passes(reader: &mut BitReader<'_>) -> Result<u32> {
    let passes = if reader.peek_bits_with_stuffing(9) == Some(0x1ff) {
        read_bits(reader, 9)?;
        read_bits(reader, 7)? + 37
    } else if reader.peek_bits_with_stuffing(4) == Some(0x0f) {
        read_bits(reader, 4)?;
        read_bits(reader, 5)? + 6
    } else if reader.peek_bits_with_stuffing(4) == Some(0b1110) {
        read_bits(reader, 4)?;
        5
    } else if reader.peek_bits_with_stuffing(4) == Some(0b1101) {
        read_bits(reader, 4)?;
        4
    } else if reader.peek_bits_with_stuffing(4) == Some(0b1100) {
        read_bits(reader, 4)?;
        3
    } else if reader.peek_bits_with_stuffing(2) == Some(0b10) {
        read_bits(reader, 2)?;
        2
    } else if reader.peek_bits_with_stuffing(1) == Some(0) {
        read_bits(reader, 1)?;
        1
    } else {
        bail!(DecodingError::UnexpectedEof);
    };

    ltrace!("number of coding passes: {passes}");

    Ok(passes)
}

/// Read the `k` ones followed by a zero that increment `Lblock`.
fn read_lblock_increment(reader: &mut BitReader<'_>) -> Result<u32> {
    let mut k = 0;

    while read_bits(reader, 1)? == 1 {
        k += 1;

        if k > 32 {
            bail!(DecodingError::InvalidSegmentLength);
        }
    }

    Ok(k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coding_style::{CodingStyle, QuantStyle, QuantizationStyle, StepSize};
    use crate::component::Component;
    use crate::error::DecodeError;
    use crate::rect::IntRect;
    use crate::reader::pack_bits;

    fn component() -> Component {
        let coding = CodingStyle {
            num_decomposition_levels: 0,
            code_block_width: 2,
            code_block_height: 2,
            ..CodingStyle::default()
        };
        let quant = QuantStyle {
            quantization_style: QuantizationStyle::NoQuantization,
            guard_bits: 2,
            step_sizes: vec![StepSize {
                mantissa: 0,
                exponent: 8,
            }],
        };

        Component::new(IntRect::from_ltrb(0, 0, 8, 8), &coding, &quant, 8, (1, 1)).unwrap()
    }

    #[test]
    fn segment_indices() {
        let bypass = CodeBlockStyle::from_u8(0x01);
        let segments = (0..16)
            .map(|p| codeword_segment(&bypass, p))
            .collect::<Vec<_>>();
        assert_eq!(segments, [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 2, 3, 3, 4]);

        let terminate = CodeBlockStyle::from_u8(0x04);
        assert_eq!(codeword_segment(&terminate, 7), 7);

        let ht = CodeBlockStyle::from_u8(0x40);
        let segments = (0..6).map(|p| codeword_segment(&ht, p)).collect::<Vec<_>>();
        assert_eq!(segments, [0, 1, 1, 2, 3, 3]);

        assert_eq!(codeword_segment(&CodeBlockStyle::default(), 40), 0);
    }

    #[test]
    fn coding_pass_codewords() {
        let buf = pack_bits(&[
            0, // 1
            1, 0, // 2
            1, 1, 0, 0, // 3
            1, 1, 1, 1, 0, 0, 0, 1, 0, // 6 + 2
            1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 1, 1, // 37 + 3
        ]);
        let mut reader = BitReader::new(&buf);

        let passes = (0..5)
            .map(|_| read_coding_passes(&mut reader).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(passes, [1, 2, 3, 8, 40]);
    }

    #[test]
    fn two_layers() {
        let mut component = component();
        let style = component.code_block_style;
        let level = &mut component.resolution_levels[0];
        assert_eq!(level.bands[0].precincts[0].code_blocks.len(), 4);

        let header_bits = pack_bits(&[
            1, // non-empty
            1, 1, // code-block 0: included
            0, 0, 1, 1, // two zero bitplanes
            1, 1, 0, 0, // three passes
            0, // Lblock unchanged
            0, 1, 0, 1, // five bytes
            0, // code-block 1: not included
            0, // code-block 2: not included
            1, // code-block 3: included
            1, // two zero bitplanes
            0, // one pass
            1, 0, // Lblock + 1
            0, 0, 1, 0, // two bytes
        ]);

        let header = level
            .read_packet_header(0, 0, &style, &header_bits)
            .unwrap();
        assert_eq!(header.header_length, 4);
        assert_eq!(header.body_length(), 7);

        let body = [1, 2, 3, 4, 5, 6, 7];
        assert_eq!(level.read_packet_body(0, &header, &body).unwrap(), 7);

        let blocks = &level.bands[0].precincts[0].code_blocks;
        assert_eq!(blocks[0].data(), &[1, 2, 3, 4, 5]);
        assert_eq!(blocks[0].num_passes, 3);
        assert_eq!(blocks[0].zero_bitplanes, 2);
        assert!(!blocks[1].included);
        assert_eq!(blocks[3].data(), &[6, 7]);
        assert_eq!(blocks[3].zero_bitplanes, 2);
        assert_eq!(blocks[3].lblock, 4);

        // An empty packet for the second layer.
        let header = level.read_packet_header(0, 1, &style, &[0x00]).unwrap();
        assert!(header.is_empty());
        assert_eq!(header.header_length, 1);
    }

    #[test]
    fn truncated_body() {
        let mut component = component();
        let style = component.code_block_style;
        let level = &mut component.resolution_levels[0];

        // Code-block 0 contributes four bytes in a single pass.
        let header_bits = pack_bits(&[1, 1, 1, 1, 1, 0, 0, 1, 0, 0, 0, 0, 0]);
        let header = level
            .read_packet_header(0, 0, &style, &header_bits)
            .unwrap();

        assert!(level.read_packet_body(0, &header, &[1, 2]).is_err());
    }

    #[test]
    fn reset_restores_inclusion_state() {
        let mut component = component();
        let style = component.code_block_style;

        let header_bits = pack_bits(&[1, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 0, 0]);
        let level = &mut component.resolution_levels[0];
        let first = level
            .read_packet_header(0, 0, &style, &header_bits)
            .unwrap();
        level.read_packet_body(0, &first, &[9, 9]).unwrap();

        component.reset();

        let level = &mut component.resolution_levels[0];
        let second = level
            .read_packet_header(0, 0, &style, &header_bits)
            .unwrap();
        assert_eq!(first.body_length(), 2);
        assert_eq!(second.body_length(), 2);
        assert_eq!(level.bands[0].precincts[0].code_blocks[0].data(), &[] as &[u8]);
    }

    #[test]
    fn precinct_grid_overflow() {
        let mut component = component();
        let style = component.code_block_style;
        let level = &mut component.resolution_levels[0];
        level.num_precincts_x = u32::MAX;
        level.num_precincts_y = 2;

        assert_eq!(
            level.read_packet_header(0, 0, &style, &[0x00]).map(|_| ()),
            Err(DecodeError::Validation(ValidationError::InvalidPrecinctSize))
        );
    }

    #[test]
    fn precinct_out_of_range() {
        let mut component = component();
        let style = component.code_block_style;
        let level = &mut component.resolution_levels[0];

        assert_eq!(
            level.read_packet_header(1, 0, &style, &[0x00]).map(|_| ()),
            Err(DecodeError::Decoding(DecodingError::InvalidSegmentLength))
        );
    }
}
