//! The geometry of a tile-component: resolution levels, sub-bands, precincts
//! and code-blocks (Annex B).
//!
//! All structures are built once per tile-component and can afterwards be
//! reset for decoding the next tile with the same geometry, keeping their
//! allocations around.

use crate::coding_style::{CodeBlockStyle, CodingStyle, QuantStyle, SubBandType, WaveletKernel};
use crate::error::{Result, ValidationError, bail};
use crate::quantization::BandQuantization;
use crate::rect::{IntRect, ceil_div_pow2};
use crate::tag_tree::TagTree;

/// A tile-component with its complete partition into code-blocks.
#[derive(Debug, Clone)]
pub struct Component {
    /// The rectangle of the tile-component at full resolution, in the
    /// coordinate system of the component.
    pub rect: IntRect,
    /// The rectangle of the highest decoded resolution level. This is also
    /// the extent of the coefficient buffer.
    pub decoded_rect: IntRect,
    /// The wavelet kernel.
    pub kernel: WaveletKernel,
    /// The code-block style flags.
    pub code_block_style: CodeBlockStyle,
    /// The maximum-shift value for region of interest decoding.
    pub roi_shift: u8,
    /// The bit depth of the component samples.
    pub bit_depth: u8,
    /// The number of decomposition levels `N_L`.
    pub num_decomposition_levels: u8,
    /// The number of resolution levels that are decoded.
    pub num_decoded_resolution_levels: u8,
    /// The resolution levels, starting with the lowest resolution.
    pub resolution_levels: Vec<ResolutionLevel>,
}

/// A resolution level of a tile-component.
#[derive(Debug, Clone)]
pub struct ResolutionLevel {
    /// The resolution index `r`.
    pub resolution: u8,
    /// The rectangle of the resolution level (B-14).
    pub rect: IntRect,
    /// The precinct exponents `(PPx, PPy)`.
    pub precinct_exponents: (u8, u8),
    /// The number of precincts in horizontal direction.
    pub num_precincts_x: u32,
    /// The number of precincts in vertical direction.
    pub num_precincts_y: u32,
    /// The sub-bands, LL for the lowest resolution level or HL, LH and HH.
    pub bands: Vec<Band>,
}

/// A sub-band of a resolution level.
#[derive(Debug, Clone)]
pub struct Band {
    /// The type of the sub-band.
    pub sub_band_type: SubBandType,
    /// The rectangle of the sub-band, in sub-band coordinates (B-15).
    pub rect: IntRect,
    /// The position of the sub-band inside of the coefficient buffer of the
    /// component.
    pub offset: (u32, u32),
    /// The quantization parameters of the sub-band.
    pub quantization: BandQuantization,
    /// The base-2 logarithm of the code-block width.
    pub code_block_width: u8,
    /// The base-2 logarithm of the code-block height.
    pub code_block_height: u8,
    /// The precincts of the sub-band, in raster order.
    pub precincts: Vec<Precinct>,
}

/// The part of a precinct that lies in a single sub-band.
#[derive(Debug, Clone)]
pub struct Precinct {
    /// The rectangle of the precinct, clamped to the sub-band.
    pub rect: IntRect,
    /// The number of code-blocks in horizontal direction.
    pub code_blocks_x: u32,
    /// The number of code-blocks in vertical direction.
    pub code_blocks_y: u32,
    /// The tag tree storing the layer in which each code-block is included
    /// for the first time.
    pub inclusion_tree: TagTree,
    /// The tag tree storing the number of missing most significant
    /// bitplanes of each code-block.
    pub zero_bitplane_tree: TagTree,
    /// The code-blocks, in raster order.
    pub code_blocks: Vec<CodeBlock>,
}

/// A single codeword segment contribution of a code-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodingSegment {
    /// The number of coding passes in the contribution.
    pub num_passes: u32,
    /// The number of bytes in the contribution.
    pub length: u32,
}

/// A code-block, accumulating the coded data of all layers.
#[derive(Debug, Clone, Default)]
pub struct CodeBlock {
    /// The rectangle of the code-block, in sub-band coordinates.
    pub rect: IntRect,
    /// The horizontal index of the code-block in the precinct.
    pub x_idx: u32,
    /// The vertical index of the code-block in the precinct.
    pub y_idx: u32,
    /// Whether the code-block has been included in a packet before.
    pub included: bool,
    /// The number of missing most significant bitplanes `P`.
    pub zero_bitplanes: u8,
    /// The total number of coding passes received so far.
    pub num_passes: u32,
    /// The `Lblock` state variable (B.10.7.1).
    pub lblock: u32,
    data: Vec<u8>,
    segments: Vec<CodingSegment>,
}

impl CodeBlock {
    pub(crate) fn new(rect: IntRect, x_idx: u32, y_idx: u32) -> Self {
        Self {
            rect,
            x_idx,
            y_idx,
            lblock: 3,
            ..Self::default()
        }
    }

    /// The coded data of all received contributions.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The codeword segment contributions received so far.
    pub fn segments(&self) -> &[CodingSegment] {
        &self.segments
    }

    /// Append a contribution consisting of `num_passes` coding passes.
    ///
    /// The contribution must not cross a codeword segment boundary, see
    /// [`codeword_segment`](crate::packet::codeword_segment).
    pub fn push_segment(&mut self, num_passes: u32, data: &[u8]) -> Result<()> {
        self.append_data(num_passes, data)?;
        self.num_passes += num_passes;

        Ok(())
    }

    /// Append a contribution whose passes have already been accounted for
    /// while reading the packet header.
    pub(crate) fn append_data(&mut self, num_passes: u32, data: &[u8]) -> Result<()> {
        self.data.try_reserve(data.len())?;
        self.segments.try_reserve(1)?;

        self.data.extend_from_slice(data);
        self.segments.push(CodingSegment {
            num_passes,
            length: data.len() as u32,
        });

        Ok(())
    }

    /// Reset all decoding state, keeping the allocated buffers.
    pub fn reset(&mut self) {
        self.data.clear();
        self.segments.clear();
        self.included = false;
        self.zero_bitplanes = 0;
        self.num_passes = 0;
        self.lblock = 3;
    }

    /// Reset all decoding state and replace the data buffer with a fresh
    /// allocation of the given capacity.
    pub fn reallocate(&mut self, capacity: usize) -> Result<()> {
        self.reset();
        self.data = Vec::new();
        self.data.try_reserve(capacity)?;
        self.segments = Vec::new();

        Ok(())
    }
}

impl Component {
    /// Compute the geometry of a tile-component.
    ///
    /// `rect` is the rectangle of the tile on the reference grid and
    /// `sub_sampling` the horizontal and vertical sub-sampling factors of the
    /// component.
    pub fn new(
        rect: IntRect,
        coding: &CodingStyle,
        quant: &QuantStyle,
        bit_depth: u8,
        sub_sampling: (u8, u8),
    ) -> Result<Self> {
        coding.validate()?;

        let (dx, dy) = sub_sampling;
        if dx == 0 || dy == 0 {
            bail!(ValidationError::InvalidSubsampling);
        }

        if bit_depth == 0 || bit_depth > 31 {
            bail!(ValidationError::InvalidBitDepth);
        }

        // Equation (B-12).
        let comp_rect = rect.ceil_div(dx as u32, dy as u32);
        let num_levels = coding.num_decomposition_levels;
        let decoded_levels = coding.num_decoded_resolution_levels();

        ldebug!(
            "component rect [{},{} {}x{}], {} of {} resolution levels",
            comp_rect.x0,
            comp_rect.y0,
            comp_rect.width(),
            comp_rect.height(),
            decoded_levels,
            num_levels + 1
        );

        let mut resolution_levels = Vec::new();
        resolution_levels.try_reserve(num_levels as usize + 1)?;

        for resolution in 0..=num_levels {
            let level = build_resolution_level(
                comp_rect,
                resolution,
                &resolution_levels,
                coding,
                quant,
                bit_depth,
            )?;
            resolution_levels.push(level);
        }

        Ok(Self {
            rect: comp_rect,
            decoded_rect: resolution_levels[decoded_levels as usize - 1].rect,
            kernel: coding.transformation,
            code_block_style: coding.code_block_style,
            roi_shift: coding.roi_shift,
            bit_depth,
            num_decomposition_levels: num_levels,
            num_decoded_resolution_levels: decoded_levels,
            resolution_levels,
        })
    }

    /// Reset the tag trees and code-blocks for decoding a new tile with the
    /// same geometry.
    pub fn reset(&mut self) {
        for precinct in self
            .resolution_levels
            .iter_mut()
            .flat_map(|r| r.bands.iter_mut())
            .flat_map(|b| b.precincts.iter_mut())
        {
            precinct.inclusion_tree.reset();
            precinct.zero_bitplane_tree.reset();

            for code_block in &mut precinct.code_blocks {
                code_block.reset();
            }
        }
    }

    /// The resolution levels that are actually decoded.
    pub fn decoded_resolution_levels(&self) -> &[ResolutionLevel] {
        &self.resolution_levels[..self.num_decoded_resolution_levels as usize]
    }

    /// The number of coefficients in the coefficient buffer.
    pub fn num_coefficients(&self) -> usize {
        self.decoded_rect.area()
    }
}

fn build_resolution_level(
    comp_rect: IntRect,
    resolution: u8,
    lower_levels: &[ResolutionLevel],
    coding: &CodingStyle,
    quant: &QuantStyle,
    bit_depth: u8,
) -> Result<ResolutionLevel> {
    let num_levels = coding.num_decomposition_levels;
    // Equation (B-14).
    let rect = comp_rect.ceil_div_pow2(num_levels - resolution);
    let (ppx, ppy) = coding.precinct_exponents(resolution);

    // Equation (B-16).
    let num_precincts = |x0: u32, x1: u32, pp: u8| {
        if x1 == x0 {
            0
        } else {
            ceil_div_pow2(x1 as i64, pp) - (x0 >> pp)
        }
    };

    let num_precincts_x = num_precincts(rect.x0, rect.x1, ppx);
    let num_precincts_y = num_precincts(rect.y0, rect.y1, ppy);
    let Some(precinct_count) = num_precincts_x.checked_mul(num_precincts_y) else {
        bail!(ValidationError::InvalidPrecinctSize);
    };

    ltrace!(
        "r {resolution}: rect [{},{} {}x{}], {}x{} precincts",
        rect.x0,
        rect.y0,
        rect.width(),
        rect.height(),
        num_precincts_x,
        num_precincts_y
    );

    let sub_bands = SubBandType::for_resolution(resolution);
    let mut bands = Vec::new();
    bands.try_reserve(sub_bands.len())?;

    for &sub_band_type in sub_bands {
        let band_rect = if resolution == 0 {
            rect
        } else {
            // Equation (B-15).
            let n_b = num_levels - resolution + 1;
            let (xo, yo) = sub_band_type.high_pass();
            let shift = |value: u32, offset: bool| {
                ceil_div_pow2(value as i64 - ((offset as i64) << (n_b - 1)), n_b)
            };

            IntRect::from_ltrb(
                shift(comp_rect.x0, xo),
                shift(comp_rect.y0, yo),
                shift(comp_rect.x1, xo),
                shift(comp_rect.y1, yo),
            )
        };

        // The high-pass bands follow the low-pass coefficients of the
        // next lower resolution level in the coefficient buffer.
        let offset = match lower_levels.last() {
            Some(lower) => {
                let (xo, yo) = sub_band_type.high_pass();
                (
                    if xo { lower.rect.width() } else { 0 },
                    if yo { lower.rect.height() } else { 0 },
                )
            }
            None => (0, 0),
        };

        // In sub-bands, precincts have half the size of the resolution
        // level.
        let (band_ppx, band_ppy) = if resolution == 0 {
            (ppx, ppy)
        } else {
            (ppx - 1, ppy - 1)
        };

        let code_block_width = coding.code_block_width.min(band_ppx);
        let code_block_height = coding.code_block_height.min(band_ppy);

        let quantization =
            BandQuantization::new(coding, quant, sub_band_type, resolution, bit_depth)?;

        let mut precincts = Vec::new();
        precincts.try_reserve(precinct_count as usize)?;

        for precinct_idx in 0..precinct_count {
            let px = (rect.x0 >> ppx) + precinct_idx % num_precincts_x;
            let py = (rect.y0 >> ppy) + precinct_idx / num_precincts_x;

            let precinct_rect = grid_cell(px, py, band_ppx, band_ppy).intersect(band_rect);

            precincts.push(build_precinct(
                precinct_rect,
                code_block_width,
                code_block_height,
            )?);
        }

        bands.push(Band {
            sub_band_type,
            rect: band_rect,
            offset,
            quantization,
            code_block_width,
            code_block_height,
            precincts,
        });
    }

    Ok(ResolutionLevel {
        resolution,
        rect,
        precinct_exponents: (ppx, ppy),
        num_precincts_x,
        num_precincts_y,
        bands,
    })
}

fn build_precinct(rect: IntRect, xcb: u8, ycb: u8) -> Result<Precinct> {
    let (code_blocks_x, code_blocks_y) = if rect.is_empty() {
        (0, 0)
    } else {
        (
            ceil_div_pow2(rect.x1 as i64, xcb) - (rect.x0 >> xcb),
            ceil_div_pow2(rect.y1 as i64, ycb) - (rect.y0 >> ycb),
        )
    };

    let mut code_blocks = Vec::new();
    code_blocks.try_reserve(code_blocks_x as usize * code_blocks_y as usize)?;

    // See Figure B.9. The code-block grid is anchored at the origin.
    for y_idx in 0..code_blocks_y {
        for x_idx in 0..code_blocks_x {
            let area = grid_cell(
                (rect.x0 >> xcb) + x_idx,
                (rect.y0 >> ycb) + y_idx,
                xcb,
                ycb,
            )
            .intersect(rect);

            code_blocks.push(CodeBlock::new(area, x_idx, y_idx));
        }
    }

    Ok(Precinct {
        rect,
        code_blocks_x,
        code_blocks_y,
        inclusion_tree: TagTree::new(code_blocks_x, code_blocks_y)?,
        zero_bitplane_tree: TagTree::new(code_blocks_x, code_blocks_y)?,
        code_blocks,
    })
}

/// The cell `(x, y)` of a grid with cells of size `2^xe` x `2^ye`.
fn grid_cell(x: u32, y: u32, xe: u8, ye: u8) -> IntRect {
    let border = |idx: u64, e: u8| (idx << e).min(u32::MAX as u64) as u32;
    let (x, y) = (x as u64, y as u64);

    IntRect::from_ltrb(
        border(x, xe),
        border(y, ye),
        border(x + 1, xe),
        border(y + 1, ye),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coding_style::{QuantizationStyle, StepSize};
    use crate::error::DecodeError;

    fn quant() -> QuantStyle {
        QuantStyle {
            quantization_style: QuantizationStyle::NoQuantization,
            guard_bits: 2,
            step_sizes: vec![
                StepSize {
                    mantissa: 0,
                    exponent: 9,
                };
                16
            ],
        }
    }

    #[test]
    fn band_geometry() {
        let coding = CodingStyle {
            num_decomposition_levels: 2,
            ..CodingStyle::default()
        };
        let component = Component::new(
            IntRect::from_ltrb(0, 0, 17, 9),
            &coding,
            &quant(),
            8,
            (1, 1),
        )
        .unwrap();

        let levels = &component.resolution_levels;
        assert_eq!(levels[0].rect, IntRect::from_ltrb(0, 0, 5, 3));
        assert_eq!(levels[1].rect, IntRect::from_ltrb(0, 0, 9, 5));
        assert_eq!(levels[2].rect, IntRect::from_ltrb(0, 0, 17, 9));

        let r1 = &levels[1].bands;
        assert_eq!(r1[0].sub_band_type, SubBandType::HighLow);
        assert_eq!(r1[0].rect, IntRect::from_ltrb(0, 0, 4, 3));
        assert_eq!(r1[0].offset, (5, 0));
        assert_eq!(r1[1].rect, IntRect::from_ltrb(0, 0, 5, 2));
        assert_eq!(r1[1].offset, (0, 3));
        assert_eq!(r1[2].rect, IntRect::from_ltrb(0, 0, 4, 2));
        assert_eq!(r1[2].offset, (5, 3));

        let r2 = &levels[2].bands;
        assert_eq!(r2[0].rect, IntRect::from_ltrb(0, 0, 8, 5));
        assert_eq!(r2[0].offset, (9, 0));
        assert_eq!(r2[1].rect, IntRect::from_ltrb(0, 0, 9, 4));
        assert_eq!(r2[1].offset, (0, 5));

        assert_eq!(component.num_coefficients(), 17 * 9);
    }

    #[test]
    fn precinct_partition() {
        let coding = CodingStyle {
            num_decomposition_levels: 1,
            code_block_width: 2,
            code_block_height: 2,
            precinct_exponents: vec![(3, 3), (3, 3)],
            ..CodingStyle::default()
        };
        let component = Component::new(
            IntRect::from_ltrb(0, 0, 16, 16),
            &coding,
            &quant(),
            8,
            (1, 1),
        )
        .unwrap();

        let r0 = &component.resolution_levels[0];
        assert_eq!((r0.num_precincts_x, r0.num_precincts_y), (1, 1));
        let precinct = &r0.bands[0].precincts[0];
        assert_eq!((precinct.code_blocks_x, precinct.code_blocks_y), (2, 2));
        assert_eq!(
            precinct.code_blocks[3].rect,
            IntRect::from_ltrb(4, 4, 8, 8)
        );

        let r1 = &component.resolution_levels[1];
        assert_eq!((r1.num_precincts_x, r1.num_precincts_y), (2, 2));

        for band in &r1.bands {
            assert_eq!(band.code_block_width, 2);
            assert_eq!(band.precincts.len(), 4);
            assert_eq!(band.precincts[3].rect, IntRect::from_ltrb(4, 4, 8, 8));
            assert_eq!(band.precincts[3].code_blocks.len(), 1);
        }
    }

    #[test]
    fn offset_tile_with_sub_sampling() {
        let coding = CodingStyle {
            num_decomposition_levels: 1,
            code_block_width: 2,
            code_block_height: 2,
            ..CodingStyle::default()
        };
        let component = Component::new(
            IntRect::from_ltrb(3, 5, 19, 12),
            &coding,
            &quant(),
            8,
            (2, 1),
        )
        .unwrap();

        assert_eq!(component.rect, IntRect::from_ltrb(2, 5, 10, 12));

        // Code-blocks are aligned to the grid anchored at the origin.
        let ll = &component.resolution_levels[0].bands[0];
        assert_eq!(ll.rect, IntRect::from_ltrb(1, 3, 5, 6));
        let blocks = &ll.precincts[0].code_blocks;
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].rect, IntRect::from_ltrb(1, 3, 4, 4));
        assert_eq!(blocks[3].rect, IntRect::from_ltrb(4, 4, 5, 6));
    }

    #[test]
    fn reduced_resolution() {
        let coding = CodingStyle {
            num_decomposition_levels: 2,
            reduction_factor: 1,
            ..CodingStyle::default()
        };
        let component =
            Component::new(IntRect::from_ltrb(0, 0, 17, 9), &coding, &quant(), 8, (1, 1))
                .unwrap();

        assert_eq!(component.decoded_resolution_levels().len(), 2);
        assert_eq!(component.decoded_rect, IntRect::from_ltrb(0, 0, 9, 5));
        // All levels are still built to be able to parse their packets.
        assert_eq!(component.resolution_levels.len(), 3);
    }

    #[test]
    fn invalid_parameters() {
        let coding = CodingStyle::default();
        let rect = IntRect::from_ltrb(0, 0, 8, 8);

        assert_eq!(
            Component::new(rect, &coding, &quant(), 8, (0, 1)).unwrap_err(),
            ValidationError::InvalidSubsampling.into()
        );
        assert_eq!(
            Component::new(rect, &coding, &quant(), 0, (1, 1)).unwrap_err(),
            ValidationError::InvalidBitDepth.into()
        );
    }

    #[test]
    fn code_block_reset_keeps_capacity() {
        let mut block = CodeBlock::new(IntRect::from_ltrb(0, 0, 4, 4), 0, 0);
        block.push_segment(3, &[1, 2, 3]).unwrap();
        block.lblock = 5;
        block.included = true;

        let capacity = block.data.capacity();
        block.reset();

        assert_eq!(block.num_passes, 0);
        assert_eq!(block.lblock, 3);
        assert!(!block.included);
        assert!(block.segments().is_empty());
        assert_eq!(block.data.capacity(), capacity);

        block.reallocate(64).unwrap();
        assert!(block.data.capacity() >= 64);
    }

    #[test]
    fn precinct_grid_overflow() {
        let coding = CodingStyle {
            num_decomposition_levels: 0,
            precinct_exponents: vec![(0, 0)],
            ..CodingStyle::default()
        };
        let result = Component::new(
            IntRect::from_ltrb(0, 0, 1 << 20, 1 << 20),
            &coding,
            &quant(),
            8,
            (1, 1),
        );

        assert_eq!(
            result.map(|_| ()),
            Err(DecodeError::Validation(ValidationError::InvalidPrecinctSize))
        );
    }
}
