//! Reconstruction of tile-component samples from the coded data of their
//! code-blocks.
//!
//! Each code-block is decoded with either the MQ-based tier-1 decoder or the
//! HT block decoder, dequantized into the coefficient buffer of the
//! component and finally run through the inverse wavelet transform.

use crate::bitplane::{self, CodeBlockDecodeContext};
use crate::coding_style::WaveletKernel;
use crate::component::{Band, CodeBlock, Component};
use crate::dwt::DwtContext;
use crate::error::{DecodeError, Result, try_resize};
use crate::ht::{self, HtDecodeContext};
use crate::quantization::{apply_roi_shift, dequantize_float, dequantize_int};

/// Settings that control how tile-components are decoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeSettings {
    /// Whether a malformed code-block aborts decoding of the whole
    /// component. Otherwise, its coefficients are set to zero and decoding
    /// continues.
    pub strict: bool,
    /// Whether to add `2^(bit_depth - 1)` to the reconstructed samples and
    /// clamp them to the range of the component, as required for unsigned
    /// components (G.1.2).
    pub level_shift: bool,
}

/// The location of a code-block that couldn't be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBlockFailure {
    /// The resolution level of the code-block.
    pub resolution: u8,
    /// The index of the sub-band within the resolution level.
    pub band: usize,
    /// The index of the precinct within the sub-band.
    pub precinct: usize,
    /// The index of the code-block within the precinct.
    pub code_block: usize,
    /// The reason for the failure.
    pub error: DecodeError,
}

/// The reconstructed samples of a tile-component, covering the rectangle
/// of the highest decoded resolution level in raster order.
#[derive(Debug, Clone, Copy)]
pub enum ComponentSamples<'a> {
    /// Samples produced by one of the integer kernels.
    Int(&'a [i32]),
    /// Samples produced by the floating point 9-7 kernel.
    Float(&'a [f32]),
}

/// A reusable decoder for tile-components.
///
/// All scratch buffers are kept between calls, so decoding many tiles with
/// the same decoder avoids repeated allocations.
#[derive(Default)]
pub struct ComponentDecoder {
    settings: DecodeSettings,
    mq_context: CodeBlockDecodeContext,
    ht_context: HtDecodeContext,
    block: Vec<i32>,
    int_coefficients: Vec<i32>,
    float_coefficients: Vec<f32>,
    failures: Vec<CodeBlockFailure>,
}

impl ComponentDecoder {
    /// Create a new decoder with the given settings.
    pub fn new(settings: DecodeSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// The code-blocks that failed to decode during the last call to
    /// [`decode`](Self::decode).
    pub fn failures(&self) -> &[CodeBlockFailure] {
        &self.failures
    }

    /// Decode all code-blocks of the component and reconstruct its samples.
    pub fn decode(&mut self, component: &Component) -> Result<ComponentSamples<'_>> {
        self.failures.clear();

        let num_coefficients = component.num_coefficients();
        let float = component.kernel == WaveletKernel::Irreversible97;

        if float {
            try_resize(&mut self.float_coefficients, num_coefficients, 0.0)?;
        } else {
            try_resize(&mut self.int_coefficients, num_coefficients, 0)?;
        }

        let stride = component.decoded_rect.width() as usize;

        for level in component.decoded_resolution_levels() {
            for (band_idx, band) in level.bands.iter().enumerate() {
                for (precinct_idx, precinct) in band.precincts.iter().enumerate() {
                    for (code_block_idx, code_block) in precinct.code_blocks.iter().enumerate() {
                        if code_block.num_passes == 0 {
                            continue;
                        }

                        if let Err(error) = self.decode_code_block(component, band, code_block) {
                            if self.settings.strict {
                                return Err(error);
                            }

                            lwarn!(
                                "failed to decode code-block {} of precinct {} in resolution {}: {}",
                                code_block_idx,
                                precinct_idx,
                                level.resolution,
                                error
                            );

                            self.failures.push(CodeBlockFailure {
                                resolution: level.resolution,
                                band: band_idx,
                                precinct: precinct_idx,
                                code_block: code_block_idx,
                                error,
                            });

                            continue;
                        }

                        self.store_code_block(component, band, code_block, stride, float);
                    }
                }
            }
        }

        let num_levels = component.num_decoded_resolution_levels - 1;
        let mut dwt = DwtContext::new(component.decoded_rect, num_levels, component.kernel)?;

        if float {
            dwt.inverse_float(&mut self.float_coefficients)?;
        } else {
            dwt.inverse(&mut self.int_coefficients)?;
        }

        if self.settings.level_shift {
            self.apply_level_shift(component.bit_depth, float);
        }

        Ok(if float {
            ComponentSamples::Float(&self.float_coefficients)
        } else {
            ComponentSamples::Int(&self.int_coefficients)
        })
    }

    /// Run the tier-1 decoder on a code-block, leaving its coefficients in
    /// `self.block`.
    fn decode_code_block(
        &mut self,
        component: &Component,
        band: &Band,
        code_block: &CodeBlock,
    ) -> Result<()> {
        let style = &component.code_block_style;
        // With a region of interest, the coefficients of the region are
        // coded with additional most significant bitplanes (H.1).
        let num_bitplanes = band
            .quantization
            .num_bitplanes
            .saturating_add(component.roi_shift);

        let coefficients = if style.high_throughput {
            ht::decode(code_block, num_bitplanes, style, &mut self.ht_context)?;
            self.ht_context.coefficients()
        } else {
            bitplane::decode(
                code_block,
                band.sub_band_type,
                num_bitplanes,
                style,
                &mut self.mq_context,
            )?;
            self.mq_context.coefficients()
        };

        self.block.clear();
        self.block.try_reserve(coefficients.len())?;
        self.block.extend_from_slice(coefficients);

        apply_roi_shift(&mut self.block, component.roi_shift);

        Ok(())
    }

    /// Dequantize the coefficients of the last decoded code-block into the
    /// coefficient buffer.
    fn store_code_block(
        &mut self,
        component: &Component,
        band: &Band,
        code_block: &CodeBlock,
        stride: usize,
        float: bool,
    ) {
        let width = code_block.rect.width() as usize;

        if width == 0 {
            return;
        }

        let x = (band.offset.0 + code_block.rect.x0 - band.rect.x0) as usize;
        let y = (band.offset.1 + code_block.rect.y0 - band.rect.y0) as usize;

        for (row_idx, row) in self.block.chunks_exact(width).enumerate() {
            let start = (y + row_idx) * stride + x;

            if float {
                let Some(out) = self.float_coefficients.get_mut(start..start + width) else {
                    return;
                };
                dequantize_float(&band.quantization, row, out);
            } else {
                let Some(out) = self.int_coefficients.get_mut(start..start + width) else {
                    return;
                };
                dequantize_int(component.kernel, &band.quantization, row, out);
            }
        }
    }

    fn apply_level_shift(&mut self, bit_depth: u8, float: bool) {
        let offset = 1_i64 << (bit_depth - 1);
        let max = (1_i64 << bit_depth) - 1;

        if float {
            for sample in &mut self.float_coefficients {
                *sample = (*sample + offset as f32).round().clamp(0.0, max as f32);
            }
        } else {
            for sample in &mut self.int_coefficients {
                *sample = (*sample as i64 + offset).clamp(0, max) as i32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coding_style::{CodingStyle, QuantStyle, QuantizationStyle, StepSize};
    use crate::error::DecodingError;
    use crate::rect::IntRect;

    fn reversible_quant(exponent: u16, num_steps: usize) -> QuantStyle {
        QuantStyle {
            quantization_style: QuantizationStyle::NoQuantization,
            guard_bits: 2,
            step_sizes: vec![
                StepSize {
                    exponent,
                    mantissa: 0,
                };
                num_steps
            ],
        }
    }

    fn ht_coding(num_decomposition_levels: u8) -> CodingStyle {
        let mut coding = CodingStyle {
            num_decomposition_levels,
            ..CodingStyle::default()
        };
        coding.code_block_style.high_throughput = true;
        coding
    }

    fn first_code_block(component: &mut Component) -> &mut CodeBlock {
        &mut component.resolution_levels[0].bands[0].precincts[0].code_blocks[0]
    }

    #[test]
    fn empty_component() {
        let component = Component::new(
            IntRect::from_xywh(0, 0, 9, 5),
            &CodingStyle::default(),
            &reversible_quant(9, 16),
            8,
            (1, 1),
        )
        .unwrap();

        let mut decoder = ComponentDecoder::new(DecodeSettings {
            level_shift: true,
            ..DecodeSettings::default()
        });

        let ComponentSamples::Int(samples) = decoder.decode(&component).unwrap() else {
            panic!("expected integer samples");
        };
        assert_eq!(samples, [128; 45]);
    }

    #[test]
    fn single_ht_code_block() {
        // M_b = 2 + 2 - 1 = 3.
        let mut component = Component::new(
            IntRect::from_xywh(0, 0, 2, 2),
            &ht_coding(0),
            &reversible_quant(2, 1),
            8,
            (1, 1),
        )
        .unwrap();
        first_code_block(&mut component)
            .push_segment(1, &[0x01, 0x02, 0x00])
            .unwrap();

        let mut decoder = ComponentDecoder::default();
        let ComponentSamples::Int(samples) = decoder.decode(&component).unwrap() else {
            panic!("expected integer samples");
        };
        assert_eq!(samples, [0, 0, -6, 0]);
        assert!(decoder.failures().is_empty());
    }

    fn roi_component(segments: &[(u32, &[u8])]) -> Component {
        let mut coding = ht_coding(0);
        coding.roi_shift = 3;

        // M_b = 1 + 1 - 1 = 1, decoded with four bitplanes.
        let mut component = Component::new(
            IntRect::from_xywh(0, 0, 2, 2),
            &coding,
            &QuantStyle {
                guard_bits: 1,
                ..reversible_quant(1, 1)
            },
            8,
            (1, 1),
        )
        .unwrap();

        for (passes, data) in segments {
            first_code_block(&mut component)
                .push_segment(*passes, data)
                .unwrap();
        }

        component
    }

    #[test]
    fn roi_shift() {
        let mut decoder = ComponentDecoder::default();

        // Significant in the most significant bitplane, so the sample
        // belongs to the region of interest and is scaled down.
        let component = roi_component(&[(1, &[0x01, 0x02, 0x00])]);
        let ComponentSamples::Int(samples) = decoder.decode(&component).unwrap() else {
            panic!("expected integer samples");
        };
        assert_eq!(samples, [0, 0, -1, 0]);

        // One bitplane lower, the sample is part of the background.
        let component = roi_component(&[(3, &[]), (1, &[0x01, 0x02, 0x00])]);
        let ComponentSamples::Int(samples) = decoder.decode(&component).unwrap() else {
            panic!("expected integer samples");
        };
        assert_eq!(samples, [0, 0, -6, 0]);
    }

    #[test]
    fn malformed_code_block_is_zeroed() {
        let mut component = Component::new(
            IntRect::from_xywh(0, 0, 2, 2),
            &ht_coding(0),
            &reversible_quant(2, 1),
            8,
            (1, 1),
        )
        .unwrap();
        // The cleanup segment is too short to hold its suffix length.
        first_code_block(&mut component)
            .push_segment(1, &[0x02])
            .unwrap();

        let mut decoder = ComponentDecoder::default();
        let ComponentSamples::Int(samples) = decoder.decode(&component).unwrap() else {
            panic!("expected integer samples");
        };
        assert_eq!(samples, [0; 4]);
        assert_eq!(
            decoder.failures(),
            [CodeBlockFailure {
                resolution: 0,
                band: 0,
                precinct: 0,
                code_block: 0,
                error: DecodingError::InvalidSegmentLength.into(),
            }]
        );

        let mut decoder = ComponentDecoder::new(DecodeSettings {
            strict: true,
            ..DecodeSettings::default()
        });
        assert_eq!(
            decoder.decode(&component).err(),
            Some(DecodingError::InvalidSegmentLength.into())
        );
    }

    #[test]
    fn irreversible_component() {
        let coding = CodingStyle {
            num_decomposition_levels: 2,
            transformation: WaveletKernel::Irreversible97,
            ..CodingStyle::default()
        };
        let quant = QuantStyle {
            quantization_style: QuantizationStyle::ScalarDerived,
            guard_bits: 2,
            step_sizes: vec![StepSize {
                exponent: 10,
                mantissa: 0,
            }],
        };

        let component =
            Component::new(IntRect::from_xywh(3, 1, 17, 11), &coding, &quant, 8, (1, 1)).unwrap();

        let mut decoder = ComponentDecoder::default();
        let ComponentSamples::Float(samples) = decoder.decode(&component).unwrap() else {
            panic!("expected float samples");
        };
        assert_eq!(samples.len(), 17 * 11);
        assert!(samples.iter().all(|s| *s == 0.0));
    }
}
