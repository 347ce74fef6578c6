//! Dequantization of code-block coefficients (Annex E) and region of
//! interest descaling (Annex H).
//!
//! The tier-1 decoders produce coefficients with one fractional bit: a
//! coefficient whose magnitude bits are known down to bitplane `p` is stored
//! as `(2 * magnitude + 1) << p`, which places the reconstruction point in
//! the middle of the remaining uncertainty interval.

use crate::coding_style::{
    CodingStyle, QuantStyle, QuantizationStyle, SubBandType, WaveletKernel,
};
use crate::error::{DecodingError, Result, bail};

/// The maximum number of magnitude bitplanes of a code-block.
pub const MAX_BITPLANE_COUNT: u8 = 30;

/// Quantization parameters of a single sub-band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandQuantization {
    /// The step size `Δ_b` as a float.
    pub step: f32,
    /// The step size in 1.15 fixed point, used by the integer kernels.
    pub int_step: i32,
    /// The number of magnitude bitplanes `M_b` (E-2).
    pub num_bitplanes: u8,
}

impl BandQuantization {
    /// Derive the quantization parameters of a sub-band.
    pub fn new(
        coding: &CodingStyle,
        quant: &QuantStyle,
        sub_band_type: SubBandType,
        resolution: u8,
        bit_depth: u8,
    ) -> Result<Self> {
        let (exponent, mantissa) = quant.exponent_mantissa(
            sub_band_type,
            resolution,
            coding.num_decomposition_levels,
        )?;

        let step = if quant.quantization_style == QuantizationStyle::NoQuantization {
            1.0
        } else {
            // Equation (E-3). The synthesis filters are normalized as in
            // Annex F, so the nominal gain applies to all kernels.
            let r_b = bit_depth as i32 + sub_band_type.log_gain() as i32;

            2.0_f32.powi(r_b - exponent as i32) * (1.0 + (mantissa as f32) / 2048.0)
        };

        // Equation (E-2).
        let Some(num_bitplanes) = (quant.guard_bits as u16)
            .checked_add(exponent)
            .and_then(|x| x.checked_sub(1))
        else {
            bail!(DecodingError::InvalidBitplaneCount);
        };

        if num_bitplanes > MAX_BITPLANE_COUNT as u16 {
            bail!(DecodingError::TooManyBitplanes);
        }

        Ok(Self {
            step,
            int_step: (step * (1 << 15) as f32).round() as i32,
            num_bitplanes: num_bitplanes as u8,
        })
    }
}

/// Undo the maximum shift method (H.2) on the coefficients of a code-block
/// that was decoded with `roi_shift` additional bitplanes.
///
/// Coefficients whose magnitude reaches `2^roi_shift` belong to the region of
/// interest and are scaled back down, all others are background coefficients
/// and stay as they are.
pub fn apply_roi_shift(coefficients: &mut [i32], roi_shift: u8) {
    if roi_shift == 0 {
        return;
    }

    let roi_shift = roi_shift.min(31) as u32;
    let threshold = 1_u32 << roi_shift;

    for coefficient in coefficients {
        let magnitude = coefficient.unsigned_abs();

        if (magnitude >> 1) >= threshold {
            // The bits below the shift are zero for region of interest
            // coefficients, so only an unneeded reconstruction offset is lost.
            let scaled = (magnitude >> roi_shift) as i32;
            *coefficient = if *coefficient < 0 { -scaled } else { scaled };
        }
    }
}

/// Dequantize a row of coefficients for one of the integer kernels.
#[inline]
pub fn dequantize_int(
    kernel: WaveletKernel,
    quantization: &BandQuantization,
    input: &[i32],
    output: &mut [i32],
) {
    let int_step = quantization.int_step as i64;

    match kernel {
        WaveletKernel::Irreversible97Int => {
            // One fractional bit from the coefficient, 15 from the step.
            for (out, &v) in output.iter_mut().zip(input) {
                *out = ((v as i64 * int_step + (1 << 15)) >> 16) as i32;
            }
        }
        _ if int_step == 1 << 15 => {
            for (out, &v) in output.iter_mut().zip(input) {
                *out = v / 2;
            }
        }
        _ => {
            for (out, &v) in output.iter_mut().zip(input) {
                let round = if v > 0 { 1 << 14 } else { -(1 << 14) };
                *out = ((v as i64 * int_step + round) >> 15) as i32;
            }
        }
    }
}

/// Dequantize a row of coefficients for the floating point kernel.
#[inline]
pub fn dequantize_float(quantization: &BandQuantization, input: &[i32], output: &mut [f32]) {
    let step = quantization.step * 0.5;

    for (out, &v) in output.iter_mut().zip(input) {
        *out = v as f32 * step;
    }
}
