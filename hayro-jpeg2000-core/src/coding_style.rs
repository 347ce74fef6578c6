//! Coding and quantization parameters of a tile-component.
//!
//! These are the resolved values of the COD/COC, QCD/QCC and RGN marker
//! segments. Parsing the marker segments themselves is left to the caller.

use crate::error::{Result, ValidationError, bail};

/// The maximum number of decomposition levels (Table A.15).
pub const MAX_DECOMPOSITION_LEVELS: u8 = 32;

/// The sub-band types (Annex F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubBandType {
    /// Low-pass in both directions.
    LowLow,
    /// High-pass horizontally, low-pass vertically.
    HighLow,
    /// Low-pass horizontally, high-pass vertically.
    LowHigh,
    /// High-pass in both directions.
    HighHigh,
}

impl SubBandType {
    /// The sub-bands of a resolution level, in coding order.
    pub(crate) fn for_resolution(resolution: u8) -> &'static [SubBandType] {
        if resolution == 0 {
            &[SubBandType::LowLow]
        } else {
            &[
                SubBandType::HighLow,
                SubBandType::LowHigh,
                SubBandType::HighHigh,
            ]
        }
    }

    /// Whether the band is high-pass in the horizontal and vertical
    /// direction.
    pub(crate) fn high_pass(&self) -> (bool, bool) {
        match self {
            Self::LowLow => (false, false),
            Self::HighLow => (true, false),
            Self::LowHigh => (false, true),
            Self::HighHigh => (true, true),
        }
    }

    /// The base-2 logarithm of the nominal gain of the band (Table E.1).
    pub(crate) fn log_gain(&self) -> u8 {
        match self {
            Self::LowLow => 0,
            Self::HighLow | Self::LowHigh => 1,
            Self::HighHigh => 2,
        }
    }
}

/// The wavelet kernel used for a tile-component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveletKernel {
    /// The reversible 5-3 filter, using integer lifting.
    Reversible53,
    /// The irreversible 9-7 filter, using floating point lifting.
    Irreversible97,
    /// The irreversible 9-7 filter, using fixed-point integer lifting.
    Irreversible97Int,
}

impl WaveletKernel {
    /// Map the transformation byte of the COD marker (Table A.20) to a
    /// kernel. `integer` selects the bit-exact fixed-point 9-7 variant.
    pub fn from_u8(value: u8, integer: bool) -> Result<Self> {
        match (value, integer) {
            (0, false) => Ok(Self::Irreversible97),
            (0, true) => Ok(Self::Irreversible97Int),
            (1, _) => Ok(Self::Reversible53),
            _ => bail!(ValidationError::InvalidTransformation),
        }
    }

    /// Whether the kernel operates on integer coefficients.
    pub fn is_integer(&self) -> bool {
        !matches!(self, Self::Irreversible97)
    }
}

/// Code-block style flags (Table A.19).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeBlockStyle {
    /// Raw coding of the significance propagation and magnitude refinement
    /// passes after the fourth bitplane.
    pub selective_arithmetic_coding_bypass: bool,
    /// Reset all contexts after each coding pass.
    pub reset_context_probabilities: bool,
    /// Terminate the arithmetic coder after each coding pass.
    pub termination_on_each_pass: bool,
    /// Use vertically stripe-causal contexts.
    pub vertically_causal_context: bool,
    /// Predictable termination.
    pub predictable_termination: bool,
    /// A segmentation symbol follows each cleanup pass.
    pub segmentation_symbols: bool,
    /// The code-blocks use the HTJ2K block coder.
    pub high_throughput: bool,
}

impl CodeBlockStyle {
    /// Parse the flags from the code-block style byte.
    pub fn from_u8(value: u8) -> Self {
        Self {
            selective_arithmetic_coding_bypass: (value & 0x01) != 0,
            reset_context_probabilities: (value & 0x02) != 0,
            termination_on_each_pass: (value & 0x04) != 0,
            vertically_causal_context: (value & 0x08) != 0,
            predictable_termination: (value & 0x10) != 0,
            segmentation_symbols: (value & 0x20) != 0,
            high_throughput: (value & 0x40) != 0,
        }
    }
}

/// Coding style of a tile-component (A.6.1 and A.6.2).
#[derive(Debug, Clone)]
pub struct CodingStyle {
    /// The number of decomposition levels `N_L`.
    pub num_decomposition_levels: u8,
    /// The base-2 logarithm of the nominal code-block width.
    pub code_block_width: u8,
    /// The base-2 logarithm of the nominal code-block height.
    pub code_block_height: u8,
    /// The code-block style flags.
    pub code_block_style: CodeBlockStyle,
    /// The wavelet kernel.
    pub transformation: WaveletKernel,
    /// The precinct exponents `(PPx, PPy)` for each resolution level. If
    /// empty, maximum precincts (`2^15`) are used.
    pub precinct_exponents: Vec<(u8, u8)>,
    /// The number of highest resolution levels that are not decoded.
    pub reduction_factor: u8,
    /// The maximum-shift value for region of interest decoding (A.6.3).
    pub roi_shift: u8,
}

impl Default for CodingStyle {
    fn default() -> Self {
        Self {
            num_decomposition_levels: 5,
            code_block_width: 6,
            code_block_height: 6,
            code_block_style: CodeBlockStyle::default(),
            transformation: WaveletKernel::Reversible53,
            precinct_exponents: Vec::new(),
            reduction_factor: 0,
            roi_shift: 0,
        }
    }
}

impl CodingStyle {
    /// The number of resolution levels, `N_L + 1`.
    pub fn num_resolution_levels(&self) -> u8 {
        self.num_decomposition_levels + 1
    }

    /// The number of resolution levels that are actually decoded.
    pub fn num_decoded_resolution_levels(&self) -> u8 {
        self.num_resolution_levels()
            .saturating_sub(self.reduction_factor)
    }

    /// The precinct exponents of the given resolution level.
    pub fn precinct_exponents(&self, resolution: u8) -> (u8, u8) {
        self.precinct_exponents
            .get(resolution as usize)
            .copied()
            .unwrap_or((15, 15))
    }

    /// Validate the parameters against the limits of Part 1 and HTJ2K.
    pub fn validate(&self) -> Result<()> {
        if self.num_decomposition_levels > MAX_DECOMPOSITION_LEVELS
            || self.num_decoded_resolution_levels() == 0
        {
            bail!(ValidationError::InvalidResolutionLevels);
        }

        // A.6.1: 2 <= xcb, ycb <= 10 and xcb + ycb <= 12.
        let (w, h) = (self.code_block_width, self.code_block_height);
        if !(2..=10).contains(&w) || !(2..=10).contains(&h) || w + h > 12 {
            bail!(ValidationError::InvalidCodeBlockSize);
        }

        if !self.precinct_exponents.is_empty()
            && self.precinct_exponents.len() < self.num_resolution_levels() as usize
        {
            bail!(ValidationError::InvalidPrecinctSize);
        }

        for (resolution, &(ppx, ppy)) in self.precinct_exponents.iter().enumerate() {
            // Only the lowest resolution level may use a precinct size of 1.
            if ppx > 15 || ppy > 15 || (resolution > 0 && (ppx == 0 || ppy == 0)) {
                bail!(ValidationError::InvalidPrecinctSize);
            }
        }

        if self.roi_shift > 31 {
            bail!(ValidationError::InvalidBitDepth);
        }

        Ok(())
    }
}

/// Quantization style (Table A.28).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizationStyle {
    /// No quantization, only exponents are signalled.
    NoQuantization,
    /// Scalar derived, a single step size for the LL band.
    ScalarDerived,
    /// Scalar expounded, one step size per sub-band.
    ScalarExpounded,
}

impl QuantizationStyle {
    /// Parse the quantization style from the Sqcd byte.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value & 0x1F {
            0 => Ok(Self::NoQuantization),
            1 => Ok(Self::ScalarDerived),
            2 => Ok(Self::ScalarExpounded),
            _ => bail!(ValidationError::InvalidExponents),
        }
    }
}

/// An exponent/mantissa pair of a step size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepSize {
    /// The 11-bit mantissa.
    pub mantissa: u16,
    /// The 5-bit exponent.
    pub exponent: u16,
}

impl StepSize {
    /// Split a 16-bit SPqcd value into exponent and mantissa.
    pub fn from_u16(value: u16) -> Self {
        Self {
            exponent: value >> 11,
            mantissa: value & ((1 << 11) - 1),
        }
    }
}

/// Quantization parameters of a tile-component (A.6.4 and A.6.5).
#[derive(Clone, Debug)]
pub struct QuantStyle {
    /// The quantization style.
    pub quantization_style: QuantizationStyle,
    /// The number of guard bits.
    pub guard_bits: u8,
    /// The signalled step sizes, in sub-band order.
    pub step_sizes: Vec<StepSize>,
}

impl QuantStyle {
    /// Return the exponent and mantissa of the given sub-band (E.1.1).
    pub(crate) fn exponent_mantissa(
        &self,
        sub_band_type: SubBandType,
        resolution: u8,
        num_decomposition_levels: u8,
    ) -> Result<(u16, u16)> {
        let sb_index = match sub_band_type {
            SubBandType::LowLow | SubBandType::HighLow => 0,
            SubBandType::LowHigh => 1,
            SubBandType::HighHigh => 2,
        };

        match self.quantization_style {
            QuantizationStyle::NoQuantization | QuantizationStyle::ScalarExpounded => {
                let entry = if resolution == 0 {
                    self.step_sizes.first()
                } else {
                    self.step_sizes
                        .get(1 + (resolution as usize - 1) * 3 + sb_index)
                };

                match entry {
                    Some(s) => Ok((s.exponent, s.mantissa)),
                    None => bail!(ValidationError::MissingStepSize),
                }
            }
            QuantizationStyle::ScalarDerived => {
                let Some(first) = self.step_sizes.first() else {
                    bail!(ValidationError::MissingStepSize);
                };

                // Equation (E-5).
                let n_b = if resolution == 0 {
                    num_decomposition_levels as u16
                } else {
                    num_decomposition_levels as u16 + 1 - resolution as u16
                };

                let Some(exponent) = first
                    .exponent
                    .checked_sub(num_decomposition_levels as u16)
                    .and_then(|e| e.checked_add(n_b))
                else {
                    bail!(ValidationError::InvalidExponents);
                };

                Ok((exponent, first.mantissa))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_block_style_flags() {
        let style = CodeBlockStyle::from_u8(0x01 | 0x08 | 0x40);
        assert!(style.selective_arithmetic_coding_bypass);
        assert!(style.vertically_causal_context);
        assert!(style.high_throughput);
        assert!(!style.segmentation_symbols);
        assert!(!style.termination_on_each_pass);
    }

    #[test]
    fn validate_limits() {
        let mut style = CodingStyle::default();
        assert!(style.validate().is_ok());

        style.code_block_width = 7;
        assert_eq!(
            style.validate(),
            Err(ValidationError::InvalidCodeBlockSize.into())
        );

        style.code_block_width = 6;
        style.reduction_factor = 6;
        assert_eq!(
            style.validate(),
            Err(ValidationError::InvalidResolutionLevels.into())
        );

        style.reduction_factor = 0;
        style.precinct_exponents = vec![(15, 15), (0, 15)];
        assert!(style.validate().is_err());
    }

    #[test]
    fn derived_exponents() {
        let quant = QuantStyle {
            quantization_style: QuantizationStyle::ScalarDerived,
            guard_bits: 2,
            step_sizes: vec![StepSize::from_u16((10 << 11) | 5)],
        };

        assert_eq!(
            quant.exponent_mantissa(SubBandType::LowLow, 0, 3).unwrap(),
            (10, 5)
        );
        assert_eq!(
            quant.exponent_mantissa(SubBandType::HighHigh, 1, 3).unwrap(),
            (10, 5)
        );
        assert_eq!(
            quant.exponent_mantissa(SubBandType::HighLow, 3, 3).unwrap(),
            (8, 5)
        );
    }

    #[test]
    fn expounded_exponents() {
        let quant = QuantStyle {
            quantization_style: QuantizationStyle::ScalarExpounded,
            guard_bits: 1,
            step_sizes: (0..4).map(|e| StepSize { mantissa: 0, exponent: e }).collect(),
        };

        assert_eq!(
            quant.exponent_mantissa(SubBandType::LowHigh, 1, 1).unwrap(),
            (2, 0)
        );
        assert!(quant.exponent_mantissa(SubBandType::HighLow, 2, 1).is_err());
    }
}
