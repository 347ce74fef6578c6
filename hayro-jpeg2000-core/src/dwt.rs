//! The forward and inverse discrete wavelet transform (Annex F).
//!
//! Coefficients are stored in the Mallat layout: at each decomposition
//! level, the low-pass samples of a row (or column) precede its high-pass
//! samples. Each level is transformed by interleaving a line, applying the
//! lifting steps with whole-sample symmetric extension and writing the
//! result back in place.
//!
//! Three kernels are supported: the reversible 5-3 filter on integers, the
//! irreversible 9-7 filter on floats and the irreversible 9-7 filter in
//! fixed point on integers.

use crate::coding_style::WaveletKernel;
use crate::error::{Result, ValidationError, bail, try_resize};
use crate::rect::IntRect;
use crate::simd::{Level, SIMD_WIDTH, Simd, dispatch, f32x8};

// Table F.4.
const ALPHA: f32 = -1.586_134_3;
const BETA: f32 = -0.052_980_117;
const GAMMA: f32 = 0.882_911_1;
const DELTA: f32 = 0.443_506_87;
const KAPPA: f32 = 1.230_174_1;
const INV_KAPPA: f32 = 1.0 / KAPPA;

// The magnitudes of the same factors in 16.16 fixed point.
const I_ALPHA: i64 = 103_949;
const I_BETA: i64 = 3_472;
const I_GAMMA: i64 = 57_862;
const I_DELTA: i64 = 29_066;
const I_KAPPA: i64 = 80_621;
const I_INV_KAPPA: i64 = 53_274;

/// Fractional bits carried through the fixed-point 9-7 transform.
const I_PRESHIFT: u32 = 8;

/// The maximum number of decomposition levels (Table A.15).
const MAX_DECOMPOSITION_LEVELS: u8 = 32;

#[derive(Debug, Clone, Copy)]
struct LevelGeometry {
    width: usize,
    height: usize,
    /// Parity of the global x coordinate of the first column.
    x_parity: usize,
    /// Parity of the global y coordinate of the first row.
    y_parity: usize,
}

/// The state of a wavelet transform over one tile-component.
///
/// A context can be reused for any number of transforms over buffers with
/// the same geometry. Its scratch memory must not be shared between
/// concurrent transforms, so each thread needs its own context.
#[derive(Debug)]
pub struct DwtContext {
    kernel: WaveletKernel,
    /// The geometry of each level, from the coarsest to the finest.
    levels: Vec<LevelGeometry>,
    width: usize,
    height: usize,
    int_line: Vec<i32>,
    float_line: Vec<f32>,
    float_rows: Vec<f32>,
}

impl DwtContext {
    /// Create a new transform context for the given tile-component
    /// rectangle, number of decomposition levels and wavelet kernel.
    pub fn new(rect: IntRect, num_levels: u8, kernel: WaveletKernel) -> Result<Self> {
        if num_levels > MAX_DECOMPOSITION_LEVELS {
            bail!(ValidationError::InvalidResolutionLevels);
        }

        let mut levels = Vec::new();
        levels.try_reserve(num_levels as usize)?;

        for level in (0..num_levels).rev() {
            let level_rect = rect.ceil_div_pow2(level);

            levels.push(LevelGeometry {
                width: level_rect.width() as usize,
                height: level_rect.height() as usize,
                x_parity: (level_rect.x0 & 1) as usize,
                y_parity: (level_rect.y0 & 1) as usize,
            });
        }

        let width = rect.width() as usize;
        let height = rect.height() as usize;
        let max_len = width.max(height);

        let mut int_line = Vec::new();
        let mut float_line = Vec::new();
        let mut float_rows = Vec::new();

        if kernel == WaveletKernel::Irreversible97 {
            try_resize(&mut float_line, max_len, 0.0)?;
            try_resize(
                &mut float_rows,
                width.next_multiple_of(SIMD_WIDTH) * height,
                0.0,
            )?;
        } else {
            // Half of the buffer gathers a column, the other half holds it
            // interleaved.
            try_resize(&mut int_line, 2 * max_len, 0)?;
        }

        ldebug!(
            "wavelet transform over {}x{} samples with {} levels ({:?})",
            width,
            height,
            num_levels,
            kernel
        );

        Ok(Self {
            kernel,
            levels,
            width,
            height,
            int_line,
            float_line,
            float_rows,
        })
    }

    /// The wavelet kernel of the transform.
    pub fn kernel(&self) -> WaveletKernel {
        self.kernel
    }

    /// The number of decomposition levels.
    pub fn num_levels(&self) -> u8 {
        self.levels.len() as u8
    }

    /// The number of coefficients the transformed buffers need to hold.
    pub fn num_coefficients(&self) -> usize {
        self.width * self.height
    }

    /// Decompose integer samples into wavelet coefficients.
    ///
    /// Only valid for the 5-3 and fixed-point 9-7 kernels.
    pub fn forward(&mut self, coefficients: &mut [i32]) -> Result<()> {
        self.check_int(coefficients)?;
        let coefficients = &mut coefficients[..self.width * self.height];
        let fixed_point = self.kernel == WaveletKernel::Irreversible97Int;

        if fixed_point {
            for coefficient in coefficients.iter_mut() {
                *coefficient <<= I_PRESHIFT;
            }
        }

        for level in self.levels.iter().rev() {
            ltrace!("forward level {}x{}", level.width, level.height);

            analyze_columns_int(
                coefficients,
                self.width,
                level,
                &mut self.int_line,
                self.kernel,
            );
            analyze_rows_int(
                coefficients,
                self.width,
                level,
                &mut self.int_line,
                self.kernel,
            );
        }

        if fixed_point {
            descale(coefficients);
        }

        Ok(())
    }

    /// Reconstruct integer samples from wavelet coefficients.
    ///
    /// Only valid for the 5-3 and fixed-point 9-7 kernels.
    pub fn inverse(&mut self, coefficients: &mut [i32]) -> Result<()> {
        self.check_int(coefficients)?;
        let coefficients = &mut coefficients[..self.width * self.height];
        let fixed_point = self.kernel == WaveletKernel::Irreversible97Int;

        if fixed_point {
            for coefficient in coefficients.iter_mut() {
                *coefficient <<= I_PRESHIFT;
            }
        }

        for level in &self.levels {
            ltrace!("inverse level {}x{}", level.width, level.height);

            synthesize_rows_int(
                coefficients,
                self.width,
                level,
                &mut self.int_line,
                self.kernel,
            );
            synthesize_columns_int(
                coefficients,
                self.width,
                level,
                &mut self.int_line,
                self.kernel,
            );
        }

        if fixed_point {
            descale(coefficients);
        }

        Ok(())
    }

    /// Decompose float samples into wavelet coefficients using the 9-7
    /// kernel.
    pub fn forward_float(&mut self, coefficients: &mut [f32]) -> Result<()> {
        self.check_float(coefficients)?;
        let coefficients = &mut coefficients[..self.width * self.height];

        for level in self.levels.iter().rev() {
            ltrace!("forward level {}x{}", level.width, level.height);

            if level.width == 0 || level.height == 0 {
                continue;
            }

            // VER_SD, see F.4.
            let row_stride = level.width.next_multiple_of(SIMD_WIDTH);
            let rows = &mut self.float_rows[..row_stride * level.height];

            for y in 0..level.height {
                rows[y * row_stride..][..level.width]
                    .copy_from_slice(&coefficients[y * self.width..][..level.width]);
            }

            dispatch!(Level::new(), simd => analyze_rows_float(simd, rows, row_stride, level.height, level.y_parity));

            let num_low = num_low(level.height, level.y_parity);
            for y in 0..level.height {
                let source = interleaved_index(y, num_low, level.y_parity);
                coefficients[y * self.width..][..level.width]
                    .copy_from_slice(&rows[source * row_stride..][..level.width]);
            }

            // HOR_SD.
            let line = &mut self.float_line[..level.width];
            for y in 0..level.height {
                let row = &mut coefficients[y * self.width..][..level.width];
                line.copy_from_slice(row);
                analyze_line_float(line, level.x_parity);
                deinterleave(line, row, level.x_parity);
            }
        }

        Ok(())
    }

    /// Reconstruct float samples from wavelet coefficients using the 9-7
    /// kernel.
    pub fn inverse_float(&mut self, coefficients: &mut [f32]) -> Result<()> {
        self.check_float(coefficients)?;
        let coefficients = &mut coefficients[..self.width * self.height];

        for level in &self.levels {
            ltrace!("inverse level {}x{}", level.width, level.height);

            if level.width == 0 || level.height == 0 {
                continue;
            }

            // HOR_SR, see F.3.4.
            let line = &mut self.float_line[..level.width];
            for y in 0..level.height {
                let row = &mut coefficients[y * self.width..][..level.width];
                interleave(row, line, level.x_parity);
                synthesize_line_float(line, level.x_parity);
                row.copy_from_slice(line);
            }

            // VER_SR, see F.3.5.
            let row_stride = level.width.next_multiple_of(SIMD_WIDTH);
            let rows = &mut self.float_rows[..row_stride * level.height];

            let num_low = num_low(level.height, level.y_parity);
            for y in 0..level.height {
                let target = interleaved_index(y, num_low, level.y_parity);
                rows[target * row_stride..][..level.width]
                    .copy_from_slice(&coefficients[y * self.width..][..level.width]);
            }

            dispatch!(Level::new(), simd => synthesize_rows_float(simd, rows, row_stride, level.height, level.y_parity));

            for y in 0..level.height {
                coefficients[y * self.width..][..level.width]
                    .copy_from_slice(&rows[y * row_stride..][..level.width]);
            }
        }

        Ok(())
    }

    fn check_int(&self, coefficients: &[i32]) -> Result<()> {
        if self.kernel == WaveletKernel::Irreversible97 {
            bail!(ValidationError::InvalidTransformation);
        }

        if coefficients.len() < self.width * self.height {
            bail!(ValidationError::InvalidDimensions);
        }

        Ok(())
    }

    fn check_float(&self, coefficients: &[f32]) -> Result<()> {
        if self.kernel != WaveletKernel::Irreversible97 {
            bail!(ValidationError::InvalidTransformation);
        }

        if coefficients.len() < self.width * self.height {
            bail!(ValidationError::InvalidDimensions);
        }

        Ok(())
    }
}

/// Remove the fractional bits of the fixed-point transform, rounding half up.
fn descale(coefficients: &mut [i32]) {
    for coefficient in coefficients {
        *coefficient = coefficient.wrapping_add(1 << (I_PRESHIFT - 1)) >> I_PRESHIFT;
    }
}

/// The number of low-pass samples in a line of the given length.
#[inline]
fn num_low(len: usize, parity: usize) -> usize {
    (len + 1 - parity) / 2
}

/// The position in the interleaved line of the sample stored at `idx` in
/// the Mallat layout.
#[inline]
fn interleaved_index(idx: usize, num_low: usize, parity: usize) -> usize {
    if idx < num_low {
        2 * idx + parity
    } else {
        2 * (idx - num_low) + 1 - parity
    }
}

fn interleave<T: Copy>(input: &[T], output: &mut [T], parity: usize) {
    let num_low = num_low(input.len(), parity);

    for (idx, &value) in input.iter().enumerate() {
        output[interleaved_index(idx, num_low, parity)] = value;
    }
}

fn deinterleave<T: Copy>(input: &[T], output: &mut [T], parity: usize) {
    let num_low = num_low(input.len(), parity);

    for (idx, value) in output.iter_mut().enumerate() {
        *value = input[interleaved_index(idx, num_low, parity)];
    }
}

/// Mirror an index around the borders of a line of `length` samples, with
/// `length >= 2`.
#[inline(always)]
fn periodic_symmetric_extension(idx: usize, offset: isize, length: usize) -> usize {
    if offset < 0 {
        let abs_offset = (-offset) as usize;
        abs_offset.abs_diff(idx)
    } else {
        let new_idx = idx + offset as usize;
        if new_idx >= length {
            let overshoot = new_idx - length;
            length - 2 - overshoot
        } else {
            new_idx
        }
    }
}

// Since the lifting steps only read the two immediate neighbors and
// symmetric extension commutes with every step, reflecting the neighbor
// indices is equivalent to extending the line by 2 (5-3) or 4 (9-7) samples.

/// Add `step(left + right)` to every second sample, starting at `first`.
#[inline(always)]
fn lift_int(line: &mut [i32], first: usize, step: impl Fn(i64) -> i64) {
    let len = line.len();

    for i in (first..len).step_by(2) {
        let left = line[periodic_symmetric_extension(i, -1, len)] as i64;
        let right = line[periodic_symmetric_extension(i, 1, len)] as i64;
        line[i] = (line[i] as i64 + step(left + right)) as i32;
    }
}

#[inline(always)]
fn scale_int(line: &mut [i32], first: usize, factor: i64) {
    for i in (first..line.len()).step_by(2) {
        line[i] = fixed_mul(line[i] as i64, factor) as i32;
    }
}

/// Multiply with a 16.16 fixed-point factor, rounding half up.
#[inline(always)]
fn fixed_mul(value: i64, factor: i64) -> i64 {
    (value * factor + (1 << 15)) >> 16
}

/// The 1D_SD procedure for the integer kernels.
fn analyze_line_int(line: &mut [i32], parity: usize, kernel: WaveletKernel) {
    match line.len() {
        0 => return,
        1 => {
            if parity == 1 {
                line[0] = line[0].wrapping_mul(2);
            }

            return;
        }
        _ => {}
    }

    let even = parity;
    let odd = 1 - parity;

    if kernel == WaveletKernel::Reversible53 {
        lift_int(line, odd, |sum| -(sum >> 1));
        lift_int(line, even, |sum| (sum + 2) >> 2);
    } else {
        lift_int(line, odd, |sum| -fixed_mul(sum, I_ALPHA));
        lift_int(line, even, |sum| -fixed_mul(sum, I_BETA));
        lift_int(line, odd, |sum| fixed_mul(sum, I_GAMMA));
        lift_int(line, even, |sum| fixed_mul(sum, I_DELTA));
        scale_int(line, even, I_INV_KAPPA);
        scale_int(line, odd, I_KAPPA);
    }
}

/// The 1D_SR procedure for the integer kernels.
fn synthesize_line_int(line: &mut [i32], parity: usize, kernel: WaveletKernel) {
    match line.len() {
        0 => return,
        1 => {
            if parity == 1 {
                line[0] >>= 1;
            }

            return;
        }
        _ => {}
    }

    let even = parity;
    let odd = 1 - parity;

    if kernel == WaveletKernel::Reversible53 {
        // Equations (F-5) and (F-6).
        lift_int(line, even, |sum| -((sum + 2) >> 2));
        lift_int(line, odd, |sum| sum >> 1);
    } else {
        scale_int(line, even, I_KAPPA);
        scale_int(line, odd, I_INV_KAPPA);
        lift_int(line, even, |sum| -fixed_mul(sum, I_DELTA));
        lift_int(line, odd, |sum| -fixed_mul(sum, I_GAMMA));
        lift_int(line, even, |sum| fixed_mul(sum, I_BETA));
        lift_int(line, odd, |sum| fixed_mul(sum, I_ALPHA));
    }
}

fn analyze_rows_int(
    coefficients: &mut [i32],
    stride: usize,
    level: &LevelGeometry,
    scratch: &mut [i32],
    kernel: WaveletKernel,
) {
    let line = &mut scratch[..level.width];

    for y in 0..level.height {
        let row = &mut coefficients[y * stride..][..level.width];
        line.copy_from_slice(row);
        analyze_line_int(line, level.x_parity, kernel);
        deinterleave(line, row, level.x_parity);
    }
}

fn synthesize_rows_int(
    coefficients: &mut [i32],
    stride: usize,
    level: &LevelGeometry,
    scratch: &mut [i32],
    kernel: WaveletKernel,
) {
    let line = &mut scratch[..level.width];

    for y in 0..level.height {
        let row = &mut coefficients[y * stride..][..level.width];
        interleave(row, line, level.x_parity);
        synthesize_line_int(line, level.x_parity, kernel);
        row.copy_from_slice(line);
    }
}

fn analyze_columns_int(
    coefficients: &mut [i32],
    stride: usize,
    level: &LevelGeometry,
    scratch: &mut [i32],
    kernel: WaveletKernel,
) {
    let (column, line) = scratch.split_at_mut(scratch.len() / 2);
    let (column, line) = (&mut column[..level.height], &mut line[..level.height]);

    for x in 0..level.width {
        for (y, sample) in line.iter_mut().enumerate() {
            *sample = coefficients[y * stride + x];
        }

        analyze_line_int(line, level.y_parity, kernel);
        deinterleave(line, column, level.y_parity);

        for (y, &sample) in column.iter().enumerate() {
            coefficients[y * stride + x] = sample;
        }
    }
}

fn synthesize_columns_int(
    coefficients: &mut [i32],
    stride: usize,
    level: &LevelGeometry,
    scratch: &mut [i32],
    kernel: WaveletKernel,
) {
    let (column, line) = scratch.split_at_mut(scratch.len() / 2);
    let (column, line) = (&mut column[..level.height], &mut line[..level.height]);

    for x in 0..level.width {
        for (y, sample) in column.iter_mut().enumerate() {
            *sample = coefficients[y * stride + x];
        }

        interleave(column, line, level.y_parity);
        synthesize_line_int(line, level.y_parity, kernel);

        for (y, &sample) in line.iter().enumerate() {
            coefficients[y * stride + x] = sample;
        }
    }
}

#[inline(always)]
fn lift_float(line: &mut [f32], first: usize, factor: f32) {
    let len = line.len();

    for i in (first..len).step_by(2) {
        let left = periodic_symmetric_extension(i, -1, len);
        let right = periodic_symmetric_extension(i, 1, len);
        line[i] += factor * (line[left] + line[right]);
    }
}

#[inline(always)]
fn scale_float(line: &mut [f32], first: usize, factor: f32) {
    for i in (first..line.len()).step_by(2) {
        line[i] *= factor;
    }
}

/// The 1D Filter 9-7I procedure from F.3.8.2, run backwards.
fn analyze_line_float(line: &mut [f32], parity: usize) {
    match line.len() {
        0 => return,
        1 => {
            if parity == 1 {
                line[0] *= 2.0;
            }

            return;
        }
        _ => {}
    }

    let even = parity;
    let odd = 1 - parity;

    lift_float(line, odd, ALPHA);
    lift_float(line, even, BETA);
    lift_float(line, odd, GAMMA);
    lift_float(line, even, DELTA);
    scale_float(line, even, INV_KAPPA);
    scale_float(line, odd, KAPPA);
}

/// The 1D Filter 9-7I procedure from F.3.8.2.
fn synthesize_line_float(line: &mut [f32], parity: usize) {
    match line.len() {
        0 => return,
        1 => {
            if parity == 1 {
                line[0] *= 0.5;
            }

            return;
        }
        _ => {}
    }

    let even = parity;
    let odd = 1 - parity;

    // Steps 1 and 2.
    scale_float(line, even, KAPPA);
    scale_float(line, odd, INV_KAPPA);
    // Steps 3 to 6.
    lift_float(line, even, -DELTA);
    lift_float(line, odd, -GAMMA);
    lift_float(line, even, -BETA);
    lift_float(line, odd, -ALPHA);
}

/// Add `factor * (above + below)` to every second row, starting at `first`.
#[inline(always)]
fn lift_rows<S: Simd>(
    simd: S,
    rows: &mut [f32],
    stride: usize,
    height: usize,
    first: usize,
    factor: f32,
) {
    for i in (first..height).step_by(2) {
        let above = periodic_symmetric_extension(i, -1, height) * stride;
        let below = periodic_symmetric_extension(i, 1, height) * stride;
        let current = i * stride;

        for column in (0..stride).step_by(SIMD_WIDTH) {
            let a = f32x8::from_slice(simd, &rows[above + column..]);
            let b = f32x8::from_slice(simd, &rows[below + column..]);
            let c = f32x8::from_slice(simd, &rows[current + column..]);
            (a + b)
                .madd(factor, c)
                .store(&mut rows[current + column..]);
        }
    }
}

#[inline(always)]
fn scale_rows<S: Simd>(
    simd: S,
    rows: &mut [f32],
    stride: usize,
    height: usize,
    first: usize,
    factor: f32,
) {
    for i in (first..height).step_by(2) {
        for column in (0..stride).step_by(SIMD_WIDTH) {
            let start = i * stride + column;
            let mut loaded = f32x8::from_slice(simd, &rows[start..]);
            loaded *= factor;
            loaded.store(&mut rows[start..]);
        }
    }
}

#[inline(always)]
fn analyze_rows_float<S: Simd>(
    simd: S,
    rows: &mut [f32],
    stride: usize,
    height: usize,
    parity: usize,
) {
    if height == 1 {
        if parity == 1 {
            scale_rows(simd, rows, stride, height, 0, 2.0);
        }

        return;
    }

    let even = parity;
    let odd = 1 - parity;

    lift_rows(simd, rows, stride, height, odd, ALPHA);
    lift_rows(simd, rows, stride, height, even, BETA);
    lift_rows(simd, rows, stride, height, odd, GAMMA);
    lift_rows(simd, rows, stride, height, even, DELTA);
    scale_rows(simd, rows, stride, height, even, INV_KAPPA);
    scale_rows(simd, rows, stride, height, odd, KAPPA);
}

#[inline(always)]
fn synthesize_rows_float<S: Simd>(
    simd: S,
    rows: &mut [f32],
    stride: usize,
    height: usize,
    parity: usize,
) {
    if height == 1 {
        if parity == 1 {
            scale_rows(simd, rows, stride, height, 0, 0.5);
        }

        return;
    }

    let even = parity;
    let odd = 1 - parity;

    scale_rows(simd, rows, stride, height, even, KAPPA);
    scale_rows(simd, rows, stride, height, odd, INV_KAPPA);
    lift_rows(simd, rows, stride, height, even, -DELTA);
    lift_rows(simd, rows, stride, height, odd, -GAMMA);
    lift_rows(simd, rows, stride, height, even, -BETA);
    lift_rows(simd, rows, stride, height, odd, -ALPHA);
}
