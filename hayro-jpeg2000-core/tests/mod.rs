use hayro_jpeg2000_core::coding_style::{
    CodingStyle, QuantStyle, QuantizationStyle, StepSize, WaveletKernel,
};
use hayro_jpeg2000_core::component::Component;
use hayro_jpeg2000_core::dwt::DwtContext;
use hayro_jpeg2000_core::mq::{MqContexts, MqDecoder, MqEncoder, NUM_CONTEXTS};
use hayro_jpeg2000_core::rect::IntRect;
use hayro_jpeg2000_core::{ComponentDecoder, ComponentSamples, DecodeSettings};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Deserialize;
use std::any::Any;
use std::fs;
use std::panic::{AssertUnwindSafe, PanicHookInfo, catch_unwind};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

static MANIFEST_PATH: LazyLock<PathBuf> =
    LazyLock::new(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/manifest.json"));

struct TestReport {
    name: String,
    duration: Duration,
    outcome: Result<(), String>,
}

fn main() {
    let _panic_hook_guard = PanicHookGuard::install();
    if !run_harness() {
        std::process::exit(1);
    }
}

fn run_harness() -> bool {
    let cases = match load_manifest() {
        Ok(cases) => cases,
        Err(err) => {
            eprintln!("Failed to read the test manifest: {err}");
            return false;
        }
    };

    if cases.is_empty() {
        eprintln!("The test manifest doesn't contain any cases.");
        return false;
    }

    let progress_bar = ProgressBar::new(cases.len() as u64);
    progress_bar.set_style(
        ProgressStyle::with_template(
            "{spinner} {pos}/{len} [{elapsed_precise}] [{wide_bar}] {msg}",
        )
        .unwrap()
        .progress_chars("=>-"),
    );

    let reports: Vec<TestReport> = cases
        .par_iter()
        .map(|case| {
            let name = case.name().to_owned();
            progress_bar.set_message(name.clone());
            let start = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| run_case(case))).unwrap_or_else(
                |payload| {
                    let panic_msg = describe_panic(payload.as_ref());
                    Err(format!("panic: {panic_msg}"))
                },
            );
            progress_bar.inc(1);
            TestReport {
                name,
                duration: start.elapsed(),
                outcome,
            }
        })
        .collect();

    progress_bar.finish_with_message("block tests complete");

    println!("\nDetailed results:");
    for report in &reports {
        match &report.outcome {
            Ok(_) => println!("[PASS] {:<60} ({:.2?})", report.name, report.duration),
            Err(err) => {
                println!("[FAIL] {:<60} ({:.2?})", report.name, report.duration);
                println!("       {err}");
            }
        }
    }

    let failures: Vec<_> = reports
        .iter()
        .filter_map(|report| report.outcome.as_ref().err().map(|err| (&report.name, err)))
        .collect();

    if failures.is_empty() {
        true
    } else {
        println!(
            "\n{} of {} block tests failed:",
            failures.len(),
            reports.len()
        );

        for (name, err) in failures {
            println!(" - {name}: {err}");
        }

        false
    }
}

fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_owned()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[allow(clippy::type_complexity)]
struct PanicHookGuard(Option<Box<dyn Fn(&PanicHookInfo) + Sync + Send + 'static>>);

impl PanicHookGuard {
    fn install() -> Self {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {
            // Swallow default panic output; harness reports failures explicitly.
        }));
        Self(Some(previous))
    }
}

impl Drop for PanicHookGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.0.take() {
            std::panic::set_hook(previous);
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TestCase {
    /// Encode pseudo-random decisions and decode them again.
    Mq {
        name: String,
        seed: u32,
        length: usize,
        /// Decisions are spread over this many contexts.
        #[serde(default = "default_contexts")]
        contexts: usize,
    },
    /// Run a forward and inverse wavelet transform over pseudo-random
    /// samples.
    Dwt {
        name: String,
        rect: [u32; 4],
        levels: u8,
        kernel: Kernel,
        seed: u32,
        #[serde(default)]
        tolerance: f32,
    },
    /// Decode a single HT code-block that covers a whole tile-component
    /// without decomposition levels.
    Ht {
        name: String,
        width: u32,
        height: u32,
        /// Guard bits plus exponent, minus one.
        bitplanes: u8,
        #[serde(default)]
        roi_shift: u8,
        #[serde(default)]
        zero_bitplanes: u8,
        #[serde(default)]
        vertically_causal: bool,
        /// Pairs of coding pass counts and hex-encoded data.
        segments: Vec<(u32, String)>,
        #[serde(default)]
        expected: Option<Vec<i32>>,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum Kernel {
    Reversible53,
    Irreversible97,
    Irreversible97Int,
}

impl From<Kernel> for WaveletKernel {
    fn from(kernel: Kernel) -> Self {
        match kernel {
            Kernel::Reversible53 => Self::Reversible53,
            Kernel::Irreversible97 => Self::Irreversible97,
            Kernel::Irreversible97Int => Self::Irreversible97Int,
        }
    }
}

fn default_contexts() -> usize {
    1
}

impl TestCase {
    fn name(&self) -> &str {
        match self {
            Self::Mq { name, .. } | Self::Dwt { name, .. } | Self::Ht { name, .. } => name,
        }
    }
}

fn load_manifest() -> Result<Vec<TestCase>, String> {
    let content = fs::read_to_string(&*MANIFEST_PATH)
        .map_err(|err| format!("{}: {err}", MANIFEST_PATH.display()))?;
    serde_json::from_str(&content).map_err(|err| err.to_string())
}

fn run_case(case: &TestCase) -> Result<(), String> {
    match case {
        TestCase::Mq {
            seed,
            length,
            contexts,
            ..
        } => run_mq(*seed, *length, *contexts),
        TestCase::Dwt {
            rect,
            levels,
            kernel,
            seed,
            tolerance,
            ..
        } => run_dwt(*rect, *levels, (*kernel).into(), *seed, *tolerance),
        TestCase::Ht {
            width,
            height,
            bitplanes,
            roi_shift,
            zero_bitplanes,
            vertically_causal,
            segments,
            expected,
            error,
            ..
        } => run_ht(
            HtBlock {
                width: *width,
                height: *height,
                bitplanes: *bitplanes,
                roi_shift: *roi_shift,
                zero_bitplanes: *zero_bitplanes,
                vertically_causal: *vertically_causal,
            },
            segments,
            expected.as_deref(),
            error.as_deref(),
        ),
    }
}

struct XorShift(u32);

impl XorShift {
    fn next(&mut self) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0
    }
}

fn run_mq(seed: u32, length: usize, num_contexts: usize) -> Result<(), String> {
    let num_contexts = num_contexts.clamp(1, NUM_CONTEXTS);
    let mut rng = XorShift(seed);

    // Skewed decisions so that the contexts actually adapt.
    let decisions: Vec<(usize, u32)> = (0..length)
        .map(|_| {
            let value = rng.next();
            (value as usize % num_contexts, u32::from(value % 7 == 0))
        })
        .collect();

    let mut contexts = MqContexts::new();
    let mut encoder = MqEncoder::new();
    for &(label, bit) in &decisions {
        let context = contexts.get_mut(label).ok_or("invalid context label")?;
        encoder.encode(context, bit);
    }
    let data = encoder.finish();

    let mut contexts = MqContexts::new();
    let mut decoder = MqDecoder::new(&data);

    for (idx, &(label, bit)) in decisions.iter().enumerate() {
        let context = contexts.get_mut(label).ok_or("invalid context label")?;
        let decoded = decoder.decode(context);
        if decoded != bit {
            return Err(format!("decision {idx} decoded as {decoded}, expected {bit}"));
        }
    }

    Ok(())
}

fn run_dwt(
    rect: [u32; 4],
    levels: u8,
    kernel: WaveletKernel,
    seed: u32,
    tolerance: f32,
) -> Result<(), String> {
    let rect = IntRect::from_ltrb(rect[0], rect[1], rect[2], rect[3]);
    let mut rng = XorShift(seed);
    let original: Vec<i32> = (0..rect.area())
        .map(|_| (rng.next() % 4096) as i32 - 2048)
        .collect();

    let mut ctx = DwtContext::new(rect, levels, kernel).map_err(|e| e.to_string())?;

    let max_delta = if kernel == WaveletKernel::Irreversible97 {
        let mut samples: Vec<f32> = original.iter().map(|v| *v as f32).collect();
        ctx.forward_float(&mut samples).map_err(|e| e.to_string())?;
        ctx.inverse_float(&mut samples).map_err(|e| e.to_string())?;

        samples
            .iter()
            .zip(&original)
            .map(|(a, b)| (a - *b as f32).abs())
            .fold(0.0, f32::max)
    } else {
        let mut samples = original.clone();
        ctx.forward(&mut samples).map_err(|e| e.to_string())?;
        ctx.inverse(&mut samples).map_err(|e| e.to_string())?;

        samples
            .iter()
            .zip(&original)
            .map(|(a, b)| a.abs_diff(*b))
            .max()
            .unwrap_or(0) as f32
    };

    if max_delta > tolerance {
        return Err(format!(
            "maximum deviation {max_delta} exceeds tolerance {tolerance}"
        ));
    }

    Ok(())
}

#[derive(Clone, Copy)]
struct HtBlock {
    width: u32,
    height: u32,
    bitplanes: u8,
    roi_shift: u8,
    zero_bitplanes: u8,
    vertically_causal: bool,
}

fn run_ht(
    block: HtBlock,
    segments: &[(u32, String)],
    expected: Option<&[i32]>,
    error: Option<&str>,
) -> Result<(), String> {
    let HtBlock {
        width,
        height,
        bitplanes,
        roi_shift,
        zero_bitplanes,
        vertically_causal,
    } = block;

    let mut coding = CodingStyle {
        num_decomposition_levels: 0,
        roi_shift,
        ..CodingStyle::default()
    };
    coding.code_block_style.high_throughput = true;
    coding.code_block_style.vertically_causal_context = vertically_causal;

    let quant = QuantStyle {
        quantization_style: QuantizationStyle::NoQuantization,
        guard_bits: 1,
        step_sizes: vec![StepSize {
            exponent: u16::from(bitplanes),
            mantissa: 0,
        }],
    };

    let mut component = Component::new(
        IntRect::from_xywh(0, 0, width, height),
        &coding,
        &quant,
        16,
        (1, 1),
    )
    .map_err(|e| e.to_string())?;

    let code_block = component
        .resolution_levels
        .first_mut()
        .and_then(|level| level.bands.first_mut())
        .and_then(|band| band.precincts.first_mut())
        .and_then(|precinct| precinct.code_blocks.first_mut())
        .ok_or("component has no code-block")?;
    code_block.zero_bitplanes = zero_bitplanes;

    for (passes, hex) in segments {
        let data = decode_hex(hex)?;
        code_block
            .push_segment(*passes, &data)
            .map_err(|e| e.to_string())?;
    }

    let mut decoder = ComponentDecoder::new(DecodeSettings {
        strict: true,
        ..DecodeSettings::default()
    });

    match (decoder.decode(&component), expected, error) {
        (Ok(ComponentSamples::Int(samples)), Some(expected), None) => {
            // The reversible dequantization halves the decoded values.
            let expected: Vec<i32> = expected.iter().map(|v| v / 2).collect();
            if samples == expected.as_slice() {
                Ok(())
            } else {
                Err(format!("decoded {samples:?}, expected {expected:?}"))
            }
        }
        (Err(err), None, Some(error)) => {
            if format!("{err:?}").contains(error) {
                Ok(())
            } else {
                Err(format!("failed with {err:?}, expected {error}"))
            }
        }
        (Ok(_), _, Some(error)) => Err(format!("decoded successfully, expected {error}")),
        (Err(err), _, _) => Err(format!("failed with {err}")),
        _ => Err("case needs either `expected` or `error`".to_owned()),
    }
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {hex}"));
    }

    (0..hex.len())
        .step_by(2)
        .map(|idx| u8::from_str_radix(&hex[idx..idx + 2], 16).map_err(|e| e.to_string()))
        .collect()
}
