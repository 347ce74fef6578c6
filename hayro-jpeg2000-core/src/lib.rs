/*!
Memory-safe entropy decoding and wavelet synthesis for JPEG 2000.

This crate implements the core of a JPEG 2000 decoder that sits between
codestream parsing and color conversion:

- the [MQ arithmetic coder](mq), both for decoding and encoding,
- tier-1 decoding of MQ-coded code-blocks (Annex D) and of HTJ2K
  code-blocks (Rec. ITU-T T.814),
- the [geometry](component) of tile-components: resolution levels,
  sub-bands, precincts and code-blocks together with their
  [tag trees](tag_tree) and [quantization](quantization) parameters,
- reading of [packets](packet) into the code-blocks of a precinct,
- the [discrete wavelet transform](dwt) with the reversible 5-3 kernel and
  the irreversible 9-7 kernel, both in floating point and fixed point.

Parsing of marker segments, progression orders, multi-component transforms
and file formats is left to the caller.

# Example

```
use hayro_jpeg2000_core::coding_style::{CodingStyle, QuantStyle, QuantizationStyle, StepSize};
use hayro_jpeg2000_core::component::Component;
use hayro_jpeg2000_core::rect::IntRect;
use hayro_jpeg2000_core::{ComponentDecoder, ComponentSamples, DecodeSettings};

let coding = CodingStyle::default();
let quant = QuantStyle {
    quantization_style: QuantizationStyle::NoQuantization,
    guard_bits: 2,
    step_sizes: vec![StepSize { exponent: 9, mantissa: 0 }; 16],
};

// Packets would be read into the component here.
let component = Component::new(IntRect::from_xywh(0, 0, 64, 64), &coding, &quant, 8, (1, 1))?;

let mut decoder = ComponentDecoder::new(DecodeSettings {
    level_shift: true,
    ..DecodeSettings::default()
});

if let ComponentSamples::Int(samples) = decoder.decode(&component)? {
    assert_eq!(samples.len(), 64 * 64);
}
# Ok::<(), hayro_jpeg2000_core::DecodeError>(())
```

# Safety
This crate forbids unsafe code via a crate-level attribute.

# Cargo features
This crate has two optional features:
- `simd`: Vectorizes the floating point wavelet transform via
  `fearless_simd`. Enabled by default.
- `logging`: Emits diagnostics about the decoding process via the `log`
  crate.
*/

#![forbid(unsafe_code)]

#[macro_use]
mod log;

mod bitplane;
pub mod coding_style;
pub mod component;
mod decode;
pub mod dwt;
pub mod error;
mod ht;
pub mod mq;
pub mod packet;
pub mod quantization;
mod reader;
pub mod rect;
mod simd;
pub mod tag_tree;

pub use decode::{CodeBlockFailure, ComponentDecoder, ComponentSamples, DecodeSettings};
pub use error::{DecodeError, ErrorKind, Result};
