//! Turn positive Float values into binary `1u8`, and negative into `0u8`.
use crate::Float;
use crate::stream::{ReadStream, WriteStream};

/// Turn positive Float values into binary `1u8`, and negative into `0u8`.
#[derive(aiscore_macros::Block)]
#[dsp(crate, new, sync)]
pub struct BinarySlicer {
    #[dsp(in)]
    src: ReadStream<Float>,
    #[dsp(out)]
    dst: WriteStream<u8>,
}

impl BinarySlicer {
    fn process_sync(&self, a: Float) -> u8 {
        if a > 0.0 { 1 } else { 0 }
    }
}
