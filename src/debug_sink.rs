//! Log values, for debugging.

use log::debug;

use crate::Result;
use crate::block::{Block, BlockRet};
use crate::stream::{ReadStream, StreamWait};

/// Log every value it sees, at debug level. Useful for wiring up quick
/// test graphs; not meant for production sinks.
#[derive(aiscore_macros::Block)]
#[dsp(crate, new)]
pub struct DebugSink<T>
where
    T: Copy,
{
    #[dsp(in)]
    src: ReadStream<T>,
}

impl<T> Block for DebugSink<T>
where
    T: Copy + std::fmt::Debug,
{
    fn work(&mut self) -> Result<BlockRet> {
        let (i, _tags) = self.src.read_buf()?;
        if i.is_empty() {
            return Ok(BlockRet::WaitForStream(self.src.id(), 1));
        }
        for s in i.iter() {
            debug!("debug_sink: {s:?}");
        }
        let n = i.len();
        i.consume(n);
        Ok(BlockRet::Again)
    }
}
