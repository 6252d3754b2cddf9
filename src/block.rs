//! The [`Block`] trait and the return type of its `work()` function.
use crate::Result;

/// Result of calling `work()` on a block.
#[derive(Debug)]
pub enum BlockRet {
    /// Block did some work, and wants to be called again as soon as
    /// possible (more data may already be available).
    Again,

    /// Block did some work (or had none to do), and there's no reason
    /// to call it again until new input arrives or output space frees
    /// up.
    Ok,

    /// Block had nothing to do, and nothing changed.
    Noop,

    /// Block is done forever. No more calls should be made.
    EOF,

    /// Block is waiting on a specific stream (identified by its id) to
    /// have at least the given number of samples readable, or writable.
    WaitForStream(usize, usize),
}

/// A block that can report its own name.
///
/// Implemented automatically by `#[derive(Block)]`.
pub trait BlockName {
    /// Return the name of this block, for logging and debugging.
    fn block_name(&self) -> &str;
}

/// A block that can report whether it has reached end of file.
///
/// Implemented automatically by `#[derive(Block)]`, by ANDing together
/// the `eof()` of all of its input streams (a block with no inputs
/// never reports EOF on its own; a source decides this itself).
pub trait BlockEOF {
    /// Return true if this block will never produce more output.
    fn eof(&mut self) -> bool {
        false
    }
}

/// The trait every pipeline stage implements.
///
/// Most blocks should not implement `work()` directly; instead derive
/// `Block` with `#[dsp(new, sync)]` (or `sync_tag`/`sync_nocopy_tag`)
/// and implement `process_sync()`/`process_sync_tags()` instead. Blocks
/// with irregular shapes (sources, frame decoders, multi-rate filters)
/// implement `work()` by hand.
pub trait Block: BlockName + BlockEOF {
    /// Do a unit of work.
    ///
    /// Must not block. If there's nothing to do right now, return
    /// `Ok(BlockRet::Noop)` or `Ok(BlockRet::WaitForStream(..))`, never
    /// spin-wait internally.
    fn work(&mut self) -> Result<BlockRet>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_ret_is_plain_data() {
        // BlockRet must stay lifetime-free: the macro-generated work()
        // implementations return a bare `Result<BlockRet>`.
        fn assert_static<T: 'static>() {}
        assert_static::<BlockRet>();
    }
}
