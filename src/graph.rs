/*! Graphs contain blocks connected by streams, and run them.

Blocks wire their own input and output streams at construction time
(via each block's generated or hand-written `new()`); the graph itself
only owns the blocks and drives `work()` on each of them in order until
the whole graph is done.

This matches the single-threaded, synchronous push model: the source
block produces, and `work()` calls cascade through the graph on one
thread, one call stack. There is no `MTGraph`-style one-thread-per-block
execution here.
*/
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info};

use crate::Result;
use crate::block::{Block, BlockRet};

/// Shared flag used to request cooperative shutdown of a running graph.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a new, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A runnable graph of blocks.
pub trait GraphRunner {
    /// Add a block to the graph. Returns an index useful for later
    /// lookups (e.g. `set_block_name`).
    fn add(&mut self, block: Box<dyn Block>) -> usize;

    /// Run the graph to completion (every block returned `EOF` or
    /// `Noop` with no possibility of future progress), or until
    /// cancelled.
    fn run(&mut self) -> Result<()>;

    /// Obtain a token that can be used to cancel a running graph from
    /// another thread.
    fn cancel_token(&self) -> CancellationToken;
}

/// The default, single-threaded graph runner.
///
/// Blocks are called in the order they were added, repeatedly, until a
/// full pass produces no progress on any block and every block that
/// can reach EOF has, at which point the graph stops.
pub struct Graph {
    blocks: Vec<Box<dyn Block>>,
    cancel: CancellationToken,
    /// How long to sleep when an entire pass makes no progress.
    idle_sleep: Duration,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            cancel: CancellationToken::new(),
            idle_sleep: Duration::from_millis(10),
        }
    }

    /// Override the idle-sleep duration used when a full pass makes no
    /// progress. Mostly useful for tests, to avoid slow test runs.
    pub fn set_idle_sleep(&mut self, d: Duration) {
        self.idle_sleep = d;
    }
}

impl GraphRunner for Graph {
    fn add(&mut self, block: Box<dyn Block>) -> usize {
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn run(&mut self) -> Result<()> {
        let start = std::time::Instant::now();
        let mut done = vec![false; self.blocks.len()];
        loop {
            if self.cancel.is_cancelled() {
                info!("Graph: cancelled after {:?}", start.elapsed());
                return Ok(());
            }
            let mut progress = false;
            let mut all_done = true;
            for (i, block) in self.blocks.iter_mut().enumerate() {
                if done[i] {
                    continue;
                }
                all_done = false;
                loop {
                    match block.work()? {
                        BlockRet::Again => {
                            progress = true;
                        }
                        BlockRet::Ok => {
                            progress = true;
                            break;
                        }
                        BlockRet::Noop => {
                            break;
                        }
                        BlockRet::WaitForStream(id, need) => {
                            debug!("Graph: block {i} waiting on stream {id} for {need}");
                            break;
                        }
                        BlockRet::EOF => {
                            debug!("Graph: block {i} reached EOF");
                            done[i] = true;
                            progress = true;
                            break;
                        }
                    }
                }
            }
            if all_done {
                info!("Graph: done after {:?}", start.elapsed());
                return Ok(());
            }
            if !progress {
                std::thread::sleep(self.idle_sleep);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Complex;
    use crate::blocks::{NullSink, VectorSource};

    #[test]
    fn runs_a_trivial_graph() -> Result<()> {
        let (src, out) = VectorSource::new(vec![Complex::new(1.0, 0.0); 8]);
        let (sink, _) = NullSink::new(out);
        let mut g = Graph::new();
        g.set_idle_sleep(Duration::from_millis(1));
        g.add(Box::new(src));
        g.add(Box::new(sink));
        g.run()?;
        Ok(())
    }

    #[test]
    fn cancel_token_stops_a_running_graph() {
        let g = Graph::new();
        let token = g.cancel_token();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
