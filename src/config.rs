//! Evaluation tuning knobs.
//!
//! Defaults suit large tables on multi-core machines. Environment overrides:
//! - `COLEXPR_CHUNK_SIZE`: rows per worker chunk
//! - `COLEXPR_PARALLEL_THRESHOLD`: minimum rows before work is split;
//!   `max` or `disabled` keeps everything on the calling thread
//! - `COLEXPR_THREADS`: size of a dedicated worker pool

use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_SIZE: usize = 65_536;
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 131_072;

/// Configuration for chunked evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Rows per chunk; kernels round it with [`EvalConfig::chunk_len`]
    pub chunk_size: usize,
    /// Inputs shorter than this run sequentially
    pub parallel_threshold: usize,
    /// Dedicated pool size, `None` uses rayon's global pool
    pub num_threads: Option<usize>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            num_threads: None,
        }
    }
}

impl EvalConfig {
    /// Default configuration with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("COLEXPR_CHUNK_SIZE") {
            if let Ok(size) = value.trim().parse::<usize>() {
                config.chunk_size = size;
            }
        }
        if let Ok(value) = std::env::var("COLEXPR_PARALLEL_THRESHOLD") {
            config.parallel_threshold = parse_threshold(&value, config.parallel_threshold);
        }
        if let Ok(value) = std::env::var("COLEXPR_THREADS") {
            config.num_threads = value.trim().parse::<usize>().ok().filter(|&n| n > 0);
        }
        config.normalized()
    }

    /// Configuration that never splits work
    pub fn sequential() -> Self {
        Self {
            parallel_threshold: usize::MAX,
            ..Self::default()
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self.normalized()
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads).filter(|&n| n > 0);
        self
    }

    /// Round the chunk size up to a non-zero multiple of 8 so chunk
    /// boundaries fall on validity-bitmap byte boundaries.
    pub fn normalized(mut self) -> Self {
        self.chunk_size = self.chunk_size.max(8).next_multiple_of(8);
        self
    }

    /// Chunk length the kernels actually use. Fields are public and
    /// deserialization skips [`EvalConfig::normalized`], so this never
    /// trusts `chunk_size` as stored.
    pub fn chunk_len(&self) -> usize {
        self.chunk_size.max(8).next_multiple_of(8)
    }

    pub fn is_parallel(&self, rows: usize) -> bool {
        rows >= self.parallel_threshold && rows > self.chunk_len()
    }
}

fn parse_threshold(value: &str, current: usize) -> usize {
    let value = value.trim().to_lowercase();
    if value == "max" || value == "disabled" {
        usize::MAX
    } else {
        value.parse::<usize>().unwrap_or(current)
    }
}
