use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cnn_pool")]
#[command(about = "Bounded producer/consumer engine running a small CNN over a batch of inputs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate N inputs, push them through the bounded queue and run the CNN on a worker pool
    Run {
        /// Worker layout: threads, processes, or processes with threads inside
        #[arg(short, long, env = "CNN_POOL_MODE", value_enum, default_value = "threads")]
        mode: ModeArg,

        /// Queue synchronization primitive, shared by all modes
        #[arg(short, long, env = "CNN_POOL_SYNC", value_enum, default_value = "condvar")]
        sync: SyncArg,

        /// Worker threads (thread mode) or threads per process (hybrid mode). Defaults to CPU count
        #[arg(short, long, env = "CNN_POOL_WORKERS")]
        workers: Option<usize>,

        /// Worker processes (processes / hybrid mode)
        #[arg(short, long, env = "CNN_POOL_PROCESSES", default_value_t = 4)]
        processes: usize,

        /// Queue capacity (maximum buffered tasks)
        #[arg(short, long, env = "CNN_POOL_CAPACITY", default_value_t = 2)]
        capacity: usize,

        /// Number of tasks to generate
        #[arg(short, long, env = "CNN_POOL_TASKS", default_value_t = 4)]
        tasks: usize,

        /// Input side length
        #[arg(long, env = "CNN_POOL_INPUT_SIZE", default_value_t = 128)]
        input_size: usize,

        /// Input pattern
        #[arg(short, long, env = "CNN_POOL_INPUT", value_enum, default_value = "spike")]
        input: InputArg,

        /// Write all outcomes as a JSON report instead of logging them
        #[arg(short, long, env = "CNN_POOL_OUTPUT")]
        output: Option<PathBuf>,

        /// Suppress progress output
        #[arg(short, long)]
        quiet: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    Threads,
    Processes,
    Hybrid,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncArg {
    Condvar,
    Semaphore,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputArg {
    Spike,
    Uniform,
}
