//! Command line entry point of the benchmark, see [`s3bench::cli`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

fn main() -> anyhow::Result<()> {
    s3bench::cli::execute()
}
