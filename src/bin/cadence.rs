/// Cadence CLI
///
/// Runs scripts standalone, resumes snapshots, and dumps token streams.
/// Everything lives in the library's `cli` module so embedding hosts can
/// reuse the plumbing.
use cadence_core::cli;

fn main() {
    if let Err(e) = cli::run_cli() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
