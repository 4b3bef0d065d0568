//! imgralph command line tool
//!
//! Removes image backgrounds with the u2netp segmentation model and crops the
//! result to its visible content.

#[cfg(feature = "cli")]
use imgralph::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
