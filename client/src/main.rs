//! Sealroom - Main entry point
//!
//! Prints the local user's public identity key. All the heavy lifting is done
//! in lib.rs.

use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let public_key = sealroom_lib::run().await.context("sealroom bootstrap failed")?;
    println!("{}", public_key);
    Ok(())
}
