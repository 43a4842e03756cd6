use anyhow::{Context, Result};
use log::info;
use serde_json::Value;
use std::io::Write;

use crate::client::Client;

mod download;
mod get;
mod list;
mod upload;

pub use download::download;
pub use get::{get, whoami};
pub use list::list;
pub use upload::{UploadArgs, upload};

/// Writes one JSON document per line.
pub fn write_json<W: Write>(out: &mut W, value: &Value) -> Result<()> {
    serde_json::to_writer(&mut *out, value).context("Failed to serialize response")?;
    writeln!(out).context("Failed to write output")?;
    Ok(())
}

/// Logs the current rate-limit budget, if the API reported one.
pub fn report_rate_limit(client: &Client) {
    let snapshot = client.rate_limit();
    info!(
        "Rate limit: {} of {} requests remaining",
        snapshot.remaining, snapshot.limit
    );
}
