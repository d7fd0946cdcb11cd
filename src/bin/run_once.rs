//! Run the pipeline once for a date and print the result as JSON.
//!
//! Usage: `run_once [--force] [YYYY-MM-DD]` (date defaults to today, UTC).

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use signal_brief::{RunStatus, Runtime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    signal_brief::init_tracing();

    let mut force = false;
    let mut date: Option<NaiveDate> = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--force" | "-f" => force = true,
            other => {
                let d = NaiveDate::parse_from_str(other, "%Y-%m-%d")
                    .with_context(|| format!("invalid date argument {other:?}"))?;
                date = Some(d);
            }
        }
    }
    let date = date.unwrap_or_else(|| Utc::now().date_naive());

    let rt = Runtime::from_env()?;
    let result = rt.pipeline.run_pipeline(date, force).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let RunStatus::Failed(reason) = &result.status {
        anyhow::bail!("run for {date} failed: {reason}");
    }
    Ok(())
}
