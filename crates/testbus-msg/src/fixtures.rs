//! ---
//! tb_section: "02-broker-simulation"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Scenario fixture replay into an open scope."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::scope::BrokerScope;
use crate::types::{Headers, PublishOptions};
use crate::Result;

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    channel: String,
    payload: JsonValue,
    #[serde(default)]
    headers: Headers,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    exchange: Option<String>,
    #[serde(default)]
    partition: Option<i32>,
    #[serde(default)]
    delay_ms: Option<u64>,
}

impl ReplayRecord {
    fn options(&mut self) -> PublishOptions {
        PublishOptions {
            headers: std::mem::take(&mut self.headers),
            key: self.key.take(),
            partition: self.partition,
            exchange: self.exchange.take(),
            ..PublishOptions::default()
        }
    }
}

/// Publish every record of a newline-delimited JSON fixture into `scope`.
///
/// Each line holds `channel` and `payload`, plus optional `headers`, `key`,
/// `exchange`, `partition` and `delay_ms`. Blank lines are skipped. Returns
/// the number of records published; stops at the first failing publish.
pub async fn replay_from_file<P: AsRef<Path>>(scope: &BrokerScope, path: P) -> Result<usize> {
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0usize;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut record: ReplayRecord = serde_json::from_str(&line)?;
        if let Some(delay) = record.delay_ms {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let options = record.options();
        scope
            .publish_with(&record.channel, &record.payload, options)
            .await?;
        count += 1;
    }

    Ok(count)
}
