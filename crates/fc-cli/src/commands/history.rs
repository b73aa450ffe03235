//! Time entry history.

use std::collections::HashMap;
use std::io::Write;

use anyhow::Result;

use fc_core::{RegionId, TimeEntry};
use fc_engine::Engine;

use super::util::{format_hours, format_time};

pub async fn run<W: Write>(writer: &mut W, engine: &Engine, limit: usize, json: bool) -> Result<()> {
    let entries = engine.get_history(limit).await?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&entries)?)?;
        return Ok(());
    }

    if entries.is_empty() {
        writeln!(writer, "No time entries.")?;
        return Ok(());
    }

    let names: HashMap<RegionId, String> = engine
        .list_regions(true)
        .await?
        .into_iter()
        .map(|region| (region.id, region.name))
        .collect();

    for entry in &entries {
        let name = names
            .get(&entry.region_id)
            .map_or_else(|| entry.region_id.as_str(), String::as_str);
        writeln!(writer, "{}", describe(entry, name))?;
    }
    Ok(())
}

fn describe(entry: &TimeEntry, region: &str) -> String {
    let start = format_time(entry.clock_in_time);
    let line = match (entry.clock_out_time, entry.total_hours) {
        (Some(end), Some(hours)) => format!(
            "- {start} .. {}  {}  {region}  {}/{}",
            format_time(end),
            format_hours(hours),
            entry.clock_in_source,
            entry
                .clock_out_source
                .map_or("?", |source| source.as_str())
        ),
        _ => format!("- {start} .. open  {region}  {}", entry.clock_in_source),
    };
    if entry.needs_review {
        format!("{line}  [review]")
    } else {
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use fc_core::LocationSample;
    use insta::assert_snapshot;

    use crate::commands::testing;

    fn sample(rfc3339: &str, lat: f64) -> LocationSample {
        LocationSample::new(testing::at(rfc3339), lat, 0.0, 10.0).unwrap()
    }

    #[tokio::test]
    async fn history_lists_most_recent_first() {
        let engine = testing::engine();
        let id = testing::add_site(&engine, "yard", "Yard").await;

        // Auto entry, 08:00 to 09:00.
        engine
            .process_sample(&sample("2025-01-06T08:00:00Z", 0.0))
            .await
            .unwrap();
        engine
            .process_sample(&sample("2025-01-06T09:00:00Z", 0.01))
            .await
            .unwrap();
        // Manual entry closed before it started, then one left open.
        engine
            .manual_clock_in(&id, Some(testing::at("2025-01-06T12:00:00Z")))
            .await
            .unwrap();
        engine
            .manual_clock_out(Some(testing::at("2025-01-06T11:00:00Z")))
            .await
            .unwrap();
        engine
            .manual_clock_in(&id, Some(testing::at("2025-01-06T13:00:00Z")))
            .await
            .unwrap();

        let mut output = Vec::new();
        run(&mut output, &engine, 10, false).await.unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        - 2025-01-06 13:00:00 .. open  Yard  manual
        - 2025-01-06 12:00:00 .. 2025-01-06 11:00:00  0.00h  Yard  manual/manual  [review]
        - 2025-01-06 08:00:00 .. 2025-01-06 09:00:00  1.00h  Yard  auto/auto
        ");

        let mut output = Vec::new();
        run(&mut output, &engine, 1, true).await.unwrap();
        let entries: Vec<TimeEntry> = serde_json::from_slice(&output).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_open());
    }

    #[tokio::test]
    async fn empty_history() {
        let engine = testing::engine();
        let mut output = Vec::new();
        run(&mut output, &engine, 10, false).await.unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @"No time entries.");
    }
}
