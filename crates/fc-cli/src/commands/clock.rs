//! Manual clock-in and clock-out.

use std::io::Write;

use anyhow::Result;

use fc_core::{RegionId, TimeEntry};
use fc_engine::Engine;

use super::util::{format_hours, format_time, parse_optional_datetime};

pub async fn clock_in<W: Write>(
    writer: &mut W,
    engine: &Engine,
    region: &str,
    at: Option<&str>,
) -> Result<()> {
    let region_id = RegionId::new(region)?;
    let at = parse_optional_datetime(at)?;
    let entry = engine.manual_clock_in(&region_id, at).await?;
    writeln!(
        writer,
        "Clocked in at {} at {}.",
        region_name(engine, &entry).await?,
        format_time(entry.clock_in_time)
    )?;
    Ok(())
}

pub async fn clock_out<W: Write>(writer: &mut W, engine: &Engine, at: Option<&str>) -> Result<()> {
    let at = parse_optional_datetime(at)?;
    let entry = engine.manual_clock_out(at).await?;
    let name = region_name(engine, &entry).await?;
    match (entry.clock_out_time, entry.total_hours) {
        (Some(out), Some(hours)) => writeln!(
            writer,
            "Clocked out of {name} at {} ({}).",
            format_time(out),
            format_hours(hours)
        )?,
        _ => writeln!(writer, "Clocked out of {name}.")?,
    }
    if entry.needs_review {
        writeln!(writer, "Flagged for review: clock-out precedes clock-in.")?;
    }
    Ok(())
}

/// The entry's region name, or its id once the region is gone.
pub(crate) async fn region_name(engine: &Engine, entry: &TimeEntry) -> Result<String> {
    Ok(engine
        .get_region(&entry.region_id)
        .await?
        .map_or_else(|| entry.region_id.to_string(), |region| region.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;

    use crate::commands::testing;

    #[tokio::test]
    async fn clock_in_then_out() {
        let engine = testing::engine();
        testing::add_site(&engine, "yard", "Yard").await;

        let mut output = Vec::new();
        clock_in(&mut output, &engine, "yard", Some("2025-01-06T08:00:00Z"))
            .await
            .unwrap();
        clock_out(&mut output, &engine, Some("2025-01-06T09:30:00Z"))
            .await
            .unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Clocked in at Yard at 2025-01-06 08:00:00.
        Clocked out of Yard at 2025-01-06 09:30:00 (1.50h).
        ");
    }

    #[tokio::test]
    async fn clock_out_before_clock_in_is_flagged() {
        let engine = testing::engine();
        testing::add_site(&engine, "yard", "Yard").await;

        let mut output = Vec::new();
        clock_in(&mut output, &engine, "yard", Some("2025-01-06T08:00:00Z"))
            .await
            .unwrap();
        output.clear();
        clock_out(&mut output, &engine, Some("2025-01-06T07:00:00Z"))
            .await
            .unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Clocked out of Yard at 2025-01-06 07:00:00 (0.00h).
        Flagged for review: clock-out precedes clock-in.
        ");
    }

    #[tokio::test]
    async fn second_clock_in_is_a_conflict() {
        let engine = testing::engine();
        testing::add_site(&engine, "yard", "Yard").await;

        let mut output = Vec::new();
        clock_in(&mut output, &engine, "yard", None).await.unwrap();
        let err = clock_in(&mut output, &engine, "yard", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already has an open time entry"));
        assert_eq!(engine.get_history(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clock_out_without_entry_fails() {
        let engine = testing::engine();
        let mut output = Vec::new();
        let err = clock_out(&mut output, &engine, None).await.unwrap_err();
        assert!(err.to_string().contains("no open time entry"));
    }

    #[tokio::test]
    async fn unknown_region_is_rejected() {
        let engine = testing::engine();
        let mut output = Vec::new();
        let err = clock_in(&mut output, &engine, "nowhere", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("region not found"));
    }

    #[tokio::test]
    async fn removed_region_falls_back_to_id() {
        let engine = testing::engine();
        let id = testing::add_site(&engine, "yard", "Yard").await;
        let entry = engine
            .manual_clock_in(&id, Some(testing::at("2025-01-06T08:00:00Z")))
            .await
            .unwrap();
        engine.remove_region(&id).await.unwrap();

        assert_eq!(region_name(&engine, &entry).await.unwrap(), "yard");
    }
}
