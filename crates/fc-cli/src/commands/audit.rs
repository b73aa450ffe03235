//! Audit log output.

use std::io::Write;

use anyhow::Result;

use fc_core::AuditEvent;
use fc_engine::Engine;

use super::util::format_time;

pub async fn run<W: Write>(writer: &mut W, engine: &Engine, limit: usize, json: bool) -> Result<()> {
    let events = engine.get_audit_log(limit).await?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&events)?)?;
        return Ok(());
    }

    if events.is_empty() {
        writeln!(writer, "No audit events.")?;
        return Ok(());
    }

    for event in &events {
        writeln!(writer, "{}", describe(event))?;
    }
    Ok(())
}

fn describe(event: &AuditEvent) -> String {
    let region = event.region_id.as_ref().map_or("-", |id| id.as_str());
    let line = format!(
        "- {}  {}  {region}  {}",
        format_time(event.timestamp),
        event.kind,
        event.outcome
    );
    match &event.detail {
        Some(detail) => format!("{line}  ({detail})"),
        None => line,
    }
}
