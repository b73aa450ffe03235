//! Status command for showing membership and the open time entry.

use std::io::Write;

use anyhow::Result;

use fc_core::MembershipState;
use fc_engine::{Engine, EngineStatus};

use super::clock::region_name;
use super::util::format_time;

pub async fn run<W: Write>(writer: &mut W, engine: &Engine) -> Result<()> {
    let status = engine.status().await?;
    render(writer, engine, &status).await
}

async fn render<W: Write>(
    writer: &mut W,
    engine: &Engine,
    status: &EngineStatus,
) -> Result<()> {
    writeln!(writer, "User: {}", status.user_id)?;
    writeln!(writer, "Monitor: {}", status.monitor.as_str())?;

    match &status.membership {
        MembershipState::Outside => writeln!(writer, "Location: outside all regions")?,
        MembershipState::Inside(region_id) => {
            let name = engine
                .get_region(region_id)
                .await?
                .map_or_else(|| region_id.to_string(), |region| region.name);
            writeln!(writer, "Location: inside {name} ({region_id})")?;
        }
    }

    let Some(entry) = &status.active_entry else {
        writeln!(writer, "Not clocked in.")?;
        return Ok(());
    };
    writeln!(
        writer,
        "Clocked in at {} since {} ({})",
        region_name(engine, entry).await?,
        format_time(entry.clock_in_time),
        entry.clock_in_source
    )?;
    Ok(())
}
