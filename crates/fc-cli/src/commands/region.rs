//! Region management commands.

use std::io::Write;

use anyhow::{Context, Result};

use fc_core::{Coordinate, GeofenceRegion, ProjectId, RegionId, RegionPatch};
use fc_engine::Engine;

use crate::{AddRegionArgs, RegionAction, UpdateRegionArgs};

pub async fn run<W: Write>(writer: &mut W, engine: &Engine, action: &RegionAction) -> Result<()> {
    match action {
        RegionAction::Add(args) => add(writer, engine, args).await,
        RegionAction::List { all, json } => list(writer, engine, *all, *json).await,
        RegionAction::Update(args) => update(writer, engine, args).await,
        RegionAction::Remove { id } => {
            let id = RegionId::new(id.as_str())?;
            let region = engine.remove_region(&id).await?;
            writeln!(writer, "Removed region {} ({})", region.name, region.id)?;
            Ok(())
        }
    }
}

async fn add<W: Write>(writer: &mut W, engine: &Engine, args: &AddRegionArgs) -> Result<()> {
    let scope = &engine.config().scope;
    let center = Coordinate::new(args.lat, args.lon).context("invalid region center")?;
    let mut region =
        GeofenceRegion::new(scope.company_id.clone(), args.name.as_str(), center, args.radius)?;
    // Without --project the region joins the configured project, if any.
    let project = match &args.project {
        Some(project) => Some(ProjectId::new(project.as_str())?),
        None => scope.project_id.clone(),
    };
    if let Some(project) = project {
        region = region.with_project(project);
    }
    region.auto_clock_in = !args.no_auto_clock_in;
    region.auto_clock_out = !args.no_auto_clock_out;
    region.entry_alert = args.entry_alert;
    region.exit_alert = args.exit_alert;

    let id = engine.add_region(region).await?;
    writeln!(writer, "Added region {} ({id})", args.name)?;
    Ok(())
}

async fn list<W: Write>(writer: &mut W, engine: &Engine, all: bool, json: bool) -> Result<()> {
    let regions = engine.list_regions(all).await?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&regions)?)?;
        return Ok(());
    }

    if regions.is_empty() {
        writeln!(writer, "No regions.")?;
        return Ok(());
    }

    for region in &regions {
        writeln!(writer, "{}", describe(region))?;
    }
    Ok(())
}

async fn update<W: Write>(writer: &mut W, engine: &Engine, args: &UpdateRegionArgs) -> Result<()> {
    let id = RegionId::new(args.id.as_str())?;
    let patch = patch_from(args)?;
    if patch.is_empty() {
        anyhow::bail!("nothing to update; pass at least one field");
    }
    let region = engine.update_region(&id, &patch).await?;
    writeln!(writer, "Updated region {} ({})", region.name, region.id)?;
    Ok(())
}

fn describe(region: &GeofenceRegion) -> String {
    let auto = match (region.auto_clock_in, region.auto_clock_out) {
        (true, true) => "in+out",
        (true, false) => "in",
        (false, true) => "out",
        (false, false) => "off",
    };
    let project = region
        .project_id
        .as_ref()
        .map(|project| format!(" project={project}"))
        .unwrap_or_default();
    let inactive = if region.active { "" } else { " [inactive]" };
    format!(
        "- {} ({}) {:.6},{:.6} r={}m auto={auto}{project}{inactive}",
        region.name, region.id, region.center.lat, region.center.lon, region.radius_m
    )
}

fn patch_from(args: &UpdateRegionArgs) -> Result<RegionPatch> {
    let center = match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => {
            Some(Coordinate::new(lat, lon).context("invalid region center")?)
        }
        _ => None,
    };
    let project_id = if args.clear_project {
        Some(None)
    } else {
        args.project
            .as_deref()
            .map(ProjectId::new)
            .transpose()?
            .map(Some)
    };

    Ok(RegionPatch {
        name: args.name.clone(),
        center,
        radius_m: args.radius,
        project_id,
        auto_clock_in: args.auto_clock_in,
        auto_clock_out: args.auto_clock_out,
        entry_alert: args.entry_alert,
        exit_alert: args.exit_alert,
        active: args.active,
    })
}
