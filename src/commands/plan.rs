//! `stackup plan` - show what an apply would do.

use anyhow::Result;
use colored::{ColoredString, Colorize};
use converge::{DiffSummary, NodePreview, PlannedAction, Provider, build_plan, preview};
use serde::Serialize;

use crate::Context;
use crate::cli::PlanArgs;
use crate::commands;
use crate::ui;

#[derive(Serialize)]
struct PlanReport<'a> {
    stack: &'a str,
    refreshed: bool,
    waves: usize,
    nodes: &'a [NodePreview],
    summary: &'a DiffSummary,
}

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let loaded = commands::load(ctx)?;
    let stack = &loaded.stack;
    let plan = build_plan(&stack.store, &stack.steps)?;

    let provider = if args.refresh {
        Some(commands::provider(&loaded.config, &loaded.secrets)?)
    } else {
        None
    };
    let previews = preview(
        &plan,
        &stack.store,
        &stack.steps,
        provider.as_ref().map(|p| p as &dyn Provider),
    )?;
    let summary = DiffSummary::from_previews(&previews);

    if args.json {
        let report = PlanReport {
            stack: &stack.name,
            refreshed: args.refresh,
            waves: plan.waves.len(),
            nodes: &previews,
            summary: &summary,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_plan(&stack.name, &previews, plan.waves.len());
    print_summary(&summary, args.refresh);
    Ok(())
}

pub(crate) fn print_plan(stack: &str, previews: &[NodePreview], waves: usize) {
    ui::header(&format!("Plan for stack '{stack}'"));
    for wave in 0..waves {
        ui::section(&format!("Wave {}", wave + 1));
        for node in previews.iter().filter(|p| p.wave == wave) {
            println!(
                "  {} {:<32} {}",
                action_symbol(node.action),
                node.node.to_string(),
                node.description.dimmed()
            );
        }
    }
}

fn action_symbol(action: PlannedAction) -> ColoredString {
    let symbol = action.symbol();
    match action {
        PlannedAction::Create => symbol.green(),
        PlannedAction::Adopt => symbol.cyan(),
        PlannedAction::Ensure => symbol.yellow(),
        PlannedAction::Missing => symbol.red().bold(),
        PlannedAction::Run => symbol.blue(),
        PlannedAction::Lookup | PlannedAction::Derive => symbol.normal(),
    }
}

fn print_summary(summary: &DiffSummary, refreshed: bool) {
    println!();
    if refreshed {
        ui::info(&format!(
            "{} to create, {} to adopt, {} to look up, {}",
            summary.create,
            summary.adopt,
            summary.lookup,
            ui::plural(summary.run, "step")
        ));
    } else {
        ui::info(&format!(
            "{} to create or adopt, {} to look up, {}",
            summary.ensure,
            summary.lookup,
            ui::plural(summary.run, "step")
        ));
        ui::dim("Run with --refresh to check provider state");
    }
    if summary.has_missing() {
        ui::warn(&format!(
            "{} looked-up resource(s) do not exist; apply will fail",
            summary.missing
        ));
    }
}
