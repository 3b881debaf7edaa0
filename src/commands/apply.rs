//! `stackup apply` - converge resources, then bootstrap the host.

use anyhow::Result;
use converge::{CancelFlag, ConnectionTarget, Executor, RunSummary, build_plan, preview};
use dialoguer::Confirm;

use crate::Context;
use crate::cli::ApplyArgs;
use crate::commands;
use crate::commands::plan::print_plan;
use crate::progress::ApplyProgress;
use crate::stack::Stack;
use crate::ui;

pub fn run(ctx: &Context, args: &ApplyArgs, cancel: CancelFlag) -> Result<()> {
    let commands::Loaded {
        config,
        secrets,
        mut stack,
    } = commands::load(ctx)?;
    let plan = build_plan(&stack.store, &stack.steps)?;

    if !ctx.quiet {
        let previews = preview(&plan, &stack.store, &stack.steps, None)?;
        print_plan(&stack.name, &previews, plan.waves.len());
        println!();
    }

    if !args.yes && !confirm_proceed(&stack.name)? {
        ui::info("Nothing applied");
        return Ok(());
    }

    let provider = commands::provider(&config, &secrets)?;
    let transport = commands::transport(&config)?;
    let progress = ApplyProgress::new(ctx.quiet, ctx.verbose);

    let result = Executor::new(&provider, &transport)
        .with_options(config.execute_options(usize::from(args.jobs)))
        .with_cancel(cancel)
        .with_progress(&progress)
        .execute(&plan, &mut stack.store, &stack.steps);
    progress.finish();

    let summary = result?;
    if !ctx.quiet {
        print_summary(&stack, &summary);
    }
    Ok(())
}

fn confirm_proceed(stack: &str) -> Result<bool> {
    let confirmed = Confirm::new()
        .with_prompt(format!("Apply stack '{stack}'?"))
        .default(false)
        .interact()?;
    Ok(confirmed)
}

fn print_summary(stack: &Stack, summary: &RunSummary) {
    println!();
    ui::success(&format!("Stack '{}' applied", stack.name));
    ui::kv("created", &summary.created.to_string());
    ui::kv("adopted", &summary.adopted.to_string());
    if summary.looked_up > 0 {
        ui::kv("looked up", &summary.looked_up.to_string());
    }
    ui::kv("steps run", &summary.steps_run.to_string());
    if summary.steps_skipped > 0 {
        ui::kv("steps skipped", &summary.steps_skipped.to_string());
    }

    if let Some(target) = stack
        .store
        .resolved(&stack.ids.connection)
        .and_then(ConnectionTarget::from_resolved)
    {
        ui::kv("connect", &ssh_command(&target));
    }
}

fn ssh_command(target: &ConnectionTarget) -> String {
    format!("ssh -i {} {target}", target.private_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_command() {
        let target = ConnectionTarget {
            host: "2001:db8:1::1".into(),
            user: "root".into(),
            private_key: "/state/keys/default".into(),
        };
        assert_eq!(
            ssh_command(&target),
            "ssh -i /state/keys/default root@2001:db8:1::1"
        );
    }
}
