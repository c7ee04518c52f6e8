//! Stackup CLI
//!
//! Usage:
//!   stackup stacks/local-ai.stack.yaml
//!   stackup stacks/local-ai.stack.yaml -a project:=demo -g infrastructure
//!   stackup stacks/local-ai.stack.yaml --dry-run
//!   stackup stacks/local-ai.stack.yaml --down

use anyhow::Context;
use stackup::{CancelSignal, Orchestrator, Stack, StackFile, StackupArgs};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let args: StackupArgs = argh::from_env();

    let env = env_logger::Env::default().default_filter_or(args.log_filter());
    env_logger::init_from_env(env);

    match run(args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            log::error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: StackupArgs) -> anyhow::Result<i32> {
    log::info!("Loading stack file: {}", args.stack_file);
    let file = StackFile::from_file(&args.stack_file)
        .with_context(|| format!("loading '{}'", args.stack_file))?;

    let stack = Stack::new(file, args.selection(), args.arg_overrides())?;
    let graph = stack.build_graph()?;

    if args.validate {
        let file = stack.file();
        println!("Stack file '{}' is valid", args.stack_file);
        println!("  Version: {}", file.version);
        println!("  Args: {}", file.args.len());
        println!("  Services: {} ({} selected)", file.services.len(), graph.len());
        println!("  Batches: {}", graph.batches().len());
        println!("  Groups: {}", file.groups().join(", "));
        return Ok(0);
    }

    if args.dry_run {
        println!("{}", stack.plan()?);
        return Ok(0);
    }

    let launcher = stack.launcher()?;
    let orchestrator = Orchestrator::new(Arc::new(launcher), stack.orchestrator_config());

    if args.down {
        let results = orchestrator.teardown(&graph).await;
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        if failed > 0 {
            anyhow::bail!("{} of {} services failed to stop", failed, results.len());
        }
        return Ok(0);
    }

    let (trigger, shutdown) = CancelSignal::pair();
    ctrlc::set_handler(move || {
        if trigger.is_cancelled() {
            log::warn!("Received second Ctrl+C, exiting immediately");
            std::process::exit(130);
        }
        log::info!("Received Ctrl+C, aborting startup...");
        trigger.cancel();
    })
    .context("installing Ctrl+C handler")?;

    let report = orchestrator.run(&graph, shutdown).await;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report);
    }

    Ok(report.outcome.exit_code())
}
