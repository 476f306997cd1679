use std::{error::Error, process};

use nix::unistd::Uid;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use botdeploy::{
    cli::{Cli, Commands, parse_args},
    config::{DeploymentContext, load_config},
    constants::TOKEN_KEY,
    env_file::check_token,
    error::{AtStep, FailureKind, Step},
    lock::RunLock,
    logs,
    migrate,
    orchestrator::{Orchestrator, exit_code, soft_stop_for},
    provision::VirtualEnv,
    service::{ServiceManager, Systemctl},
    unit::ServiceUnitDefinition,
};

fn main() {
    let args = parse_args();

    let ctx = match resolve_context(&args) {
        Ok(ctx) => ctx,
        Err(err) => {
            init_logging(&args, None);
            error!("{err}");
            process::exit(FailureKind::Environment.exit_code());
        }
    };

    let writes_log = matches!(args.command, Commands::Run | Commands::Migrate);
    if writes_log && migrate::ensure_dir(&ctx.log_dir).is_ok() {
        init_logging(&args, Some(&ctx));
    } else {
        init_logging(&args, None);
    }

    let code = match dispatch(&args, &ctx) {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            FailureKind::Environment.exit_code()
        }
    };
    process::exit(code);
}

fn resolve_context(args: &Cli) -> Result<DeploymentContext, Box<dyn Error>> {
    let config = load_config(args.config.as_deref(), args.app_dir.as_deref())?;
    Ok(DeploymentContext::resolve(&config)?)
}

fn init_logging(args: &Cli, ctx: Option<&DeploymentContext>) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let log_file = ctx.map(|ctx| ctx.deploy_log.as_path());
    if let Err(err) = logs::init(filter, log_file) {
        eprintln!("Could not open deploy log, logging to stdout only: {err}");
        let fallback = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = logs::init(fallback, None);
    }
}

fn dispatch(args: &Cli, ctx: &DeploymentContext) -> Result<i32, Box<dyn Error>> {
    match &args.command {
        Commands::Run => Ok(run(ctx)),
        Commands::Migrate => Ok(migrate_only(ctx)),
        Commands::Plan => {
            plan(ctx);
            Ok(0)
        }
        Commands::Status => {
            status(ctx)?;
            Ok(0)
        }
        Commands::Logs { lines } => {
            logs::show_logs(&ctx.deploy_log, *lines)?;
            Ok(0)
        }
        Commands::RenderUnit => {
            print!("{}", ServiceUnitDefinition::for_context(ctx).render());
            Ok(0)
        }
    }
}

fn systemctl(ctx: &DeploymentContext) -> Systemctl {
    Systemctl::new(&ctx.systemctl, &ctx.journalctl, &ctx.unit_dir)
}

fn run(ctx: &DeploymentContext) -> i32 {
    if !Uid::effective().is_root() {
        warn!("Not running as root; installing and restarting the unit will likely fail");
    }
    info!("Reconciling deployment in {}", ctx.app_dir.display());

    let installer = VirtualEnv::new(&ctx.python);
    let manager = systemctl(ctx);
    let result = Orchestrator::new(ctx, &installer, &manager).run();
    exit_code(&result)
}

fn migrate_only(ctx: &DeploymentContext) -> i32 {
    let result = RunLock::acquire(&ctx.lock_path, ctx.lock_timeout)
        .at(Step::AcquireLock)
        .and_then(|lock| {
            let Some(_lock) = lock else {
                info!("Skipped, another run is in progress");
                return Ok(());
            };
            migrate::prepare_directories(ctx).at(Step::PrepareDirectories)?;
            let records = migrate::migrate(ctx).at(Step::MigrateData)?;
            info!("Migration finished ({} files considered)", records.len());
            Ok(())
        });

    match result {
        Ok(()) => 0,
        Err(failure) => {
            error!(step = %failure.step, "Migration failed: {}", failure.message());
            failure.exit_code()
        }
    }
}

fn plan(ctx: &DeploymentContext) {
    println!("Application: {}", ctx.app_dir.display());
    println!("Data directory: {}", ctx.data_dir.display());
    for record in migrate::plan(ctx) {
        println!("  {:<24} {}", record.file, record.decision);
    }

    let check = check_token(&ctx.env_file, TOKEN_KEY);
    match soft_stop_for(&check) {
        Some(reason) => println!("Credentials: not ready ({reason})"),
        None => println!("Credentials: ready"),
    }

    if ctx.unit_source.is_file() {
        println!("Unit: {} -> {}", ctx.unit_source.display(), ctx.unit_dest.display());
    } else {
        println!("Unit: {} missing, service will not be restarted", ctx.unit_source.display());
    }
}

fn status(ctx: &DeploymentContext) -> Result<(), Box<dyn Error>> {
    let manager = systemctl(ctx);
    let status = manager.status(&ctx.unit_name)?;
    println!("{}: {}", ctx.unit_name, status.state);
    if !status.summary.is_empty() {
        println!("{}", status.summary);
    }

    match manager.tail_log(&ctx.unit_name, ctx.tail_lines) {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
        }
        Err(err) => warn!("Could not read the journal of {}: {err}", ctx.unit_name),
    }
    Ok(())
}
