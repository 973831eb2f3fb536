use anyhow::{Context, Result};
use clap::Parser;
use launcher::{
    DockerRuntime, HostContext, HostIdentity, LaunchOptions, LaunchPlan, Launcher, ProcessEnv,
    DEFAULT_IMAGE, DEFAULT_SHELL,
};
use std::io::IsTerminal;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

/// Run a command in a hardened, disposable container rooted at the current directory.
#[derive(Parser, Debug)]
#[command(name = "dockerx", version)]
struct Cli {
    /// Image to run
    #[arg(long, env = "DOCKERX_IMAGE", default_value = DEFAULT_IMAGE)]
    image: String,

    /// Shell started when no command is given
    #[arg(long, default_value = DEFAULT_SHELL)]
    shell: String,

    /// Do not force a pull of the dockerx image
    #[arg(long)]
    no_pull: bool,

    /// Do not mount host configuration into the sandbox
    #[arg(long)]
    no_config: bool,

    /// Print the launch plan without running anything
    #[arg(long)]
    dry_run: bool,

    /// Print the launch plan and debug logs before running
    #[arg(short, long)]
    verbose: bool,

    /// Print the launch plan as JSON (implies printing it)
    #[arg(long)]
    json: bool,

    /// Container runtime executable, by name or path
    #[arg(long, env = "DOCKERX_RUNTIME", default_value = "docker")]
    runtime: String,

    /// Run as this uid:gid instead of the current user
    #[arg(long, env = "DOCKERX_USER", value_name = "UID:GID")]
    user: Option<HostIdentity>,

    /// Limit for each read of the image's credential databases
    #[arg(
        long,
        env = "DOCKERX_INTROSPECT_TIMEOUT",
        default_value = "60s",
        value_parser = humantime::parse_duration
    )]
    introspect_timeout: Duration,

    /// Command to run inside the container
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "error" })
    });
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("dockerx: {:#}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let runtime = DockerRuntime::locate(&cli.runtime)?.with_capture_timeout(cli.introspect_timeout);
    let host = HostContext::resolve()?;

    let options = LaunchOptions {
        image: cli.image.trim().to_string(),
        shell: cli.shell,
        command: cli.command,
        no_pull: cli.no_pull,
        no_config: cli.no_config,
        dry_run: cli.dry_run,
        identity: cli.user.or_else(HostIdentity::current),
        tty: std::io::stdin().is_terminal() && std::io::stdout().is_terminal(),
    };
    tracing::debug!(
        runtime = %runtime.program().display(),
        identity = ?options.identity,
        tty = options.tty,
        "resolved launch options"
    );

    let launcher = Launcher::new(&runtime, &ProcessEnv);
    let prepared = launcher.prepare(&options, &host)?;

    if cli.verbose || cli.dry_run || cli.json {
        print_plan(prepared.plan(), cli.json)?;
    }
    if cli.dry_run {
        return Ok(());
    }

    prepared.execute(&runtime)?;
    Ok(())
}

fn print_plan(plan: &LaunchPlan, json: bool) -> Result<()> {
    if json {
        let rendered = serde_json::to_string_pretty(plan).context("serialize launch plan")?;
        println!("{}", rendered);
    } else {
        print!("{}", plan.render());
    }
    Ok(())
}
