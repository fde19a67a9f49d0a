//! preset_host CLI
//!
//! Usage:
//!   preset_host
//!   preset_host --preset race --templates
//!   preset_host --docker --use-env-vars --templates
//!   preset_host --expand-only --delete-old-presets

use preset_host::{
    setup_shutdown, ExpansionOptions, HostArgs, HostConfig, HostError, HostLayout, Supervisor,
    TemplateExpander,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args: HostArgs = argh::from_env();

    let env = env_logger::Env::default().default_filter_or(args.log_filter());
    env_logger::init_from_env(env);

    match run(args).await {
        Ok(()) => {
            log::info!("preset_host exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: HostArgs) -> Result<(), HostError> {
    let base = args
        .base_dir
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let layout = HostLayout::new(base);
    log::info!("Base directory: {}", layout.base().display());

    if args.expands_templates() {
        let options = ExpansionOptions {
            use_env_fallback: args.use_env_vars,
            delete_old_presets: args.delete_old_presets,
        };
        let result = TemplateExpander::new(&layout, options).expand();
        if args.expand_only {
            return result.map(drop).map_err(HostError::from);
        }
        if let Err(e) = result {
            log::error!("Template expansion failed, starting with existing presets: {}", e);
        }
    }

    let mut config = HostConfig::new(layout);
    config.preset = args.preset();
    config.docker = args.docker;
    config.executable = args.executable.clone();
    config.seed = args.seed;

    let supervisor = Supervisor::new(config)?;
    let (_shutdown_tx, shutdown_rx) = setup_shutdown()?;

    supervisor.run(shutdown_rx).await?;
    Ok(())
}
