use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use framecut_backend::{server, Session};
use framecut_core::{BackendConfig, ConfigError, FrameCutError, OutputSize, ServiceSettings};

#[derive(Parser, Debug)]
#[command(
    name = "framecut-backend",
    version,
    about = "FrameCut render backend",
    long_about = "Render backend for the FrameCut editor.\nServes line-delimited JSON requests on a local pipe and renders timeline frames to PNG files."
)]
struct BackendArgs {
    /// Name of the control channel the editor connects to
    #[arg(long)]
    pipe: Option<String>,

    /// Name of the raw-data channel
    #[arg(long)]
    raw_data_pipe: Option<String>,

    /// Output frame size as <width>,<height>
    #[arg(long)]
    output_options: Option<String>,

    /// Folder rendered frames are written to
    #[arg(long)]
    temp_folder: Option<PathBuf>,

    /// Accelerator to run kernels on: auto, cpu or gpu
    #[arg(long)]
    accelerator_type: Option<String>,

    /// Index of the GPU adapter to use
    #[arg(long)]
    accelerator_device_id: Option<usize>,

    /// Serialize every kernel dispatch
    #[arg(long)]
    force_sync: bool,

    /// TOML file with backend settings; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
}

impl BackendArgs {
    /// Merge the flags over the config file (if any) and validate.
    fn settings(&self) -> Result<ServiceSettings, ConfigError> {
        let mut config = match &self.config {
            Some(path) => BackendConfig::load_from_file(path)?,
            None => BackendConfig::default(),
        };
        if let Some(pipe) = &self.pipe {
            config.pipe = Some(pipe.clone());
        }
        if let Some(pipe) = &self.raw_data_pipe {
            config.raw_data_pipe = Some(pipe.clone());
        }
        if let Some(output) = &self.output_options {
            config.output = Some(output.parse::<OutputSize>()?);
        }
        if let Some(folder) = &self.temp_folder {
            config.temp_folder = Some(folder.clone());
        }
        if let Some(selector) = &self.accelerator_type {
            config.accelerator.selector = selector.parse()?;
        }
        if let Some(device_id) = self.accelerator_device_id {
            config.accelerator.device_id = device_id;
        }
        if self.force_sync {
            config.accelerator.force_sync = true;
        }
        config.validate()
    }
}

fn main() -> ExitCode {
    let args = match BackendArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // Logs go to stderr; the control channel carries only protocol lines.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

/// 2 for accelerator problems, 1 for everything else.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(ConfigError::UnsupportedAccelerator(_)) = cause.downcast_ref::<ConfigError>() {
            return 2;
        }
        if let Some(FrameCutError::Device(_)) = cause.downcast_ref::<FrameCutError>() {
            return 2;
        }
    }
    1
}

fn run(args: BackendArgs) -> Result<()> {
    let settings = args.settings().context("Invalid backend configuration")?;
    tracing::info!(
        "Starting FrameCut backend v{} (output {}, temp folder {})",
        env!("CARGO_PKG_VERSION"),
        settings.output,
        settings.temp_folder.display()
    );

    let session = Session::from_settings(&settings).context("Failed to start the renderer")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    runtime.block_on(async {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, shutting down");
                let _ = cancel_tx.send(true);
            }
        });
        server::run(&settings, session, cancel_rx)
            .await
            .context("Backend service failed")
    })
}
