use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use live_reception::{
    AppConfig, AppointmentStore, BookAppointmentTool, CpalAudioBackend, GeminiLiveConnector,
    SessionController, SessionHandle, SessionSettings, SessionState, ToolCallDispatcher,
};

/// Live Reception - voice receptionist on the Gemini Live API
#[derive(Parser, Debug)]
#[command(name = "live-reception")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Start the session immediately
    #[arg(long)]
    autostart: bool,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the declared tool schemas as JSON
    Tools,
}

const HELP: &str = "Commands: [t]oggle, [s]tart, [x] stop, [a]ppointments, [q]uit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let appointments = AppointmentStore::new();
    let tools = Arc::new(
        ToolCallDispatcher::new()
            .with_handler(Arc::new(BookAppointmentTool::new(appointments.clone()))),
    );

    if let Some(Commands::Tools) = cli.command {
        println!("{}", serde_json::to_string_pretty(&tools.declarations())?);
        return Ok(());
    }

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        AppConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        AppConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    if !config.has_api_key() {
        tracing::warn!("No API key configured; set GEMINI_API_KEY before starting a session");
    }

    let audio = Arc::new(CpalAudioBackend::new(
        config.input_device.clone(),
        config.output_device.clone(),
    ));
    let connector = Arc::new(GeminiLiveConnector::new(
        config.live_url.clone(),
        config.outbound_queue_capacity,
    ));
    let controller = SessionController::new(
        SessionSettings::from_config(&config),
        audio,
        connector,
        tools,
    );
    drop(config);

    let (session, controller_task) = controller.spawn();
    info!("Live reception ready");

    spawn_status_printer(&session);
    spawn_appointment_printer(&appointments);

    if cli.autostart {
        session.start().await?;
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "t" | "toggle" => session.toggle().await?,
                    "s" | "start" => session.start().await?,
                    "x" | "stop" => session.stop().await?,
                    "a" | "appointments" => print_appointments(&appointments),
                    "q" | "quit" => break,
                    "" => {}
                    other => println!("Unknown command '{other}'. {HELP}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    session.shutdown().await?;
    controller_task.await?;
    Ok(())
}

fn spawn_status_printer(session: &SessionHandle) {
    let mut status = session.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            match (current.state, current.error) {
                (SessionState::Error, Some(message)) => println!("[{}] {}", current.state, message),
                (state, _) => println!("[{state}]"),
            }
        }
    });
}

fn spawn_appointment_printer(appointments: &AppointmentStore) {
    let store = appointments.clone();
    let mut changes = appointments.subscribe();
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            if let Some(latest) = store.list().first() {
                println!(
                    "Nuovo appuntamento: {} - {} {} ({})",
                    latest.patient_name, latest.date, latest.time, latest.visit_type
                );
            }
        }
    });
}

fn print_appointments(appointments: &AppointmentStore) {
    let list = appointments.list();
    if list.is_empty() {
        println!("Nessun appuntamento.");
        return;
    }
    for appointment in list {
        println!(
            "{}  {:<24} {:<20} {:<8} {}",
            appointment.id,
            appointment.patient_name,
            appointment.date,
            appointment.time,
            appointment.visit_type
        );
    }
}
