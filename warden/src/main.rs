//! Warden supervisor
//!
//! Wires the event bus, HIL engine and registry together with the five
//! domain agents, feeding them simulated metrics, probes and security events.

mod simulated;

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use simulated::{random_security_event, SimulatedMetrics, SimulatedProbe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_agents::{
    ApprovalAgent, ErrorRecoveryAgent, HealthCheckAgent, LoggingExecutor, Monitor,
    MonitoringAgent, ProbeChecker, SecurityAgent, SystemResourceChecker,
};
use warden_bus::{EventBus, Topic};
use warden_core::{Agent, LogNotifier, NotificationSender, TokioScheduler, WardenConfig};
use warden_hil::HilEngine;
use warden_registry::AgentRegistry;

fn cli() -> Command {
    Command::new("warden")
        .version(warden_core::VERSION)
        .about("Autonomous agent supervisor with human-in-the-loop escalation")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Start every agent and supervise until interrupted")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML configuration file"),
                )
                .arg(
                    Arg::new("duration-secs")
                        .long("duration-secs")
                        .value_parser(value_parser!(u64))
                        .help("Stop after this many seconds"),
                )
                .arg(
                    Arg::new("json-logs")
                        .long("json-logs")
                        .action(ArgAction::SetTrue)
                        .help("Emit logs as JSON"),
                ),
        )
        .subcommand(Command::new("config").about("Print the default configuration as TOML"))
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("run", args)) => {
            init_tracing(args.get_flag("json-logs"));
            let config = match args.get_one::<PathBuf>("config") {
                Some(path) => WardenConfig::load(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => WardenConfig::default(),
            };
            let duration = args.get_one::<u64>("duration-secs").copied().map(Duration::from_secs);
            run(config, duration).await
        }
        Some(("config", _)) => {
            print!("{}", WardenConfig::default().to_toml_string()?);
            Ok(())
        }
        _ => Ok(()),
    }
}

async fn run(config: WardenConfig, duration: Option<Duration>) -> anyhow::Result<()> {
    let bus = EventBus::with_capacity(config.bus.history_capacity);
    let notifier: Arc<dyn NotificationSender> = Arc::new(LogNotifier);
    let hil = Arc::new(HilEngine::new(config.hil.clone(), Arc::clone(&notifier)));
    let registry = Arc::new(
        AgentRegistry::new(bus.clone(), Arc::new(TokioScheduler::new())).with_hil(hil.clone()),
    );

    let _trace = bus.subscribe_fn(Topic::All, |event| async move {
        tracing::debug!(kind = %event.kind, agent = %event.agent, "event");
        Ok(())
    });

    let agents = &config.agents;
    let approval = Arc::new(ApprovalAgent::new(agents.approval_interval(), Arc::new(LoggingExecutor)));
    let monitoring = Arc::new(
        MonitoringAgent::new(agents.monitoring_interval(), Arc::clone(&notifier))
            .with_monitor(Monitor::performance(Arc::new(SimulatedMetrics::performance())))
            .with_monitor(Monitor::error(Arc::new(SimulatedMetrics::errors())))
            .with_monitor(Monitor::security(Arc::new(SimulatedMetrics::security())))
            .with_monitor(Monitor::business(Arc::new(SimulatedMetrics::business())))
            .with_ticket_sink(approval.clone()),
    );
    let health = Arc::new(
        HealthCheckAgent::new(agents.health_check_interval(), Arc::clone(&notifier))
            .with_checker(Arc::new(ProbeChecker::new(
                "database",
                Arc::new(SimulatedProbe::new(5..120, 0.02)),
                Duration::from_millis(100),
            )))
            .with_checker(Arc::new(ProbeChecker::new(
                "cache",
                Arc::new(SimulatedProbe::new(1..20, 0.01)),
                Duration::from_millis(50),
            )))
            .with_checker(Arc::new(SystemResourceChecker::new(Arc::new(SimulatedMetrics::system())))),
    );
    let security = Arc::new(SecurityAgent::new(agents.security_interval(), Arc::clone(&notifier)));
    let recovery = Arc::new(ErrorRecoveryAgent::new(agents.retry.clone()));

    let catalog: [Arc<dyn Agent>; 5] = [
        health,
        monitoring,
        recovery,
        approval,
        security.clone(),
    ];
    for agent in catalog {
        registry.register(agent).await?;
    }

    let started = registry.start_all().await;
    if !started.all_succeeded() {
        tracing::warn!(failed = ?started.failed, "some agents failed to start");
    }
    let monitor = registry.spawn_health_monitor(config.registry.health_poll_interval());

    let feeder = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3));
        loop {
            ticker.tick().await;
            security.submit_event(random_security_event());
        }
    });

    tracing::info!(agents = ?registry.names(), "warden running");
    match duration {
        Some(limit) => {
            tokio::select! {
                _ = tokio::time::sleep(limit) => tracing::info!("run duration elapsed"),
                r = tokio::signal::ctrl_c() => r.context("listening for ctrl-c")?,
            }
        }
        None => tokio::signal::ctrl_c().await.context("listening for ctrl-c")?,
    }

    feeder.abort();
    monitor.cancel();
    let stopped = registry.stop_all().await;
    let report = registry.health_report();
    let stats = hil.stats();
    tracing::info!(
        stopped = stopped.succeeded.len(),
        overall = %report.overall,
        hil_escalated = stats.escalated,
        "warden stopped"
    );
    Ok(())
}
