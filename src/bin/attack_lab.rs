/// Attack Lab
///
/// Scripted run of the CAN security simulator: a clean baseline, then each
/// attack against the measure meant to stop it. Prints a summary of every
/// phase and optionally the final snapshot as JSON.
///
/// Usage: attack_lab [--config <file.json>] [--phase-secs <n>] [--json]
use canbus_sim::snapshot::SimulationSnapshot;
use canbus_sim::{SimConfig, Simulation};
use colored::*;
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct Options {
    config: Option<String>,
    phase: Duration,
    json: bool,
}

struct Phase {
    title: &'static str,
    security: &'static [(&'static str, bool)],
    attack: Option<&'static str>,
}

const PHASES: &[Phase] = &[
    Phase {
        title: "Baseline (no security, no attack)",
        security: &[],
        attack: None,
    },
    Phase {
        title: "Spoofing, authentication OFF",
        security: &[],
        attack: Some("spoofing"),
    },
    Phase {
        title: "Spoofing, authentication ON",
        security: &[("authentication", true)],
        attack: Some("spoofing"),
    },
    Phase {
        title: "Bus flooding, rate limiting ON",
        security: &[("authentication", false), ("rate_limiting", true)],
        attack: Some("bus_flooding"),
    },
    Phase {
        title: "Replay, encryption + authentication ON",
        security: &[("rate_limiting", false), ("encryption", true), ("authentication", true)],
        attack: Some("replay"),
    },
    Phase {
        title: "Replay, intrusion detection ON",
        security: &[("intrusion_detection", true)],
        attack: Some("replay"),
    },
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let options = parse_args();
    let config = match &options.config {
        Some(path) => SimConfig::from_json_file(path)?,
        None => SimConfig::reference_vehicle(),
    };

    println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    println!("{}", "          CAN Bus Security Attack Lab                          ".cyan().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    println!();

    let sim = Simulation::new(config)?;
    sim.start()?;
    println!("{} Simulation running with {} ECUs", "✓".green(), sim.config().nodes.len());
    println!();

    for (index, phase) in PHASES.iter().enumerate() {
        println!(
            "{} {}",
            format!("[{}/{}]", index + 1, PHASES.len()).blue().bold(),
            phase.title.yellow().bold()
        );
        for (measure, enabled) in phase.security {
            sim.toggle_security(measure, *enabled)?;
        }
        if let Some(attack) = phase.attack {
            sim.start_attack(attack)?;
        }

        tokio::time::sleep(options.phase).await;
        print_summary(&sim.get_snapshot());

        if let Some(attack) = phase.attack {
            sim.stop_attack(attack)?;
        }
        println!();
    }

    let snapshot = sim.get_snapshot();
    sim.shutdown().await;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    println!("{} Attack lab finished", "✓".green().bold());
    Ok(())
}

fn print_summary(snapshot: &SimulationSnapshot) {
    let stats = &snapshot.security_stats;
    println!(
        "  {} transmitted={} delivered={} blocked={} queued={}",
        "BUS".cyan().bold(),
        snapshot.bus.transmitted,
        snapshot.bus.deliveries,
        snapshot.bus.blocked,
        snapshot.bus.queue_depth
    );
    println!(
        "  {} detected={} blocked={} successful={} rate_limited={} anomalies={} starved={}",
        "SECURITY".cyan().bold(),
        stats.attacks_detected,
        stats.attacks_blocked,
        stats.attacks_successful,
        stats.rate_limit_violations,
        stats.anomalies_detected,
        stats.starved_frames
    );

    for attack in &snapshot.attacks {
        println!(
            "  {} {} attempts={} delivered={} blocked={} detected={} success={:.1}% detection={:.1}%",
            "ATTACK".red().bold(),
            attack.kind.to_string().bright_red(),
            attack.counters.attempts,
            attack.counters.delivered,
            attack.counters.blocked,
            attack.counters.detected,
            attack.success_rate,
            attack.detection_rate
        );
    }

    for node in &snapshot.nodes {
        let glyph = match node.health {
            canbus_sim::HealthState::Healthy => "●".green(),
            canbus_sim::HealthState::Warning => "●".yellow(),
            canbus_sim::HealthState::Compromised => "●".red(),
        };
        let latency = node
            .average_latency_us
            .map(|us| format!("{:.2} ms", us as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} {:<16} {:<12} avg latency {}",
            glyph,
            node.name.bright_white(),
            node.health.to_string(),
            latency
        );
    }

    for warning in &snapshot.warnings {
        println!("  {} {}", "⚠".yellow().bold(), warning.message.yellow());
    }
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        config: None,
        phase: Duration::from_secs(3),
        json: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let Some(path) = args.get(i + 1) else {
                    eprintln!("{} Missing value for --config", "✗".red());
                    process::exit(1);
                };
                options.config = Some(path.clone());
                i += 2;
            }
            "--phase-secs" | "-p" => {
                let Some(secs) = args.get(i + 1).and_then(|s| s.parse().ok()) else {
                    eprintln!("{} --phase-secs expects a whole number of seconds", "✗".red());
                    process::exit(1);
                };
                options.phase = Duration::from_secs(secs);
                i += 2;
            }
            "--json" => {
                options.json = true;
                i += 1;
            }
            "--help" | "-h" => {
                println!("Usage: attack_lab [--config <file.json>] [--phase-secs <n>] [--json]");
                process::exit(0);
            }
            other => {
                eprintln!("{} Unknown argument: {}", "✗".red(), other);
                process::exit(1);
            }
        }
    }
    options
}
