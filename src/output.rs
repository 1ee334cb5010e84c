// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use serde::Serialize;
use std::time::Instant;

use crate::deploy::Deployment;
use crate::notify::{Severity, TransitionEvent};

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

impl OutputMode {
    pub fn from_flags(quiet: bool, json: bool) -> Self {
        if json {
            OutputMode::Json
        } else if quiet {
            OutputMode::Quiet
        } else {
            OutputMode::Normal
        }
    }
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a warning (suppressed in json mode).
    pub fn warning(&self, message: &str) {
        if self.mode != OutputMode::Json {
            eprintln!("Warning: {message}");
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => {
                println!("{message}");
            }
            OutputMode::Json => {
                print_json(&JsonEvent {
                    event: "success",
                    message,
                    duration_secs: self.duration(),
                });
            }
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => {
                let event = JsonEvent {
                    event: "error",
                    message,
                    duration_secs: self.duration(),
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    eprintln!("{json}");
                }
            }
        }
    }

    /// Print one state transition as it happens.
    pub fn transition(&self, event: &TransitionEvent) {
        match self.mode {
            OutputMode::Normal => {
                let marker = match event.severity {
                    Severity::Info => "→",
                    Severity::Alert => "!",
                };
                let split = event.traffic_split;
                let mut line = format!(
                    "  {marker} {} → {} (stable {}% / candidate {}%)",
                    event.from,
                    event.to,
                    split.stable(),
                    split.candidate()
                );
                if let Some(cause) = &event.cause {
                    line.push_str(&format!(": {}", cause.message));
                }
                println!("{line}");
            }
            OutputMode::Quiet => {}
            OutputMode::Json => print_json(&TransitionLine {
                event: "transition",
                transition: event,
            }),
        }
    }

    /// Print a one-line summary per deployment.
    pub fn deployments(&self, deployments: &[Deployment]) {
        match self.mode {
            OutputMode::Json => {
                for d in deployments {
                    print_json(d);
                }
            }
            OutputMode::Normal | OutputMode::Quiet => {
                if deployments.is_empty() {
                    self.progress("No deployments recorded");
                }
                for d in deployments {
                    let frozen = if d.manual_intervention_required() {
                        " [manual intervention required]"
                    } else {
                        ""
                    };
                    println!(
                        "{}  {}  {}  {}  candidate {}%  {}{frozen}",
                        d.id(),
                        d.service(),
                        d.status(),
                        d.target_image_digest().short(),
                        d.traffic_split().candidate(),
                        d.updated_at().format("%Y-%m-%d %H:%M:%S"),
                    );
                }
            }
        }
    }

    /// Print one deployment with its stage history.
    pub fn deployment_detail(&self, d: &Deployment) {
        if self.mode == OutputMode::Json {
            print_json(d);
            return;
        }

        println!("Deployment: {}", d.id());
        println!("Service:    {}", d.service());
        println!("Status:     {}", d.status());
        println!("Target:     {}", d.target_image_digest());
        println!(
            "Stable:     {} {}",
            d.stable_variant().color,
            d.stable_variant().image_digest
        );
        if let Some(candidate) = d.candidate_variant() {
            println!("Candidate:  {} {}", candidate.color, candidate.image_digest);
        }
        println!(
            "Traffic:    stable {}% / candidate {}%",
            d.traffic_split().stable(),
            d.traffic_split().candidate()
        );
        if let Some(pending) = d.pending_split() {
            println!(
                "Pending:    stable {}% / candidate {}%",
                pending.stable(),
                pending.candidate()
            );
        }
        if let Some(err) = d.last_error() {
            println!("Last error: [{:?}] {} at {}", err.kind, err.message, err.stage);
        }
        if d.manual_intervention_required() {
            println!("Manual intervention required: run `pdo retry-rollback {}`", d.id());
        }

        if self.mode == OutputMode::Normal && !d.stage_history().is_empty() {
            println!();
            println!("History:");
            for record in d.stage_history() {
                let secs = (record.exited_at - record.entered_at).num_seconds();
                println!(
                    "  {:<26} {:<12} {:>5}s  candidate {}%",
                    record.stage.as_str(),
                    format!("{:?}", record.outcome).to_lowercase(),
                    secs,
                    record.traffic.candidate(),
                );
            }
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    if let Ok(json) = serde_json::to_string(value) {
        println!("{json}");
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

#[derive(Serialize)]
struct TransitionLine<'a> {
    event: &'a str,
    #[serde(flatten)]
    transition: &'a TransitionEvent,
}
