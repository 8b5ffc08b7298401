use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use nocard_core::{
    DashboardSnapshot, ErrorBody, ExportRow, LoginStatus, SecurityEvent, SecurityStats,
};
use reqwest::blocking::{Client, Response};
use reqwest::Url;
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(name = "nocard", version, about = "NoCard2Pay security monitor CLI")]
struct Cli {
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    server_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Recent security events, newest first
    Events {
        #[arg(long)]
        subject: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Stats {
        #[arg(long, default_value_t = 24)]
        lookback_hours: u64,
    },
    Dashboard {
        #[arg(long)]
        subject: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Admin security report
    Export {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Lockout state of a subject
    Status { subject: String },
    CheckLimit {
        action: String,
        subject: String,
        #[arg(long, default_value_t = 5)]
        limit: u32,
        #[arg(long, default_value_t = 60)]
        window_secs: u64,
    },
    /// Report a login outcome
    Login {
        subject: String,
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        failed: bool,
    },
    Logout { subject: String },
}

#[derive(Debug, Serialize)]
struct RateLimitRequest {
    action: String,
    subject: String,
    limit: u32,
    window_ms: u64,
}

#[derive(Debug, Serialize)]
struct LoginRequest {
    subject: String,
    device: Option<String>,
    success: bool,
}

#[derive(Debug, Serialize)]
struct LogoutRequest {
    subject: String,
}

/// Passes successful responses through and turns error bodies into errors.
fn checked(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text()?;
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => bail!("{} ({}): {}", body.code, status.as_u16(), body.message),
        Err(_) => bail!("request failed with {status}: {text}"),
    }
}

/// `{base}/auth/status/{subject}` with the subject as one escaped segment.
fn status_url(base: &str, subject: &str) -> Result<Url> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|()| anyhow!("server url {base} cannot take a path"))?
        .pop_if_empty()
        .extend(["auth", "status", subject]);
    Ok(url)
}

fn print_events(events: &[SecurityEvent]) {
    if events.is_empty() {
        println!("no events");
    }
    for event in events {
        println!(
            "{} {:<19} {:<8} {:<12} {}",
            event.timestamp,
            event.kind.as_str(),
            event.risk_level.as_str(),
            event.subject.as_deref().unwrap_or("-"),
            serde_json::to_string(&event.details).unwrap_or_default()
        );
    }
}

fn print_stats(stats: &SecurityStats) {
    println!("total events: {}", stats.total_events);
    for (kind, count) in &stats.by_type {
        println!("  {:<19} {count}", kind.as_str());
    }
    for (risk, count) in &stats.by_risk {
        println!("  {:<19} {count}", risk.as_str());
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base = cli.server_url.trim_end_matches('/');

    match cli.command {
        Commands::Events { subject, limit } => {
            let mut request = client
                .get(format!("{base}/events"))
                .query(&[("limit", limit.to_string())]);
            if let Some(subject) = subject {
                request = request.query(&[("subject", subject)]);
            }
            let events: Vec<SecurityEvent> = checked(request.send()?)?.json()?;
            print_events(&events);
        }
        Commands::Stats { lookback_hours } => {
            let lookback_ms = lookback_hours.saturating_mul(60 * 60 * 1_000);
            let response = client
                .get(format!("{base}/stats"))
                .query(&[("lookback_ms", lookback_ms)])
                .send()?;
            let stats: SecurityStats = checked(response)?.json()?;
            print_stats(&stats);
        }
        Commands::Dashboard { subject, limit } => {
            let mut request = client
                .get(format!("{base}/dashboard"))
                .query(&[("limit", limit.to_string())]);
            if let Some(subject) = subject {
                request = request.query(&[("subject", subject)]);
            }
            let snapshot: DashboardSnapshot = checked(request.send()?)?.json()?;
            if snapshot.degraded {
                println!("warning: monitor storage is degraded");
            }
            print_stats(&snapshot.stats);
            println!();
            print_events(&snapshot.recent);
        }
        Commands::Export { limit } => {
            let response = client
                .get(format!("{base}/export"))
                .query(&[("limit", limit)])
                .send()?;
            let rows: Vec<ExportRow> = checked(response)?.json()?;
            for row in rows {
                println!(
                    "{} {} {} {} {} {}",
                    row.id,
                    row.timestamp,
                    row.kind.as_str(),
                    row.user_id,
                    row.risk_level.as_str(),
                    row.details
                );
            }
        }
        Commands::Status { subject } => {
            let response = client.get(status_url(base, &subject)?).send()?;
            let status: LoginStatus = checked(response)?.json()?;
            match status.blocked_for_secs {
                Some(secs) => println!("{subject}: blocked for {secs}s"),
                None => println!(
                    "{subject}: {} failed, {} attempts remaining",
                    status.failed_attempts, status.attempts_remaining
                ),
            }
        }
        Commands::CheckLimit {
            action,
            subject,
            limit,
            window_secs,
        } => {
            let body = RateLimitRequest {
                action,
                subject,
                limit,
                window_ms: window_secs.saturating_mul(1_000),
            };
            let response = client
                .post(format!("{base}/rate-limit/check"))
                .json(&body)
                .send()?;
            println!("{}", checked(response)?.text()?);
        }
        Commands::Login {
            subject,
            device,
            failed,
        } => {
            let body = LoginRequest {
                subject,
                device,
                success: !failed,
            };
            let response = client
                .post(format!("{base}/auth/login"))
                .json(&body)
                .send()?;
            println!("{}", checked(response)?.text()?);
        }
        Commands::Logout { subject } => {
            let response = client
                .post(format!("{base}/auth/logout"))
                .json(&LogoutRequest { subject })
                .send()?;
            println!("{}", checked(response)?.text()?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::status_url;

    #[test]
    fn status_url_escapes_the_subject() {
        let url = status_url("http://127.0.0.1:8080", "ana/x?y#z").unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8080/auth/status/ana%2Fx%3Fy%23z"
        );
    }

    #[test]
    fn status_url_keeps_a_base_path() {
        let url = status_url("http://monitor.local/api", "ana").unwrap();
        assert_eq!(url.as_str(), "http://monitor.local/api/auth/status/ana");
    }

    #[test]
    fn status_url_rejects_bad_bases() {
        assert!(status_url("not a url", "ana").is_err());
        assert!(status_url("mailto:ops@example.com", "ana").is_err());
    }
}
