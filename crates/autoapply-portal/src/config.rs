use crate::chaos::{ChaosConfig, DEFAULT_FAILURE_RATE};
use autoapply_core::{
    env::{env_false, env_true, resolve_value},
    logging::{Console, LogSettings},
};
use clap::Parser;
use std::{collections::HashMap, time::Duration};

pub const DEFAULT_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_DB_PATH: &str = ".autoapply/portal.db";
pub const DEFAULT_LOG_DIR: &str = ".autoapply/logs";
pub const DEFAULT_SEED_JOBS: usize = 50;

#[derive(Parser, Debug, Default)]
#[command(name = "autoapply-portal")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub addr: String,
    #[arg(long, default_value = "")]
    pub db: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    #[arg(long)]
    pub chaos_rate: Option<f64>,
    #[arg(long, default_value_t = false)]
    pub no_chaos: bool,
    #[arg(long, default_value_t = DEFAULT_SEED_JOBS)]
    pub seed_jobs: usize,
    /// `email:token[:display name[:skill;skill...]]`, repeatable.
    #[arg(long = "credential")]
    pub credentials: Vec<String>,
    #[arg(long, default_value_t = 10)]
    pub ping_interval: u64,
    #[arg(long, default_value_t = 2)]
    pub write_timeout: u64,
    #[arg(long, default_value_t = 30)]
    pub stale_seconds: u64,
    #[arg(long, default_value_t = 500)]
    pub apply_pacing_ms: u64,
    #[arg(long, default_value_t = autoapply_core::retry::DEFAULT_MAX_ATTEMPTS)]
    pub max_apply_attempts: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PortalConfig {
    pub addr: String,
    pub db_path: String,
    pub log_dir: String,
    pub debug: bool,
    pub chaos: ChaosConfig,
    pub seed_jobs: usize,
    pub credentials: Vec<Credential>,
    pub stream: StreamConfig,
    pub apply_pacing: Duration,
    pub max_apply_attempts: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    pub ping_interval: Duration,
    pub write_timeout: Duration,
    pub stale_seconds: u64,
    pub max_frame_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            write_timeout: Duration::from_secs(2),
            stale_seconds: 30,
            max_frame_bytes: autoapply_core::stream_event::DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl PortalConfig {
    pub fn log_settings(&self) -> LogSettings {
        LogSettings::new("autoapply-portal", self.debug, Console::Stdout).with_dir(&self.log_dir)
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            db_path: DEFAULT_DB_PATH.to_string(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            debug: false,
            chaos: ChaosConfig::default(),
            seed_jobs: DEFAULT_SEED_JOBS,
            credentials: vec![Credential::demo()],
            stream: StreamConfig::default(),
            apply_pacing: Duration::from_millis(500),
            max_apply_attempts: autoapply_core::retry::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// A dashboard user and the bearer token that identifies them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub email: String,
    pub token: String,
    pub name: String,
    /// Profile skills the ranker matches against each job's required skills.
    pub skills: Vec<String>,
}

impl Credential {
    pub fn demo() -> Self {
        Self {
            email: "demo@autoapply.local".to_string(),
            token: "demo-token".to_string(),
            name: "Demo Applicant".to_string(),
            skills: ["Python", "TypeScript", "React", "Go", "Docker", "AWS", "PostgreSQL"]
                .iter()
                .map(|skill| skill.to_string())
                .collect(),
        }
    }

    /// Parses `email:token[:name[:skills]]` with `;`-separated skills. The name
    /// defaults to the email's local part.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.trim().splitn(4, ':');
        let email = parts.next()?.trim();
        let token = parts.next()?.trim();
        if email.is_empty() || token.is_empty() {
            return None;
        }
        let name = parts
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_string());
        let skills = parts
            .next()
            .map(|list| {
                list.split(';')
                    .map(str::trim)
                    .filter(|skill| !skill.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            email: email.to_string(),
            token: token.to_string(),
            name,
            skills,
        })
    }
}

/// Token lookup for the stream handshake and the bearer-authenticated routes.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    by_token: HashMap<String, Credential>,
}

impl Credentials {
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Self {
        Self {
            by_token: credentials
                .into_iter()
                .map(|credential| (credential.token.clone(), credential))
                .collect(),
        }
    }

    pub fn authenticate(&self, token: &str) -> Option<&Credential> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        self.by_token.get(token)
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

pub fn load_config() -> PortalConfig {
    config_from_args(Args::parse())
}

pub fn config_from_args(args: Args) -> PortalConfig {
    let addr = resolve_value(&args.addr, "AUTOAPPLY_ADDR", DEFAULT_ADDR);
    let db_path = resolve_value(&args.db, "AUTOAPPLY_DB", DEFAULT_DB_PATH);
    let log_dir = resolve_value(&args.log_dir, "AUTOAPPLY_LOG_DIR", DEFAULT_LOG_DIR);
    let debug = args.debug || env_true("AUTOAPPLY_DEBUG");
    let chaos = resolve_chaos(args.chaos_rate, args.no_chaos);
    let credentials = resolve_credentials(&args.credentials);
    PortalConfig {
        addr,
        db_path,
        log_dir,
        debug,
        chaos,
        seed_jobs: args.seed_jobs,
        credentials,
        stream: StreamConfig {
            ping_interval: Duration::from_secs(args.ping_interval),
            write_timeout: Duration::from_secs(args.write_timeout.max(1)),
            stale_seconds: args.stale_seconds,
            ..StreamConfig::default()
        },
        apply_pacing: Duration::from_millis(args.apply_pacing_ms),
        max_apply_attempts: args.max_apply_attempts.max(1),
    }
}

fn resolve_chaos(rate_flag: Option<f64>, no_chaos: bool) -> ChaosConfig {
    let rate = rate_flag.or_else(|| {
        std::env::var("AUTOAPPLY_CHAOS_RATE")
            .ok()
            .and_then(|value| value.trim().parse::<f64>().ok())
    });
    ChaosConfig {
        enabled: !(no_chaos || env_false("AUTOAPPLY_CHAOS")),
        failure_rate: sanitize_rate(rate),
    }
}

fn sanitize_rate(rate: Option<f64>) -> f64 {
    match rate {
        Some(value) if (0.0..=1.0).contains(&value) => value,
        _ => DEFAULT_FAILURE_RATE,
    }
}

fn resolve_credentials(flags: &[String]) -> Vec<Credential> {
    let mut raw: Vec<String> = flags.to_vec();
    if raw.is_empty() {
        if let Ok(value) = std::env::var("AUTOAPPLY_CREDENTIALS") {
            raw = value.split(',').map(str::to_string).collect();
        }
    }
    let parsed: Vec<Credential> = raw.iter().filter_map(|item| Credential::parse(item)).collect();
    if parsed.is_empty() {
        return vec![Credential::demo()];
    }
    parsed
}
