use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use chrono::Utc;

/// Server settings, read from `TALLY_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub tick_interval: Duration,
    pub session_ttl: chrono::Duration,
    pub session_sweep_interval: Duration,
    pub secure_cookies: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let host = lookup("TALLY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse(&lookup, "TALLY_PORT", 3000)?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let db_path = lookup("TALLY_DB_PATH").unwrap_or_else(|| "tally.db".into()).into();

        let tick_ms: u64 = parse(&lookup, "TALLY_TICK_MS", 1000)?;
        let ttl_days: i64 = parse(&lookup, "TALLY_SESSION_TTL_DAYS", 30)?;
        let sweep_secs: u64 = parse(&lookup, "TALLY_SESSION_SWEEP_SECS", 3600)?;
        let secure_cookies: bool = parse(&lookup, "TALLY_SECURE_COOKIES", false)?;

        if tick_ms == 0 {
            bail!("TALLY_TICK_MS must be greater than zero");
        }
        if ttl_days <= 0 {
            bail!("TALLY_SESSION_TTL_DAYS must be greater than zero");
        }
        if sweep_secs == 0 {
            bail!("TALLY_SESSION_SWEEP_SECS must be greater than zero");
        }

        let session_ttl = chrono::Duration::try_days(ttl_days)
            .filter(|ttl| Utc::now().checked_add_signed(*ttl).is_some())
            .with_context(|| format!("TALLY_SESSION_TTL_DAYS is out of range: {}", ttl_days))?;
        let tick_interval = schedulable(Duration::from_millis(tick_ms), "TALLY_TICK_MS")?;
        let session_sweep_interval =
            schedulable(Duration::from_secs(sweep_secs), "TALLY_SESSION_SWEEP_SECS")?;

        Ok(Self {
            addr,
            db_path,
            tick_interval,
            session_ttl,
            session_sweep_interval,
            secure_cookies,
        })
    }
}

/// Periods must fit on the runtime's timer, which adds them to `Instant::now()`.
fn schedulable(period: Duration, key: &str) -> anyhow::Result<Duration> {
    Instant::now()
        .checked_add(period)
        .map(|_| period)
        .with_context(|| format!("{} is out of range", key))
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has invalid value '{}'", key, raw)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(cfg.db_path, PathBuf::from("tally.db"));
        assert_eq!(cfg.tick_interval, Duration::from_secs(1));
        assert_eq!(cfg.session_ttl, chrono::Duration::days(30));
        assert_eq!(cfg.session_sweep_interval, Duration::from_secs(3600));
        assert!(!cfg.secure_cookies);
    }

    #[test]
    fn overrides() {
        let cfg = config(&[
            ("TALLY_HOST", "127.0.0.1"),
            ("TALLY_PORT", "8080"),
            ("TALLY_DB_PATH", "/tmp/t.db"),
            ("TALLY_TICK_MS", "250"),
            ("TALLY_SESSION_TTL_DAYS", "7"),
            ("TALLY_SECURE_COOKIES", "true"),
        ])
        .unwrap();
        assert_eq!(cfg.addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/t.db"));
        assert_eq!(cfg.tick_interval, Duration::from_millis(250));
        assert_eq!(cfg.session_ttl, chrono::Duration::days(7));
        assert!(cfg.secure_cookies);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = config(&[("TALLY_PORT", "  ")]).unwrap();
        assert_eq!(cfg.addr.port(), 3000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for vars in [
            [("TALLY_PORT", "http")],
            [("TALLY_PORT", "70000")],
            [("TALLY_TICK_MS", "0")],
            [("TALLY_TICK_MS", "-5")],
            [("TALLY_SESSION_TTL_DAYS", "0")],
            [("TALLY_SESSION_SWEEP_SECS", "0")],
            [("TALLY_SECURE_COOKIES", "yes")],
            [("TALLY_HOST", "not a host")],
            [("TALLY_SESSION_TTL_DAYS", "999999999999999")],
            [("TALLY_SESSION_TTL_DAYS", "100000000")],
            [("TALLY_SESSION_SWEEP_SECS", "18446744073709551615")],
        ] {
            assert!(config(&vars).is_err(), "{:?} should be rejected", vars);
        }
    }

    #[test]
    fn session_ttl_always_fits_on_the_clock() {
        let cfg = config(&[("TALLY_SESSION_TTL_DAYS", "36500")]).unwrap();
        assert!(Utc::now().checked_add_signed(cfg.session_ttl).is_some());

        let err = config(&[("TALLY_SESSION_TTL_DAYS", "100000000")]).unwrap_err();
        assert!(format!("{:#}", err).contains("TALLY_SESSION_TTL_DAYS"));
    }

    #[test]
    fn error_names_the_variable() {
        let err = config(&[("TALLY_TICK_MS", "soon")]).unwrap_err();
        assert!(format!("{:#}", err).contains("TALLY_TICK_MS"));
    }
}
