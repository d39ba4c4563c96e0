use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

/// Server settings, read once from `STAYDESK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// Age after which an unpaid `pendiente` reservation is cancelled.
    pub pending_ttl: Duration,
    pub reaper_interval: Duration,
    pub currency: String,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "staydesk".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            pending_ttl: Duration::from_secs(86_400),
            reaper_interval: Duration::from_secs(30),
            currency: "PEN".into(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> io::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults,
    /// unparseable values are an error rather than silently ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> io::Result<Self> {
        let d = Self::default();
        let get = |name: &str| lookup(&format!("STAYDESK_{name}"));

        let config = Self {
            bind: get("BIND").unwrap_or(d.bind),
            port: parse_or(get("PORT"), "STAYDESK_PORT", d.port)?,
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: get("PASSWORD").unwrap_or(d.password),
            max_connections: parse_or(get("MAX_CONNECTIONS"), "STAYDESK_MAX_CONNECTIONS", d.max_connections)?,
            compact_threshold: parse_or(get("COMPACT_THRESHOLD"), "STAYDESK_COMPACT_THRESHOLD", d.compact_threshold)?,
            metrics_port: get("METRICS_PORT")
                .map(|v| parse_value(&v, "STAYDESK_METRICS_PORT"))
                .transpose()?,
            pending_ttl: Duration::from_secs(parse_or(
                get("PENDING_TTL_SECS"),
                "STAYDESK_PENDING_TTL_SECS",
                d.pending_ttl.as_secs(),
            )?),
            reaper_interval: Duration::from_secs(parse_or(
                get("REAPER_INTERVAL_SECS"),
                "STAYDESK_REAPER_INTERVAL_SECS",
                d.reaper_interval.as_secs(),
            )?),
            currency: get("CURRENCY").unwrap_or(d.currency),
            tls_cert: get("TLS_CERT"),
            tls_key: get("TLS_KEY"),
        };

        if config.max_connections == 0 {
            return Err(invalid("STAYDESK_MAX_CONNECTIONS must be at least 1"));
        }
        if config.reaper_interval.is_zero() {
            return Err(invalid("STAYDESK_REAPER_INTERVAL_SECS must be at least 1"));
        }
        if config.tls_cert.is_some() != config.tls_key.is_some() {
            return Err(invalid(
                "both STAYDESK_TLS_CERT and STAYDESK_TLS_KEY must be set, or neither",
            ));
        }
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// The pending TTL as a calendar duration for the reaper; absurd values saturate at a century.
    pub fn pending_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.pending_ttl).unwrap_or_else(|_| chrono::Duration::days(36_500))
    }

    /// Build the TLS acceptor when a certificate pair is configured.
    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        let (Some(cert_path), Some(key_path)) = (&self.tls_cert, &self.tls_key) else {
            return Ok(None);
        };

        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<_, _>>()?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
            .ok_or_else(|| invalid("no private key found in key file"))?;

        let mut server = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
        server.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(server))))
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidInput, msg.to_string())
}

fn parse_value<T: FromStr>(raw: &str, key: &str) -> io::Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(&format!("{key}: cannot parse {raw:?}")))
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> io::Result<T> {
    match raw {
        Some(v) => parse_value(&v, key),
        None => Ok(default),
    }
}
