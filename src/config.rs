use std::env;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::result;
use std::time;

use crate::session::LogLevel;

const VERSION: (usize, usize) = (0, 1);

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub max_conns: usize,
    pub buffer_size: usize,
    /// Largest request body accepted, by its Content-Length.
    pub max_body_size: usize,
    pub buffer_pool_size: usize,
    pub response_pool_size: usize,
    pub completion_timeout: time::Duration,
    pub request_read_timeout: time::Duration,
    pub log_level: LogLevel,
    pub version: (usize, usize),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), 8080)),
            max_conns: 128,
            buffer_size: 2048,
            max_body_size: 8 * 1024 * 1024,
            buffer_pool_size: 64,
            response_pool_size: 64,
            completion_timeout: time::Duration::from_secs(30),
            request_read_timeout: time::Duration::from_secs(30),
            log_level: LogLevel::Info,
            version: VERSION,
        }
    }
}

impl Config {
    pub fn from_env() -> result::Result<Self, String> {
        Self::from_vars(env::vars())
    }

    /// Defaults overridden by any `COFFER_*` pairs in `vars`.
    pub fn from_vars<I>(vars: I) -> result::Result<Self, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut slf = Self::default();

        for (key, value) in vars {
            match key.as_ref() {
                "COFFER_BIND_ADDR" => {
                    slf.bind_addr = value
                        .parse::<SocketAddr>()
                        .map_err(|e| format!("COFFER_BIND_ADDR invalid - {:?}", e))?;
                }
                "COFFER_MAX_CONNECTIONS" => {
                    slf.max_conns = positive(&value, "COFFER_MAX_CONNECTIONS")?;
                }
                "COFFER_BUFFER_SIZE" => {
                    slf.buffer_size = positive(&value, "COFFER_BUFFER_SIZE")?;
                }
                "COFFER_MAX_BODY_SIZE" => {
                    slf.max_body_size = positive(&value, "COFFER_MAX_BODY_SIZE")?;
                }
                "COFFER_BUFFER_POOL_SIZE" => {
                    slf.buffer_pool_size = value
                        .parse()
                        .map_err(|_| "COFFER_BUFFER_POOL_SIZE must be an integer")?;
                }
                "COFFER_RESPONSE_POOL_SIZE" => {
                    slf.response_pool_size = value
                        .parse()
                        .map_err(|_| "COFFER_RESPONSE_POOL_SIZE must be an integer")?;
                }
                "COFFER_COMPLETION_TIMEOUT" => {
                    slf.completion_timeout =
                        positive(&value, "COFFER_COMPLETION_TIMEOUT").map(secs)?;
                }
                "COFFER_REQUEST_READ_TIMEOUT" => {
                    slf.request_read_timeout =
                        positive(&value, "COFFER_REQUEST_READ_TIMEOUT").map(secs)?;
                }
                "COFFER_LOG_LEVEL" => {
                    slf.log_level = value
                        .parse()
                        .map_err(|e| format!("COFFER_LOG_LEVEL invalid - {}", e))?;
                }
                _ => {}
            }
        }

        Ok(slf)
    }

    pub fn port(&self) -> u16 {
        self.bind_addr.port()
    }
}

fn positive(value: &str, name: &str) -> result::Result<usize, String> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("{} must be a positive integer", name)),
    }
}

fn secs(n: usize) -> time::Duration {
    time::Duration::from_secs(n as u64)
}
