/// Utility functions and helpers
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{GrupoError, GrupoResult};

/// Split `host:port` (IPv6 hosts may be bracketed) into its parts
pub fn split_endpoint(endpoint: &str) -> GrupoResult<(String, u16)> {
    let invalid = || GrupoError::invalid_option(format!("Invalid address '{}', expected host:port", endpoint));

    let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        (host, tail.strip_prefix(':').ok_or_else(invalid)?)
    } else {
        endpoint.rsplit_once(':').ok_or_else(invalid)?
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    if port == 0 {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

/// Split a comma separated list, dropping blanks
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Random password for managed accounts
pub fn generate_password(len: usize) -> String {
    const SPECIAL: &[u8] = b"~@#%^&*()-_=+]}[{|;:.>,</?";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|i| {
            // validate_password MEDIUM needs special characters
            if i % 4 == 3 {
                SPECIAL[rng.gen_range(0..SPECIAL.len())] as char
            } else {
                rng.sample(Alphanumeric) as char
            }
        })
        .collect()
}

/// `count` random decimal digits
pub fn random_digits(count: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Random non-zero `server_id`
pub fn generate_server_id() -> u32 {
    rand::thread_rng().gen_range(1..=u32::MAX)
}

/// Format duration for human-readable output
pub fn format_duration(duration: std::time::Duration) -> String {
    let millis = duration.as_millis();
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", millis)
    } else if secs < 60 {
        format!("{}.{:03}s", secs, millis % 1000)
    } else {
        format!("{}m{}s", secs / 60, secs % 60)
    }
}
