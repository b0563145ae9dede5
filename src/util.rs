const DEFAULT_API_PORT: u16 = 8728;

pub fn get_default_api_port() -> u16 {
    DEFAULT_API_PORT
}

const MONITORING_INTERVAL: &str = "TIKMON_MONITORING_INTERVAL";

const DEFAULT_MONITORING_INTERVAL: u64 = 60;

pub fn get_monitoring_interval() -> u64 {
    env_or(MONITORING_INTERVAL, DEFAULT_MONITORING_INTERVAL)
}

const ALERT_CHECK_INTERVAL: &str = "TIKMON_ALERT_CHECK_INTERVAL";

const DEFAULT_ALERT_CHECK_INTERVAL: u64 = 30;

pub fn get_alert_check_interval() -> u64 {
    env_or(ALERT_CHECK_INTERVAL, DEFAULT_ALERT_CHECK_INTERVAL)
}

const CONNECTION_TIMEOUT: &str = "TIKMON_CONNECTION_TIMEOUT";

const DEFAULT_CONNECTION_TIMEOUT: u64 = 10;

pub fn get_connection_timeout() -> u64 {
    env_or(CONNECTION_TIMEOUT, DEFAULT_CONNECTION_TIMEOUT)
}

const ENCRYPTION_KEY: &str = "TIKMON_ENCRYPTION_KEY";

pub fn get_encryption_key() -> Option<String> {
    std::env::var(ENCRYPTION_KEY).ok().filter(|k| !k.is_empty())
}

fn env_or(key: &str, default: u64) -> u64 {
    std::env::var(key).map_or(default, |res| res.parse().unwrap_or(default))
}

/// Parse a RouterOS duration such as `1w2d3h4m5s` into seconds.
///
/// Unknown units are ignored; a bare number is read as seconds.
pub fn parse_uptime(value: &str) -> u64 {
    let mut total = 0u64;
    let mut digits = String::new();

    for c in value.trim().chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let amount: u64 = digits.parse().unwrap_or(0);
        digits.clear();

        let factor = match c {
            'w' => 7 * 86_400,
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => 0,
        };
        total = total.saturating_add(amount.saturating_mul(factor));
    }

    if !digits.is_empty() {
        total = total.saturating_add(digits.parse().unwrap_or(0));
    }

    total
}

/// Render seconds the way operators read uptimes: the two or three most
/// significant units only.
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

/// Percentage of `total` that is in use, given what is still free.
pub fn usage_percent(total: f64, free: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    (100.0 - (free / total) * 100.0).clamp(0.0, 100.0)
}
