//! RouterOS API protocol client
//!
//! The API runs on TCP port 8728 (8729 for TLS). Requests and replies are
//! sentences of length prefixed words; see [`codec`] for the framing and
//! [`session`] for login and command round trips.

pub mod codec;
pub mod error;
pub mod session;

pub use codec::{Attributes, Reply};
pub use error::{DeviceError, DeviceResult};
pub use session::{Endpoint, Session, SessionOptions};

/// Translate an operator command into API words.
///
/// Accepts CLI style (`ip address print`) and path style
/// (`/ip/address/print`). Tokens starting with `=` or `?` are passed through
/// as attribute and query words.
pub fn command_words(command: &str) -> DeviceResult<Vec<String>> {
    let command = command.trim();
    if command.is_empty() {
        return Err(DeviceError::InvalidInput("empty command".to_string()));
    }

    let (path_tokens, args): (Vec<&str>, Vec<&str>) = command
        .split_whitespace()
        .partition(|token| !token.starts_with('=') && !token.starts_with('?'));

    let path = if path_tokens.len() == 1 && path_tokens[0].starts_with('/') {
        path_tokens[0].to_string()
    } else {
        let joined = path_tokens
            .iter()
            .map(|t| t.trim_matches('/'))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        format!("/{joined}")
    };

    if path == "/" {
        return Err(DeviceError::InvalidInput(
            "command has no path".to_string(),
        ));
    }

    let mut words = vec![path];
    words.extend(args.into_iter().map(str::to_string));
    Ok(words)
}
