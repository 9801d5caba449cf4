//! Utility functions used by Stampede.

use regex::Regex;
use std::str::FromStr;
use url::Url;

use crate::{StampedeError, CANCELED};

/// Parse a string representing a time span and return the number of seconds.
///
/// Can be specified as an integer, indicating seconds. Or can use integers
/// together with one or more of "h", "m", and "s", in that order, indicating
/// "hours", "minutes", and "seconds".
///
/// Valid formats include: 20, 20s, 3m, 2h, 1h20m, 3h30m10s, etc.
///
/// # Example
/// ```rust
/// use stampede::util;
///
/// // 1 hour 2 minutes and 3 seconds is 3,723 seconds.
/// assert_eq!(util::parse_timespan("1h2m3s"), 3_723);
///
/// // 45 seconds is 45 seconds.
/// assert_eq!(util::parse_timespan("45"), 45);
///
/// // Invalid value is 0 seconds.
/// assert_eq!(util::parse_timespan("foo"), 0);
/// ```
pub fn parse_timespan(time_str: &str) -> usize {
    match usize::from_str(time_str) {
        // If an integer is passed in, assume it's seconds
        Ok(t) => {
            trace!("{} is integer: {} seconds", time_str, t);
            t
        }
        // Otherwise use a regex to extract hours, minutes and seconds from string.
        Err(_) => {
            let re = match Regex::new(
                r"((?P<hours>\d+?)h)?((?P<minutes>\d+?)m)?((?P<seconds>\d+?)s)?",
            ) {
                Ok(re) => re,
                Err(e) => {
                    warn!("failed to compile timespan regex: {}", e);
                    return 0;
                }
            };
            let time_matches = match re.captures(time_str) {
                Some(captures) => captures,
                None => return 0,
            };
            let value = |name: &str| {
                time_matches
                    .name(name)
                    .and_then(|m| usize::from_str(m.as_str()).ok())
                    .unwrap_or(0)
            };
            let hours = value("hours");
            let minutes = value("minutes");
            let seconds = value("seconds");
            let total = hours * 60 * 60 + minutes * 60 + seconds;
            trace!(
                "{} hours {} minutes {} seconds: {} seconds",
                hours,
                minutes,
                seconds,
                total
            );
            total
        }
    }
}

/// Returns true if the string is a time span [`parse_timespan`] understands.
///
/// Unlike [`parse_timespan`], this tells a zero span such as `0s` apart from a
/// string that is not a time span at all.
///
/// # Example
/// ```rust
/// use stampede::util;
///
/// assert!(util::is_valid_timespan("0s"));
/// assert!(util::is_valid_timespan("1h30m"));
/// assert!(!util::is_valid_timespan("soon"));
/// ```
pub fn is_valid_timespan(time_str: &str) -> bool {
    if time_str.is_empty() {
        return false;
    }
    if usize::from_str(time_str).is_ok() {
        return true;
    }
    match Regex::new(r"^(\d+h)?(\d+m)?(\d+s)?$") {
        Ok(re) => re.is_match(time_str),
        Err(e) => {
            warn!("failed to compile timespan regex: {}", e);
            false
        }
    }
}

/// Convert optional string to f32, otherwise return None.
///
/// # Example
/// ```rust
/// use stampede::util;
///
/// // No decimal returns a proper float.
/// assert_eq!(util::get_float_from_string(Some("1".to_string())), Some(1.0));
///
/// // Leading decimal returns a proper float.
/// assert_eq!(util::get_float_from_string(Some(".1".to_string())), Some(0.1));
///
/// // Invalid number with too many decimals returns None.
/// assert_eq!(util::get_float_from_string(Some("1.1.1".to_string())), None);
///
/// // No number returns None.
/// assert_eq!(util::get_float_from_string(None), None);
/// ```
pub fn get_float_from_string(string: Option<String>) -> Option<f32> {
    match string {
        Some(s) => match s.parse::<f32>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("failed to convert {} to float: {}", s, e);
                None
            }
        },
        None => None,
    }
}

/// Helper function to determine if a host can be parsed.
///
/// # Example
/// ```rust
/// use stampede::util;
///
/// // IP is a valid URL.
/// assert_eq!(util::is_valid_host("http://127.0.0.1").is_ok(), true);
///
/// // Protocol is required
/// assert_eq!(util::is_valid_host("127.0.0.1/").is_ok(), false);
/// ```
pub fn is_valid_host(host: &str) -> Result<bool, StampedeError> {
    Url::parse(host).map_err(|parse_error| StampedeError::InvalidHost {
        host: host.to_string(),
        detail: "Invalid host.".to_string(),
        parse_error,
    })?;
    Ok(true)
}

/// Install the ctrl-c handler.
///
/// The first ctrl-c lets the current phase finish and the servers stop, then skips
/// everything after it. A second ctrl-c exits immediately.
pub fn setup_ctrlc_handler() {
    match ctrlc::set_handler(move || {
        // We've caught a ctrl-c, determine if it's the first time or an additional time.
        if crate::is_canceled() {
            warn!("caught another ctrl-c, exiting immediately...");
            std::process::exit(1);
        } else {
            warn!("caught ctrl-c, stopping after the current phase...");
            if let Ok(mut canceled) = CANCELED.write() {
                *canceled = true;
            }
        }
    }) {
        Ok(_) => (),
        Err(e) => {
            info!("failed to set ctrl-c handler: {}", e);
        }
    }
}
