//! # Stampede
//!
//! Stampede drives parameterized load-test scenarios against a web stack made of a
//! reverse proxy in front of a pool of FastCGI application servers. Each scenario
//! varies the pool topology, the proxy rate limits and the simulated response latency,
//! then sends a precise number of requests at a target rate and reports the outcome of
//! every request as a live stream of glyphs.
//!
//! Stampede uses [`reqwest`](https://docs.rs/reqwest/) to provide the HTTP client.
//!
//! ## Reading the output
//!
//! Each completed request prints one glyph: `✅` for success and `❌` for anything
//! else. Whenever the outcome category changes, the new category is printed once next
//! to the glyph, so a long streak of identical results stays compact:
//!
//! ```text
//! Starting 100 GET requests...
//! ✅ 200 OK ✅✅✅✅✅❌ 503 Service Unavailable ❌❌❌✅ 200 OK ✅✅
//! ```
//!
//! ## Driving load from code
//!
//! The building blocks are public so a load run can be embedded in other tools:
//!
//! ```rust,no_run
//! use stampede::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), StampedeError> {
//!     let transport = ReqwestTransport::new(None)?;
//!     let issuer = RequestIssuer::new(transport, "http://127.0.0.1/")?;
//!     let mut driver = LoadDriver::new(issuer, OutcomeReporter::stdout());
//!
//!     let run = RunConfig::new(HttpMethod::Get, 100.0, 50, ResponseDelay::Fixed(0.0));
//!     let summary = driver.run(&run).await?;
//!     assert_eq!(summary.completed, 50);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## License
//!
//! Copyright 2026 Stampede contributors
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! you may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//! <http://www.apache.org/licenses/LICENSE-2.0>
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

#[macro_use]
extern crate log;

pub mod config;
pub mod driver;
pub mod environment;
pub mod issuer;
pub mod prelude;
pub mod process;
pub mod report;
pub mod scenario;
pub mod throttle;
pub mod util;

use lazy_static::lazy_static;
use std::sync::{Arc, RwLock};
use std::{fmt, io};

pub use crate::config::StampedeConfiguration;

lazy_static! {
    /// Set by the ctrl-c handler; scenarios stop starting new phases once set.
    pub(crate) static ref CANCELED: Arc<RwLock<bool>> = Arc::new(RwLock::new(false));
}

/// Returns true once the run has been interrupted with ctrl-c.
pub fn is_canceled() -> bool {
    CANCELED.read().map(|canceled| *canceled).unwrap_or(false)
}

/// An enumeration of all errors Stampede can return.
#[derive(Debug)]
pub enum StampedeError {
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    Io(io::Error),
    /// Wraps a [`reqwest::Error`](https://docs.rs/reqwest/*/reqwest/struct.Error.html).
    Reqwest(reqwest::Error),
    /// Wraps a [`serde_json::Error`](https://docs.rs/serde_json/*/serde_json/struct.Error.html).
    Serde(serde_json::Error),
    /// Failed to parse a hostname.
    InvalidHost {
        /// The invalid hostname that caused this error.
        host: String,
        /// An optional explanation of the error.
        detail: String,
        /// Wraps a [`url::ParseError`](https://docs.rs/url/*/url/enum.ParseError.html).
        parse_error: url::ParseError,
    },
    /// Invalid option or value specified, may only be invalid in context.
    InvalidOption {
        /// The invalid option that caused this error, may be only invalid in context.
        option: String,
        /// The invalid value that caused this error, may be only invalid in context.
        value: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// A configuration template could not be rendered.
    InvalidTemplate {
        /// Path of the template that failed to render.
        path: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// An external command could not be launched.
    Process {
        /// The command line that failed.
        command: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// No scenario matched the requested names.
    NoScenarios {
        /// An optional explanation of the error.
        detail: String,
    },
}
/// Implement a helper to provide a text description of all possible types of errors.
impl StampedeError {
    fn describe(&self) -> &str {
        match *self {
            StampedeError::Io(_) => "io::Error",
            StampedeError::Reqwest(_) => "reqwest::Error",
            StampedeError::Serde(_) => "serde_json::Error",
            StampedeError::InvalidHost { .. } => "failed to parse hostname",
            StampedeError::InvalidOption { .. } => "invalid option or value specified",
            StampedeError::InvalidTemplate { .. } => "failed to render template",
            StampedeError::Process { .. } => "failed to launch external command",
            StampedeError::NoScenarios { .. } => "no scenarios to run",
        }
    }
}

/// Implement format trait to allow displaying errors.
impl fmt::Display for StampedeError {
    // Implement display of error with `{}` marker.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            StampedeError::Io(ref source) => {
                write!(f, "StampedeError: {} ({})", self.describe(), source)
            }
            StampedeError::Reqwest(ref source) => {
                write!(f, "StampedeError: {} ({})", self.describe(), source)
            }
            StampedeError::Serde(ref source) => {
                write!(f, "StampedeError: {} ({})", self.describe(), source)
            }
            StampedeError::InvalidHost {
                ref parse_error, ..
            } => write!(f, "StampedeError: {} ({})", self.describe(), parse_error),
            StampedeError::InvalidOption {
                ref option,
                ref value,
                ref detail,
            } => write!(
                f,
                "StampedeError: {} ({} = {}: {})",
                self.describe(),
                option,
                value,
                detail
            ),
            StampedeError::InvalidTemplate {
                ref path,
                ref detail,
            } => write!(f, "StampedeError: {} ({}: {})", self.describe(), path, detail),
            StampedeError::Process {
                ref command,
                ref detail,
            } => write!(
                f,
                "StampedeError: {} ({}: {})",
                self.describe(),
                command,
                detail
            ),
            StampedeError::NoScenarios { ref detail } => {
                write!(f, "StampedeError: {} ({})", self.describe(), detail)
            }
        }
    }
}

// Define the lower level source of this error, if any.
impl std::error::Error for StampedeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            StampedeError::Io(ref source) => Some(source),
            StampedeError::Reqwest(ref source) => Some(source),
            StampedeError::Serde(ref source) => Some(source),
            StampedeError::InvalidHost {
                ref parse_error, ..
            } => Some(parse_error),
            _ => None,
        }
    }
}

/// Auto-convert Reqwest errors.
impl From<reqwest::Error> for StampedeError {
    fn from(err: reqwest::Error) -> StampedeError {
        StampedeError::Reqwest(err)
    }
}

/// Auto-convert IO errors.
impl From<io::Error> for StampedeError {
    fn from(err: io::Error) -> StampedeError {
        StampedeError::Io(err)
    }
}

/// Auto-convert serde_json errors.
impl From<serde_json::Error> for StampedeError {
    fn from(err: serde_json::Error) -> StampedeError {
        StampedeError::Serde(err)
    }
}
