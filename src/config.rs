//! Functions and structures related to configuring Stampede.
//!
//! Stampede is configured at run time by passing in the options and flags defined by
//! the [`StampedeConfiguration`] structure. Each scenario starts from the default
//! [`ScenarioOptions`] table and overrides some of it with [`ScenarioOverrides`].

use gumdrop::Options;
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use simplelog::*;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::issuer::HttpMethod;
use crate::throttle;
use crate::util;
use crate::StampedeError;

/// Default target of every request.
pub const DEFAULT_HOST: &str = "http://127.0.0.1/";
/// Default pause between phases, as a timespan.
pub const DEFAULT_SETTLE_DELAY: &str = "2";
/// Port assigned to the first pool member, the others follow consecutively.
pub const DEFAULT_BASE_PORT: u16 = 19500;
pub const DEFAULT_PROXY_TEMPLATE: &str = "templates/nginx.conf.template";
pub const DEFAULT_PROXY_CONFIG: &str = "nginx/conf/nginx.conf";
pub const DEFAULT_APP_TEMPLATE: &str = "templates/php.ini.template";
pub const DEFAULT_APP_CONFIG: &str = "php/php.ini";
pub const DEFAULT_START_COMMAND: &str = "./start-servers.sh";
pub const DEFAULT_STOP_COMMAND: &str = "./stop-servers.sh";
pub const DEFAULT_WORK_DIR: &str = ".";
pub const DEFAULT_LOG_DIR: &str = "nginx/logs";

/// Runtime options available when launching Stampede.
///
/// Stampede leverages [`gumdrop`](https://docs.rs/gumdrop/) to derive the help from
/// the below structure. Empty values are replaced with defaults by
/// [`StampedeConfiguration::configure`].
#[derive(Options, Debug, Clone, Default, Serialize, Deserialize)]
#[options(
    help = r#"Stampede drives throttled load-test scenarios against a reverse proxy
in front of a FastCGI application pool, printing one glyph per request.

The following runtime options are available:"#
)]
pub struct StampedeConfiguration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V")]
    pub version: bool,

    /// Defines the target of every request (default: http://127.0.0.1/)
    #[options(short = "H")]
    pub host: String,
    /// Limits the run to the specified scenarios
    #[options(short = "s", meta = "\"SCENARIO\"")]
    pub scenarios: Scenarios,
    /// Lists all scenarios and exits
    #[options(no_short)]
    pub scenarios_list: bool,
    /// Loads scenarios from a json file instead of the built-in list
    #[options(no_short, meta = "NAME")]
    pub scenarios_file: String,
    /// Overrides requests per second for every scenario
    #[options(short = "r", meta = "RATE")]
    pub requests_per_second: Option<f64>,
    /// Overrides total requests per phase for every scenario
    #[options(short = "n", meta = "COUNT")]
    pub total_requests: Option<usize>,
    /// Overrides the response delay for every scenario (1 or 0,0,10)
    #[options(short = "d", meta = "SECONDS")]
    pub response_delay: Option<ResponseDelay>,
    /// Pauses between phases (30s, 20m, 3h, 1h30m, etc) (default: 2)
    #[options(no_short, meta = "TIME")]
    pub settle_delay: String,
    /// Sets per-request timeout, in seconds (default: none)
    #[options(no_short, meta = "VALUE")]
    pub timeout: Option<String>,
    /// Sets status codes counted as success (default: 200-399)
    #[options(
        no_short,
        meta = "LOW-HIGH",
        help = "Sets status codes counted as success (default: 200-399)\n\nEnvironment:"
    )]
    pub success_range: Option<SuccessRange>,

    /// Sets the port of the first pool member (default: 19500)
    #[options(no_short, meta = "PORT")]
    pub base_port: u16,
    /// Sets the proxy configuration template
    #[options(no_short, meta = "NAME")]
    pub proxy_template: String,
    /// Sets where the rendered proxy configuration is written
    #[options(no_short, meta = "NAME")]
    pub proxy_config: String,
    /// Sets the application configuration template
    #[options(no_short, meta = "NAME")]
    pub app_template: String,
    /// Sets where the rendered application configuration is written
    #[options(no_short, meta = "NAME")]
    pub app_config: String,
    /// Sets the command starting the servers
    #[options(no_short, meta = "COMMAND")]
    pub start_command: String,
    /// Sets the command stopping the servers
    #[options(no_short, meta = "COMMAND")]
    pub stop_command: String,
    /// Sets the directory relative paths are resolved from (default: .)
    #[options(no_short, meta = "PATH")]
    pub work_dir: String,
    /// Sets the server log directory emptied before the first scenario
    #[options(
        no_short,
        meta = "PATH",
        help = "Sets the server log directory emptied before the first scenario\n\nLogging:"
    )]
    pub log_dir: String,

    /// Enables Stampede log file and sets name
    #[options(short = "G", meta = "NAME")]
    pub log_file: String,
    /// Increases log file level (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
    /// Decreases Stampede verbosity (-q, -qq, etc)
    #[options(count, short = "q")]
    pub quiet: u8,
    /// Increases Stampede verbosity (-v, -vv, etc)
    #[options(count, short = "v")]
    pub verbose: u8,
}

impl StampedeConfiguration {
    /// Replace empty options with their defaults.
    pub fn configure(&mut self) {
        fn or_default(value: &mut String, default: &str) {
            if value.is_empty() {
                *value = default.to_string();
            }
        }

        or_default(&mut self.host, DEFAULT_HOST);
        or_default(&mut self.settle_delay, DEFAULT_SETTLE_DELAY);
        or_default(&mut self.proxy_template, DEFAULT_PROXY_TEMPLATE);
        or_default(&mut self.proxy_config, DEFAULT_PROXY_CONFIG);
        or_default(&mut self.app_template, DEFAULT_APP_TEMPLATE);
        or_default(&mut self.app_config, DEFAULT_APP_CONFIG);
        or_default(&mut self.start_command, DEFAULT_START_COMMAND);
        or_default(&mut self.stop_command, DEFAULT_STOP_COMMAND);
        or_default(&mut self.work_dir, DEFAULT_WORK_DIR);
        or_default(&mut self.log_dir, DEFAULT_LOG_DIR);
        if self.base_port == 0 {
            self.base_port = DEFAULT_BASE_PORT;
        }
    }

    /// Validate the configured options, after [`StampedeConfiguration::configure`].
    pub fn validate(&self) -> Result<(), StampedeError> {
        util::is_valid_host(&self.host)?;

        if let Some(rate) = self.requests_per_second {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(StampedeError::InvalidOption {
                    option: "`configuration.requests_per_second`".to_string(),
                    value: rate.to_string(),
                    detail: "`configuration.requests_per_second` must be greater than 0."
                        .to_string(),
                });
            }
            throttle::permit_interval(rate)?;
        }

        if self.total_requests == Some(0) {
            return Err(StampedeError::InvalidOption {
                option: "`configuration.total_requests`".to_string(),
                value: "0".to_string(),
                detail: "`configuration.total_requests` must be greater than 0.".to_string(),
            });
        }

        if let Some(delay) = self.response_delay.as_ref() {
            delay.validate()?;
        }

        if !util::is_valid_timespan(&self.settle_delay) {
            return Err(StampedeError::InvalidOption {
                option: "`configuration.settle_delay`".to_string(),
                value: self.settle_delay.clone(),
                detail: "`configuration.settle_delay` must be a timespan such as 2, 5s or 1m."
                    .to_string(),
            });
        }

        // If set, timeout must be greater than zero and fit in a Duration.
        if let Some(timeout) = self.timeout.as_ref() {
            let seconds = util::get_float_from_string(Some(timeout.clone())).unwrap_or(0.0);
            if seconds <= 0.0 || Duration::try_from_secs_f32(seconds).is_err() {
                return Err(StampedeError::InvalidOption {
                    option: "`configuration.timeout`".to_string(),
                    value: timeout.to_string(),
                    detail: "`configuration.timeout` must be greater than 0.".to_string(),
                });
            }
        }

        Ok(())
    }

    /// The pause inserted between phases of a scenario.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(util::parse_timespan(&self.settle_delay) as u64)
    }

    /// The optional per-request timeout.
    pub fn timeout(&self) -> Option<Duration> {
        util::get_float_from_string(self.timeout.clone())
            .filter(|seconds| *seconds > 0.0)
            .and_then(|seconds| Duration::try_from_secs_f32(seconds).ok())
    }

    /// Overrides applied on top of every scenario.
    pub fn overrides(&self) -> ScenarioOverrides {
        ScenarioOverrides {
            requests_per_second: self.requests_per_second,
            total_requests: self.total_requests,
            response_delay: self.response_delay.clone(),
            ..Default::default()
        }
    }

    /// Initialize the logger which writes to standard error and optionally to a file.
    ///
    /// The glyph stream owns standard out, log messages never go there.
    pub fn initialize_logger(&self) -> Result<(), StampedeError> {
        // Configure terminal output level.
        let debug_level = match self.verbose {
            0 => match self.quiet {
                0 => LevelFilter::Warn,
                _ => LevelFilter::Error,
            },
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Configure log file level.
        let log_level = match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
        loggers.push(TermLogger::new(
            debug_level,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ));

        // Open the log file if configured.
        let log_file: Option<PathBuf> = if !self.log_file.is_empty() {
            Some(PathBuf::from(&self.log_file))
        } else {
            None
        };
        if let Some(path) = log_file.as_ref() {
            loggers.push(WriteLogger::new(
                log_level,
                Config::default(),
                std::fs::File::create(path)?,
            ));
        }

        if let Err(e) = CombinedLogger::init(loggers) {
            info!("failed to initialize CombinedLogger: {}", e);
        }

        if let Some(path) = log_file {
            info!("Writing to log file: {}", path.display());
        }
        info!("Output verbosity level: {}", debug_level);
        info!("Logfile verbosity level: {}", log_level);

        Ok(())
    }
}

/// Optionally limits the run to a subset of scenarios.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenarios {
    pub active: Vec<String>,
}
/// Implement [`FromStr`] to convert `"foo,bar"` comma separated string to a vector of strings.
impl FromStr for Scenarios {
    type Err = StampedeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut active: Vec<String> = Vec::new();
        for line in s.split(',') {
            // Ignore white space and case.
            let scenario = line.trim().to_lowercase();
            // Valid scenario names are alphanumeric only.
            if !scenario.is_empty() && scenario.chars().all(char::is_alphanumeric) {
                active.push(scenario);
            } else {
                // Logger isn't initialized yet, provide helpful debug output.
                eprintln!("ERROR: invalid `configuration.scenarios` value: '{}'", line);
                eprintln!("  Expected format: --scenarios \"{{one}},{{two}},{{three}}\"");
                eprintln!("    {{one}}, {{two}}, {{three}}, etc must be alphanumeric");
                eprintln!("    To view valid scenario names invoke `--scenarios-list`");
                return Err(StampedeError::InvalidOption {
                    option: "`configuration.scenarios`".to_string(),
                    value: line.to_string(),
                    detail: "invalid `configuration.scenarios` value.".to_string(),
                });
            }
        }
        Ok(Scenarios { active })
    }
}

/// An inclusive range of status codes counted as a success.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessRange {
    pub low: u16,
    pub high: u16,
}

impl Default for SuccessRange {
    fn default() -> Self {
        SuccessRange {
            low: 200,
            high: 399,
        }
    }
}

impl SuccessRange {
    pub fn contains(&self, status: http::StatusCode) -> bool {
        (self.low..=self.high).contains(&status.as_u16())
    }
}

/// Implement [`FromStr`] to convert `"200-299"` (or a single `"200"`) into a range.
impl FromStr for SuccessRange {
    type Err = StampedeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |detail: &str| StampedeError::InvalidOption {
            option: "`configuration.success_range`".to_string(),
            value: s.to_string(),
            detail: detail.to_string(),
        };

        let (low, high) = match s.split_once('-') {
            Some((low, high)) => (low.trim(), high.trim()),
            None => (s.trim(), s.trim()),
        };
        let low = low
            .parse::<u16>()
            .map_err(|_| invalid("status codes must be numbers"))?;
        let high = high
            .parse::<u16>()
            .map_err(|_| invalid("status codes must be numbers"))?;
        if !(100..=999).contains(&low) || !(100..=999).contains(&high) || low > high {
            return Err(invalid("expected LOW-HIGH with 100 <= LOW <= HIGH <= 999"));
        }

        Ok(SuccessRange { low, high })
    }
}

/// Simulated processing time, in seconds, passed to the server with each request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseDelay {
    /// Every request uses the same delay.
    Fixed(f64),
    /// Each request picks one of the candidates uniformly at random.
    Choice(Vec<f64>),
}

impl Default for ResponseDelay {
    fn default() -> Self {
        ResponseDelay::Fixed(0.0)
    }
}

impl ResponseDelay {
    /// Resolve the delay for one request.
    pub fn resolve(&self) -> f64 {
        self.resolve_with(&mut rand::rng())
    }

    pub fn resolve_with<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            ResponseDelay::Fixed(delay) => *delay,
            ResponseDelay::Choice(candidates) => candidates.choose(rng).copied().unwrap_or(0.0),
        }
    }

    pub fn validate(&self) -> Result<(), StampedeError> {
        let candidates = match self {
            ResponseDelay::Fixed(delay) => std::slice::from_ref(delay),
            ResponseDelay::Choice(candidates) => candidates.as_slice(),
        };

        if candidates.is_empty() {
            return Err(StampedeError::InvalidOption {
                option: "response_delay".to_string(),
                value: self.to_string(),
                detail: "response_delay needs at least one candidate.".to_string(),
            });
        }
        if let Some(bad) = candidates.iter().find(|d| !d.is_finite() || **d < 0.0) {
            return Err(StampedeError::InvalidOption {
                option: "response_delay".to_string(),
                value: bad.to_string(),
                detail: "response_delay must be a non-negative number of seconds.".to_string(),
            });
        }

        Ok(())
    }
}

/// Comma separated, the format accepted by [`FromStr`] and passed to the start command.
impl fmt::Display for ResponseDelay {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResponseDelay::Fixed(delay) => write!(f, "{}", delay),
            ResponseDelay::Choice(candidates) => {
                let values: Vec<String> = candidates.iter().map(|d| d.to_string()).collect();
                write!(f, "{}", values.join(","))
            }
        }
    }
}

/// Implement [`FromStr`] to convert `"1"` or `"0,0,10"` into a delay.
impl FromStr for ResponseDelay {
    type Err = StampedeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut candidates = Vec::new();
        for value in s.split(',') {
            let delay = value
                .trim()
                .parse::<f64>()
                .map_err(|e| StampedeError::InvalidOption {
                    option: "response_delay".to_string(),
                    value: value.to_string(),
                    detail: format!("invalid response_delay: {}", e),
                })?;
            candidates.push(delay);
        }

        let delay = if candidates.len() == 1 {
            ResponseDelay::Fixed(candidates[0])
        } else {
            ResponseDelay::Choice(candidates)
        };
        delay.validate()?;

        Ok(delay)
    }
}

/// Everything one load run needs. Built once per phase and never changed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunConfig {
    pub method: HttpMethod,
    pub requests_per_second: f64,
    pub total_requests: usize,
    pub response_delay: ResponseDelay,
}

impl RunConfig {
    pub fn new(
        method: HttpMethod,
        requests_per_second: f64,
        total_requests: usize,
        response_delay: ResponseDelay,
    ) -> Self {
        RunConfig {
            method,
            requests_per_second,
            total_requests,
            response_delay,
        }
    }

    pub fn validate(&self) -> Result<(), StampedeError> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(StampedeError::InvalidOption {
                option: "requests_per_second".to_string(),
                value: self.requests_per_second.to_string(),
                detail: "requests_per_second must be greater than 0.".to_string(),
            });
        }
        throttle::permit_interval(self.requests_per_second)?;
        if self.total_requests == 0 {
            return Err(StampedeError::InvalidOption {
                option: "total_requests".to_string(),
                value: "0".to_string(),
                detail: "total_requests must be greater than 0.".to_string(),
            });
        }
        self.response_delay.validate()
    }
}

/// The full table of options describing one scenario.
///
/// The proxy and pool options are only consumed when rendering the environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioOptions {
    pub requests_per_second: f64,
    pub total_requests: usize,
    pub response_delay: ResponseDelay,
    pub proxy_limit_rps: usize,
    pub proxy_limit_burst: usize,
    /// Seconds the proxy waits for the application to answer.
    pub proxy_read_timeout: usize,
    /// Seconds the application may spend on one request.
    pub max_execution_time: usize,
    /// Number of pool members, each listening on its own port.
    pub pool_size: usize,
    /// Children spawned by each pool member.
    pub pool_children: usize,
    /// Requests a child serves before it is restarted.
    pub pool_max_requests: usize,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        ScenarioOptions {
            requests_per_second: 100.0,
            total_requests: 100,
            response_delay: ResponseDelay::Fixed(0.0),
            proxy_limit_rps: 1000,
            proxy_limit_burst: 10,
            proxy_read_timeout: 600,
            max_execution_time: 600,
            pool_size: 1,
            pool_children: 1,
            pool_max_requests: 128,
        }
    }
}

impl ScenarioOptions {
    /// Return a copy with every set override applied.
    pub fn apply(&self, overrides: &ScenarioOverrides) -> ScenarioOptions {
        let mut options = self.clone();
        if let Some(value) = overrides.requests_per_second {
            options.requests_per_second = value;
        }
        if let Some(value) = overrides.total_requests {
            options.total_requests = value;
        }
        if let Some(value) = overrides.response_delay.as_ref() {
            options.response_delay = value.clone();
        }
        if let Some(value) = overrides.proxy_limit_rps {
            options.proxy_limit_rps = value;
        }
        if let Some(value) = overrides.proxy_limit_burst {
            options.proxy_limit_burst = value;
        }
        if let Some(value) = overrides.proxy_read_timeout {
            options.proxy_read_timeout = value;
        }
        if let Some(value) = overrides.max_execution_time {
            options.max_execution_time = value;
        }
        if let Some(value) = overrides.pool_size {
            options.pool_size = value;
        }
        if let Some(value) = overrides.pool_children {
            options.pool_children = value;
        }
        if let Some(value) = overrides.pool_max_requests {
            options.pool_max_requests = value;
        }
        options
    }

    /// The load run for one method of this scenario.
    pub fn run_config(&self, method: HttpMethod) -> RunConfig {
        RunConfig::new(
            method,
            self.requests_per_second,
            self.total_requests,
            self.response_delay.clone(),
        )
    }

    pub fn validate(&self) -> Result<(), StampedeError> {
        if self.pool_size == 0 {
            return Err(StampedeError::InvalidOption {
                option: "pool_size".to_string(),
                value: "0".to_string(),
                detail: "pool_size must be at least 1.".to_string(),
            });
        }
        if self.pool_children == 0 {
            return Err(StampedeError::InvalidOption {
                option: "pool_children".to_string(),
                value: "0".to_string(),
                detail: "pool_children must be at least 1.".to_string(),
            });
        }
        self.run_config(HttpMethod::Get).validate()
    }
}

/// A partial [`ScenarioOptions`], only the set fields replace the defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_requests: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_delay: Option<ResponseDelay>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_limit_rps: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_limit_burst: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_read_timeout: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_execution_time: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_children: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_max_requests: Option<usize>,
}

impl ScenarioOverrides {
    pub fn response_delay(mut self, delay: ResponseDelay) -> Self {
        self.response_delay = Some(delay);
        self
    }

    pub fn proxy_limit(mut self, rps: usize, burst: usize) -> Self {
        self.proxy_limit_rps = Some(rps);
        self.proxy_limit_burst = Some(burst);
        self
    }

    pub fn pool(mut self, size: usize, children: usize) -> Self {
        self.pool_size = Some(size);
        self.pool_children = Some(children);
        self
    }
}
