//! Stampede's prelude, for running load from code.
//!
//! ```rust
//! use stampede::prelude::*;
//! ```

pub use crate::config::{
    ResponseDelay, RunConfig, ScenarioOptions, ScenarioOverrides, Scenarios, SuccessRange,
};
pub use crate::driver::{DispatchSummary, LoadDriver};
pub use crate::environment::{Environment, EnvironmentView, PoolMember, TemplateEnvironment};
pub use crate::issuer::{
    HttpMethod, RequestIssuer, RequestOutcome, ReqwestTransport, Transport, TransportError,
    TransportResponse,
};
pub use crate::process::{ProcessControl, ShellProcessControl};
pub use crate::report::OutcomeReporter;
pub use crate::scenario::{builtin_scenarios, Scenario, ScenarioRunner, ScenarioSummary};
pub use crate::throttle::Throttle;
pub use crate::{StampedeConfiguration, StampedeError};
