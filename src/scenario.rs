//! Named scenarios and the runner sequencing them.
//!
//! A [`Scenario`] is a name plus a partial set of options layered over the defaults.
//! The [`ScenarioRunner`] runs scenarios strictly one after the other, because they
//! all share the same servers and log directory. Each scenario:
//!
//!  1. prints a banner with its name and effective options,
//!  2. renders the server configuration,
//!  3. starts the servers without waiting for them to be ready,
//!  4. runs a GET phase then a POST phase, each after a settle delay,
//!  5. waits one more settle delay and stops the servers.
//!
//! Failing to render or start aborts the scenario. Failing to stop is only logged so
//! the next scenario still runs.

use chrono::Local;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::IntoEnumIterator;

use crate::config::{
    ResponseDelay, ScenarioOptions, ScenarioOverrides, Scenarios, StampedeConfiguration,
    DEFAULT_BASE_PORT,
};
use crate::driver::{DispatchSummary, LoadDriver};
use crate::environment::{Environment, EnvironmentView, TemplateEnvironment};
use crate::issuer::{HttpMethod, ReqwestTransport, RequestIssuer};
use crate::process::{server_environment, ProcessControl, ShellProcessControl};
use crate::report::OutcomeReporter;
use crate::{is_canceled, StampedeError};

/// A named set of overrides applied to the default options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Short name used to select the scenario with `--scenarios`.
    pub name: String,
    /// Human readable title printed in the banner, defaults to the name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub options: ScenarioOverrides,
}

impl Scenario {
    pub fn new(name: &str, description: &str, options: ScenarioOverrides) -> Self {
        Scenario {
            name: name.to_string(),
            description: description.to_string(),
            options,
        }
    }

    /// The name as matched by the scenario filter: lowercase and alphanumeric only.
    pub fn machine_name(&self) -> String {
        self.name
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase()
    }

    /// The title printed in the banner.
    pub fn title(&self) -> &str {
        if self.description.is_empty() {
            &self.name
        } else {
            &self.description
        }
    }
}

/// The scenarios run when no scenarios file is given.
pub fn builtin_scenarios() -> Vec<Scenario> {
    let one_second = || ScenarioOverrides::default().response_delay(ResponseDelay::Fixed(1.0));

    vec![
        Scenario::new("baseline", "baseline", ScenarioOverrides::default()),
        Scenario::new(
            "ratelimit1",
            "nginx rate limiter (1)",
            ScenarioOverrides::default().proxy_limit(1, 10),
        ),
        Scenario::new(
            "ratelimit2",
            "nginx rate limiter (2)",
            ScenarioOverrides::default().proxy_limit(5, 50),
        ),
        Scenario::new("farm1children1", "1 php-cgi, 1 child", one_second().pool(1, 1)),
        Scenario::new("farm10children1", "10 php-cgi, 1 child", one_second().pool(10, 1)),
        Scenario::new(
            "farm1children10",
            "1 php-cgi, 10 children",
            one_second().pool(1, 10),
        ),
        Scenario::new(
            "farm10children10",
            "10 php-cgi, 10 children",
            one_second().pool(10, 10),
        ),
    ]
}

/// Load scenarios from a json file: `[{"name": "...", "options": {...}}, ...]`.
pub fn load_scenarios<P: AsRef<Path>>(path: P) -> Result<Vec<Scenario>, StampedeError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let scenarios: Vec<Scenario> = serde_json::from_str(&contents)?;
    validate_scenarios(&scenarios)?;
    debug!(
        "loaded {} scenarios from {}",
        scenarios.len(),
        path.as_ref().display()
    );

    Ok(scenarios)
}

/// Every scenario needs a distinct, non-empty machine name.
pub fn validate_scenarios(scenarios: &[Scenario]) -> Result<(), StampedeError> {
    if scenarios.is_empty() {
        return Err(StampedeError::NoScenarios {
            detail: "the scenario list is empty".to_string(),
        });
    }

    for (index, scenario) in scenarios.iter().enumerate() {
        let machine_name = scenario.machine_name();
        if machine_name.is_empty() {
            return Err(StampedeError::InvalidOption {
                option: "scenario.name".to_string(),
                value: scenario.name.clone(),
                detail: "scenario names need at least one alphanumeric character.".to_string(),
            });
        }
        if scenarios[..index]
            .iter()
            .any(|other| other.machine_name() == machine_name)
        {
            return Err(StampedeError::InvalidOption {
                option: "scenario.name".to_string(),
                value: scenario.name.clone(),
                detail: format!("more than one scenario is named {}.", machine_name),
            });
        }
    }

    Ok(())
}

/// Keep the scenarios named by the filter, in catalogue order. An empty filter keeps all.
pub fn select_scenarios(
    catalogue: Vec<Scenario>,
    filter: &Scenarios,
) -> Result<Vec<Scenario>, StampedeError> {
    for name in &filter.active {
        if !catalogue.iter().any(|s| &s.machine_name() == name) {
            return Err(StampedeError::NoScenarios {
                detail: format!(
                    "no scenario named {}, valid names: {}",
                    name,
                    catalogue.iter().map(Scenario::machine_name).join(", ")
                ),
            });
        }
    }

    let selected: Vec<Scenario> = catalogue
        .into_iter()
        .filter(|s| filter.active.is_empty() || filter.active.contains(&s.machine_name()))
        .collect();
    if selected.is_empty() {
        return Err(StampedeError::NoScenarios {
            detail: "the scenario list is empty".to_string(),
        });
    }

    Ok(selected)
}

/// The listing printed by `--scenarios-list`.
pub fn list_scenarios(scenarios: &[Scenario]) -> String {
    let mut listing = String::from("Scenarios:\n");
    for scenario in scenarios {
        listing.push_str(&format!(
            " - {}: ({})\n",
            scenario.machine_name(),
            scenario.title()
        ));
    }
    listing
}

/// The totals of every phase a scenario ran.
#[derive(Clone, Debug, PartialEq)]
pub struct ScenarioSummary {
    pub name: String,
    pub phases: Vec<(HttpMethod, DispatchSummary)>,
}

/// Runs scenarios one after the other against shared servers.
pub struct ScenarioRunner<W: Write> {
    driver: LoadDriver<W>,
    environment: Box<dyn Environment>,
    processes: Box<dyn ProcessControl>,
    defaults: ScenarioOptions,
    /// Applied on top of every scenario's own overrides.
    overrides: ScenarioOverrides,
    settle_delay: Duration,
    base_port: u16,
}

impl ScenarioRunner<io::Stdout> {
    /// Build a runner reporting to standard out from the command line options.
    pub fn from_configuration(
        configuration: &StampedeConfiguration,
    ) -> Result<Self, StampedeError> {
        let transport = ReqwestTransport::new(configuration.timeout())?;
        let mut issuer = RequestIssuer::new(transport, &configuration.host)?;
        if let Some(range) = configuration.success_range {
            issuer = issuer.with_success_predicate(move |status| range.contains(status));
        }
        let driver = LoadDriver::new(issuer, OutcomeReporter::stdout());

        let work_dir = PathBuf::from(&configuration.work_dir);
        let environment = TemplateEnvironment::new()
            .add_template(
                work_dir.join(&configuration.proxy_template),
                work_dir.join(&configuration.proxy_config),
            )
            .add_template(
                work_dir.join(&configuration.app_template),
                work_dir.join(&configuration.app_config),
            );
        let processes = ShellProcessControl::new(
            &configuration.start_command,
            &configuration.stop_command,
            &work_dir,
            &configuration.log_dir,
        );

        Ok(ScenarioRunner::new(driver, environment, processes)
            .set_overrides(configuration.overrides())
            .set_settle_delay(configuration.settle_delay())
            .set_base_port(configuration.base_port))
    }
}

impl<W: Write> ScenarioRunner<W> {
    pub fn new<E, P>(driver: LoadDriver<W>, environment: E, processes: P) -> Self
    where
        E: Environment + 'static,
        P: ProcessControl + 'static,
    {
        ScenarioRunner {
            driver,
            environment: Box::new(environment),
            processes: Box::new(processes),
            defaults: ScenarioOptions::default(),
            overrides: ScenarioOverrides::default(),
            settle_delay: Duration::from_secs(2),
            base_port: DEFAULT_BASE_PORT,
        }
    }

    pub fn set_defaults(mut self, defaults: ScenarioOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn set_overrides(mut self, overrides: ScenarioOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn set_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn set_base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }

    pub fn driver(&self) -> &LoadDriver<W> {
        &self.driver
    }

    pub fn into_driver(self) -> LoadDriver<W> {
        self.driver
    }

    /// The effective options of a scenario: defaults, then its own overrides, then the
    /// runner's overrides.
    pub fn options_for(&self, scenario: &Scenario) -> ScenarioOptions {
        self.defaults
            .apply(&scenario.options)
            .apply(&self.overrides)
    }

    /// Clean the logs and stop leftover servers, then run each scenario in turn.
    pub async fn run_all(
        &mut self,
        scenarios: &[Scenario],
    ) -> Result<Vec<ScenarioSummary>, StampedeError> {
        self.processes.clean_logs().await?;
        if let Err(e) = self.processes.stop().await {
            debug!("no servers stopped before the first scenario: {}", e);
        }

        let mut summaries = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            if is_canceled() {
                warn!("canceled, skipping remaining scenarios");
                break;
            }
            summaries.push(self.run_scenario(scenario).await?);
        }

        Ok(summaries)
    }

    /// Run one scenario from rendering its environment to stopping its servers.
    pub async fn run_scenario(
        &mut self,
        scenario: &Scenario,
    ) -> Result<ScenarioSummary, StampedeError> {
        let options = self.options_for(scenario);
        options.validate()?;

        let printable = serde_json::to_string_pretty(&options)?;
        self.driver.reporter_mut().banner(scenario.title(), &printable);
        info!(
            "scenario {} started at {}",
            scenario.machine_name(),
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );

        let view = EnvironmentView::new(&options, self.base_port)?;
        self.environment.render(&view).await?;
        self.processes.start(&server_environment(&options)).await?;

        let phases = self.run_phases(&options).await;

        // The servers come down even if a phase failed.
        self.settle().await;
        if let Err(e) = self.processes.stop().await {
            warn!("failed to stop servers: {}", e);
        }
        info!(
            "scenario {} finished at {}",
            scenario.machine_name(),
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );

        Ok(ScenarioSummary {
            name: scenario.name.clone(),
            phases: phases?,
        })
    }

    async fn run_phases(
        &mut self,
        options: &ScenarioOptions,
    ) -> Result<Vec<(HttpMethod, DispatchSummary)>, StampedeError> {
        let mut phases = Vec::new();
        for method in HttpMethod::iter() {
            self.settle().await;
            if is_canceled() {
                warn!("canceled, skipping {} phase", method);
                break;
            }
            let summary = self.driver.run(&options.run_config(method)).await?;
            phases.push((method, summary));
        }
        Ok(phases)
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            debug!("settling for {:?}", self.settle_delay);
            tokio::time::sleep(self.settle_delay).await;
        }
    }
}
