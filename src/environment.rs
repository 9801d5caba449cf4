//! Render the proxy and application configuration for a scenario.
//!
//! The [`Environment`] trait is the seam between a scenario and the files the servers
//! under test read on startup. [`TemplateEnvironment`] renders two template files with
//! [`handlebars`](https://docs.rs/handlebars/) in strict mode:
//!
//!  - `{{name}}` is replaced with the value of the scenario option `name`. Rates and
//!    delays are written the way the start command receives them, a delay list is
//!    comma separated.
//!  - `{{#each pool}} ... {{/each}}` repeats its body once per pool member, inside
//!    which `{{port}}` is that member's port.
//!
//! An unknown placeholder is an error, so a typo in a template aborts the scenario
//! instead of silently producing a broken configuration.

use async_trait::async_trait;
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

use crate::config::ScenarioOptions;
use crate::StampedeError;

/// One application server of the pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolMember {
    pub port: u16,
}

/// Everything a configuration template can refer to.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EnvironmentView {
    #[serde(flatten)]
    pub options: ScenarioOptions,
    /// One member per pool slot, on consecutive ports from the base port.
    pub pool: Vec<PoolMember>,
}

impl EnvironmentView {
    pub fn new(options: &ScenarioOptions, base_port: u16) -> Result<Self, StampedeError> {
        let mut pool = Vec::with_capacity(options.pool_size);
        for slot in 0..options.pool_size {
            let port = u16::try_from(base_port as usize + slot).map_err(|_| {
                StampedeError::InvalidOption {
                    option: "pool_size".to_string(),
                    value: options.pool_size.to_string(),
                    detail: format!("pool members starting at port {} exceed 65535", base_port),
                }
            })?;
            pool.push(PoolMember { port });
        }

        Ok(EnvironmentView {
            options: options.clone(),
            pool,
        })
    }

    /// The view as template data.
    ///
    /// Floating point options are written with their `Display` form, so `1.0` renders
    /// as `1`, the same text passed to the start command.
    pub fn to_context(&self) -> Result<Value, StampedeError> {
        let mut context = serde_json::to_value(self)?;
        if let Some(object) = context.as_object_mut() {
            object.insert(
                "requests_per_second".to_string(),
                Value::String(self.options.requests_per_second.to_string()),
            );
            object.insert(
                "response_delay".to_string(),
                Value::String(self.options.response_delay.to_string()),
            );
        }
        Ok(context)
    }
}

/// Prepares the servers' configuration before they start.
#[async_trait]
pub trait Environment: Send + Sync {
    async fn render(&self, view: &EnvironmentView) -> Result<(), StampedeError>;
}

/// Renders template files to the paths the servers read.
#[derive(Clone, Debug)]
pub struct TemplateEnvironment {
    handlebars: Handlebars<'static>,
    /// Pairs of (template, destination).
    templates: Vec<(PathBuf, PathBuf)>,
}

impl TemplateEnvironment {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        // Error on missing variables.
        handlebars.set_strict_mode(true);
        // Configuration files are not html.
        handlebars.register_escape_fn(handlebars::no_escape);

        TemplateEnvironment {
            handlebars,
            templates: Vec::new(),
        }
    }

    pub fn add_template(
        mut self,
        template: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        self.templates.push((template.into(), destination.into()));
        self
    }

    /// Render one template source against a view.
    pub fn render_template(
        &self,
        template: &str,
        view: &EnvironmentView,
    ) -> Result<String, String> {
        let context = view.to_context().map_err(|e| e.to_string())?;
        self.handlebars
            .render_template(template, &context)
            .map_err(|e| e.to_string())
    }
}

impl Default for TemplateEnvironment {
    fn default() -> Self {
        TemplateEnvironment::new()
    }
}

#[async_trait]
impl Environment for TemplateEnvironment {
    async fn render(&self, view: &EnvironmentView) -> Result<(), StampedeError> {
        for (template, destination) in &self.templates {
            let source = tokio::fs::read_to_string(template).await.map_err(|e| {
                StampedeError::InvalidTemplate {
                    path: template.display().to_string(),
                    detail: e.to_string(),
                }
            })?;
            let rendered = self.render_template(&source, view).map_err(|detail| {
                StampedeError::InvalidTemplate {
                    path: template.display().to_string(),
                    detail,
                }
            })?;

            if let Err(e) = tokio::fs::write(destination, rendered).await {
                error!("failed to write {}: {}", destination.display(), e);
                return Err(e.into());
            }
            debug!(
                "applied template {} to {}",
                template.display(),
                destination.display()
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResponseDelay, ScenarioOverrides};
    use crate::process::{server_environment, RESPONSE_DELAY_VAR};

    fn view(pool_size: usize) -> EnvironmentView {
        let options =
            ScenarioOptions::default().apply(&ScenarioOverrides::default().pool(pool_size, 10));
        EnvironmentView::new(&options, 19500).unwrap()
    }

    #[test]
    fn pool_ports() {
        let view = view(3);
        assert_eq!(
            view.pool,
            vec![
                PoolMember { port: 19500 },
                PoolMember { port: 19501 },
                PoolMember { port: 19502 }
            ]
        );

        let options = ScenarioOptions::default().apply(&ScenarioOverrides::default().pool(2, 1));
        assert!(EnvironmentView::new(&options, 65535).is_err());
        assert!(EnvironmentView::new(&options, 65534).is_ok());
    }

    #[test]
    fn context_is_flat() {
        let context = view(1).to_context().unwrap();
        assert_eq!(context["pool_children"], 10);
        assert_eq!(context["proxy_limit_rps"], 1000);
        assert_eq!(context["requests_per_second"], "100");
        assert_eq!(context["response_delay"], "0");
        assert_eq!(context["pool"][0]["port"], 19500);
    }

    #[test]
    fn render_scalars_and_pool() {
        let environment = TemplateEnvironment::new();
        let template = "upstream php {\n{{#each pool}}    server 127.0.0.1:{{port}};\n{{/each}}    keepalive 8;\n}\nlimit_req_zone rate={{ proxy_limit_rps }}r/s burst={{proxy_limit_burst}};\nfastcgi_read_timeout {{proxy_read_timeout}}s;\n";

        assert_eq!(
            environment.render_template(template, &view(2)).unwrap(),
            "upstream php {\n    server 127.0.0.1:19500;\n    server 127.0.0.1:19501;\n    keepalive 8;\n}\nlimit_req_zone rate=1000r/s burst=10;\nfastcgi_read_timeout 600s;\n"
        );
    }

    #[test]
    fn delays_match_start_environment() {
        let environment = TemplateEnvironment::new();

        for delay in [
            ResponseDelay::Fixed(1.0),
            ResponseDelay::Fixed(0.25),
            ResponseDelay::Choice(vec![0.0, 0.0, 10.0]),
        ] {
            let mut view = view(1);
            view.options.response_delay = delay;
            let rendered = environment
                .render_template("{{response_delay}}", &view)
                .unwrap();

            let passed = server_environment(&view.options)
                .into_iter()
                .find(|(key, _)| key == RESPONSE_DELAY_VAR)
                .map(|(_, value)| value)
                .unwrap();
            assert_eq!(rendered, passed);
        }
    }

    #[test]
    fn render_errors() {
        let environment = TemplateEnvironment::new();
        let view = view(1);

        assert!(environment.render_template("{{nope}}", &view).is_err());
        assert!(environment
            .render_template("{{#each pool}}{{nope}}{{/each}}", &view)
            .is_err());
        assert!(environment.render_template("{{#each pool}}x", &view).is_err());
        // Text without placeholders is left alone, and nothing is html escaped.
        assert_eq!(
            environment
                .render_template("max_children = 5 <&>", &view)
                .unwrap(),
            "max_children = 5 <&>"
        );
    }

    #[tokio::test]
    async fn render_writes_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("php.ini.template");
        let destination = dir.path().join("php.ini");
        std::fs::write(&template, "max_execution_time = {{max_execution_time}}\n").unwrap();

        let environment = TemplateEnvironment::new().add_template(&template, &destination);
        environment.render(&view(1)).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&destination).unwrap(),
            "max_execution_time = 600\n"
        );

        // A broken template leaves the previous configuration in place.
        std::fs::write(&template, "max_execution_time = {{max_exec_time}}\n").unwrap();
        assert!(environment.render(&view(1)).await.is_err());
        assert_eq!(
            std::fs::read_to_string(&destination).unwrap(),
            "max_execution_time = 600\n"
        );

        let missing = TemplateEnvironment::new()
            .add_template(dir.path().join("missing.template"), &destination);
        assert!(missing.render(&view(1)).await.is_err());
    }
}
