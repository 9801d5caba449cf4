use async_trait::async_trait;
use http::StatusCode;
use std::sync::{Arc, Mutex};
use url::Url;

mod common;

use stampede::prelude::*;

/// Every collaborator call, in the order it happened.
type Events = Arc<Mutex<Vec<String>>>;

fn push(events: &Events, event: String) {
    events.lock().unwrap().push(event);
}

fn failure(command: &str) -> StampedeError {
    StampedeError::Process {
        command: command.to_string(),
        detail: "failed on purpose".to_string(),
    }
}

// Records the pool size of each rendered environment.
struct RecordingEnvironment {
    events: Events,
    fail: bool,
}

#[async_trait]
impl Environment for RecordingEnvironment {
    async fn render(&self, view: &EnvironmentView) -> Result<(), StampedeError> {
        push(&self.events, format!("render {}", view.pool.len()));
        if self.fail {
            return Err(StampedeError::InvalidTemplate {
                path: "test.template".to_string(),
                detail: "failed on purpose".to_string(),
            });
        }
        Ok(())
    }
}

// Records the children passed to each start.
struct RecordingProcesses {
    events: Events,
    fail_start: bool,
    fail_stop: bool,
}

#[async_trait]
impl ProcessControl for RecordingProcesses {
    async fn start(&self, env: &[(String, String)]) -> Result<(), StampedeError> {
        let children = env
            .iter()
            .find(|(key, _)| key == "PHP_FCGI_CHILDREN")
            .map(|(_, value)| value.clone())
            .unwrap_or_default();
        push(&self.events, format!("start {}", children));
        if self.fail_start {
            return Err(failure("start"));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), StampedeError> {
        push(&self.events, "stop".to_string());
        if self.fail_stop {
            return Err(failure("stop"));
        }
        Ok(())
    }

    async fn clean_logs(&self) -> Result<(), StampedeError> {
        push(&self.events, "clean".to_string());
        Ok(())
    }
}

// Answers every request with 200 OK, recording its method.
struct RecordingTransport {
    events: Events,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        method: HttpMethod,
        _url: Url,
    ) -> Result<TransportResponse, TransportError> {
        push(&self.events, method.to_string());
        Ok(TransportResponse::from_status(StatusCode::OK))
    }
}

struct Failures {
    render: bool,
    start: bool,
    stop: bool,
}

const NO_FAILURES: Failures = Failures {
    render: false,
    start: false,
    stop: false,
};

fn build_runner(events: &Events, failures: Failures) -> ScenarioRunner<Vec<u8>> {
    let transport = RecordingTransport {
        events: events.clone(),
    };
    let issuer = RequestIssuer::new(transport, "http://127.0.0.1/").unwrap();
    let driver = LoadDriver::new(issuer, OutcomeReporter::new(Vec::new()));

    ScenarioRunner::new(
        driver,
        RecordingEnvironment {
            events: events.clone(),
            fail: failures.render,
        },
        RecordingProcesses {
            events: events.clone(),
            fail_start: failures.start,
            fail_stop: failures.stop,
        },
    )
    .set_settle_delay(std::time::Duration::ZERO)
    .set_overrides(ScenarioOverrides {
        requests_per_second: Some(1000.0),
        total_requests: Some(2),
        ..Default::default()
    })
}

fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new("a", "", ScenarioOverrides::default().pool(1, 1)),
        Scenario::new("b", "", ScenarioOverrides::default().pool(3, 10)),
    ]
}

fn recorded(events: &Events) -> Vec<String> {
    events.lock().unwrap().clone()
}

#[tokio::test]
async fn scenarios_run_in_sequence() {
    let events = Events::default();
    let mut runner = build_runner(&events, NO_FAILURES);

    let summaries = runner.run_all(&scenarios()).await.unwrap();

    assert_eq!(
        recorded(&events),
        vec![
            "clean", "stop", // Prepare.
            "render 1", "start 1", "GET", "GET", "POST", "POST", "stop", // Scenario a.
            "render 3", "start 10", "GET", "GET", "POST", "POST", "stop", // Scenario b.
        ]
    );

    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[1].name, "b");
    let methods: Vec<HttpMethod> = summaries[1].phases.iter().map(|(m, _)| *m).collect();
    assert_eq!(methods, vec![HttpMethod::Get, HttpMethod::Post]);
    assert!(summaries[1].phases.iter().all(|(_, s)| s.successes == 2));

    // One banner per scenario, showing the effective options.
    let output = String::from_utf8(runner.into_driver().into_reporter().into_inner()).unwrap();
    assert_eq!(output.matches("\nA\n").count(), 1);
    assert_eq!(output.matches("\nB\n").count(), 1);
    assert!(output.contains("\"pool_children\": 10"));
    assert_eq!(output.matches("Starting 2 GET requests...").count(), 2);
}

#[tokio::test]
async fn stop_failures_are_swallowed() {
    let events = Events::default();
    let mut runner = build_runner(
        &events,
        Failures {
            stop: true,
            ..NO_FAILURES
        },
    );

    let summaries = runner.run_all(&scenarios()).await.unwrap();

    assert_eq!(summaries.len(), 2);
    assert_eq!(
        recorded(&events).iter().filter(|e| *e == "stop").count(),
        3
    );
}

#[tokio::test]
async fn render_failure_aborts() {
    let events = Events::default();
    let mut runner = build_runner(
        &events,
        Failures {
            render: true,
            ..NO_FAILURES
        },
    );

    assert!(runner.run_all(&scenarios()).await.is_err());
    assert_eq!(recorded(&events), vec!["clean", "stop", "render 1"]);
}

#[tokio::test]
async fn start_failure_aborts() {
    let events = Events::default();
    let mut runner = build_runner(
        &events,
        Failures {
            start: true,
            ..NO_FAILURES
        },
    );

    assert!(runner.run_all(&scenarios()).await.is_err());
    assert_eq!(
        recorded(&events),
        vec!["clean", "stop", "render 1", "start 1"]
    );
}

#[tokio::test]
async fn invalid_options_abort_before_render() {
    let events = Events::default();
    let mut runner = build_runner(&events, NO_FAILURES);

    let broken = Scenario::new("broken", "", ScenarioOverrides::default().pool(0, 1));
    assert!(runner.run_scenario(&broken).await.is_err());
    assert!(recorded(&events).is_empty());
}

#[test]
fn options_layering() {
    let events = Events::default();
    let runner = build_runner(&events, NO_FAILURES).set_defaults(ScenarioOptions {
        pool_max_requests: 500,
        ..Default::default()
    });

    let scenario = Scenario::new(
        "layered",
        "",
        ScenarioOverrides {
            total_requests: Some(10),
            pool_size: Some(4),
            ..Default::default()
        },
    );
    let options = runner.options_for(&scenario);

    // The runner's overrides win over the scenario's.
    assert_eq!(options.total_requests, 2);
    assert_eq!(options.requests_per_second, 1000.0);
    assert_eq!(options.pool_size, 4);
    assert_eq!(options.pool_max_requests, 500);
}

#[cfg(unix)]
#[tokio::test]
async fn configured_runner() {
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;

    let server = MockServer::start_async().await;
    let get = server
        .mock_async(|when, then| {
            when.method(GET).path("/").query_param("delay", "0");
            then.status(200);
        })
        .await;
    let post = server
        .mock_async(|when, then| {
            when.method(POST).path("/").query_param("delay", "0");
            then.status(200);
        })
        .await;

    let work_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        work_dir.path().join("proxy.template"),
        "{{#each pool}}server 127.0.0.1:{{port}};\n{{/each}}rate={{proxy_limit_rps}}r/s\n",
    )
    .unwrap();
    std::fs::write(
        work_dir.path().join("app.template"),
        "max_execution_time = {{max_execution_time}}\n",
    )
    .unwrap();
    std::fs::create_dir(work_dir.path().join("logs")).unwrap();
    std::fs::write(work_dir.path().join("logs").join("error.log"), "old").unwrap();
    std::fs::write(
        work_dir.path().join("scenarios.json"),
        r#"[{"name": "small", "options": {"pool_size": 2, "proxy_limit_rps": 7}}]"#,
    )
    .unwrap();

    let work_dir_path = work_dir.path().display().to_string();
    let configuration = common::build_configuration(
        &server,
        vec![
            "--work-dir",
            &work_dir_path,
            "--proxy-template",
            "proxy.template",
            "--proxy-config",
            "proxy.conf",
            "--app-template",
            "app.template",
            "--app-config",
            "app.ini",
            "--log-dir",
            "logs",
            "--start-command",
            "true",
            "--stop-command",
            "true",
            "--requests-per-second",
            "200",
            "--total-requests",
            "4",
        ],
    );

    let scenarios = stampede::scenario::load_scenarios(work_dir.path().join("scenarios.json"))
        .unwrap();
    let mut runner = ScenarioRunner::from_configuration(&configuration).unwrap();
    let summaries = runner.run_all(&scenarios).await.unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(get.hits_async().await, 4);
    assert_eq!(post.hits_async().await, 4);

    let proxy = std::fs::read_to_string(work_dir.path().join("proxy.conf")).unwrap();
    assert_eq!(
        proxy,
        "server 127.0.0.1:19500;\nserver 127.0.0.1:19501;\nrate=7r/s\n"
    );
    let app = std::fs::read_to_string(work_dir.path().join("app.ini")).unwrap();
    assert_eq!(app, "max_execution_time = 600\n");
    assert!(!work_dir.path().join("logs").join("error.log").exists());
}
