use gumdrop::Options;
use httpmock::MockServer;

use stampede::prelude::*;

/// Not all functions are used by all tests, so we enable allow(dead_code) to avoid
/// compiler warnings during testing.

/// The following options are configured by default, if not set to a custom value:
///  --host <mock-server>
///  --settle-delay 0
#[allow(dead_code)]
pub fn build_configuration(server: &MockServer, custom: Vec<&str>) -> StampedeConfiguration {
    // Start with an empty configuration.
    let mut configuration: Vec<&str> = vec![];
    // Declare server_url here no matter what, so its lifetime is sufficient when needed.
    let server_url = server.url("/");

    // Merge in all custom options first.
    configuration.extend_from_slice(&custom);

    // Default to using mock server if not otherwise configured.
    if !configuration.contains(&"--host") {
        configuration.extend_from_slice(&["--host", &server_url]);
    }

    // Default to not pausing between phases if not otherwise configured.
    if !configuration.contains(&"--settle-delay") {
        configuration.extend_from_slice(&["--settle-delay", "0"]);
    }

    // Parse these options to generate a StampedeConfiguration.
    let mut configuration = StampedeConfiguration::parse_args_default(&configuration)
        .expect("failed to parse options and generate a configuration");
    configuration.configure();
    configuration
        .validate()
        .expect("failed to validate the configuration");
    configuration
}

/// Build a driver sending real requests to the mock server, reporting to memory.
#[allow(dead_code)]
pub fn build_driver(
    server: &MockServer,
    timeout: Option<std::time::Duration>,
) -> LoadDriver<Vec<u8>> {
    let transport = ReqwestTransport::new(timeout).expect("failed to build transport");
    let issuer =
        RequestIssuer::new(transport, &server.url("/")).expect("failed to build issuer");
    LoadDriver::new(issuer, OutcomeReporter::new(Vec::new()))
}

/// Everything a driver reported.
#[allow(dead_code)]
pub fn report_output(driver: LoadDriver<Vec<u8>>) -> String {
    String::from_utf8(driver.into_reporter().into_inner()).expect("report is not utf-8")
}
