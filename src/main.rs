use gumdrop::Options;
use stampede::scenario::{
    builtin_scenarios, list_scenarios, load_scenarios, select_scenarios, ScenarioRunner,
};
use stampede::util::setup_ctrlc_handler;
use stampede::{StampedeConfiguration, StampedeError};

#[tokio::main]
async fn main() -> Result<(), StampedeError> {
    let mut configuration = StampedeConfiguration::parse_args_default_or_exit();
    if configuration.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    configuration.configure();
    configuration.initialize_logger()?;
    configuration.validate()?;

    let catalogue = if configuration.scenarios_file.is_empty() {
        builtin_scenarios()
    } else {
        load_scenarios(&configuration.scenarios_file)?
    };
    if configuration.scenarios_list {
        print!("{}", list_scenarios(&catalogue));
        return Ok(());
    }
    let scenarios = select_scenarios(catalogue, &configuration.scenarios)?;

    let mut runner = ScenarioRunner::from_configuration(&configuration)?;
    setup_ctrlc_handler();
    runner.run_all(&scenarios).await?;

    Ok(())
}
