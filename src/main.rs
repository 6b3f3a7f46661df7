//! Fleet Scheduling - command line

use clap::builder::PossibleValuesParser;
use clap::{arg, value_parser, ArgAction, ArgMatches, Command};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use fleet_scheduling::console;
use fleet_scheduling::demo_data::{self, list_demo_data, DemoData, DispatchBehaviour};
use fleet_scheduling::error::{Result, SolveError};
use fleet_scheduling::facts::Instance;
use fleet_scheduling::scheduler::Loading;
use fleet_scheduling::scripted::ScriptedEngine;
use fleet_scheduling::solver::{self, SolveMode, SolverConfig};

fn cli() -> Command {
    Command::new("fleet-scheduling")
        .about("Schedules a vehicle fleet over a monthly horizon")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("demo")
                .about("Writes a demo instance")
                .arg(arg!(<OUTPUT> "Path of the instance file to write").value_parser(value_parser!(PathBuf)))
                .arg(
                    arg!(--size [SIZE] "Demo data set")
                        .default_value("SMALL")
                        .ignore_case(true)
                        .value_parser(PossibleValuesParser::new(list_demo_data())),
                )
                .arg(
                    arg!(--copies [COPIES] "Copies of the road network served by the same fleet")
                        .default_value("1")
                        .value_parser(value_parser!(u32).range(1..=26)),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Runs the solve orchestration on an instance with the built-in simulated dispatcher")
                .arg(arg!(<INSTANCE> "Preprocessed instance file").value_parser(value_parser!(PathBuf)))
                .arg(
                    arg!(--solution [SOLUTION] "Write the best model to this file")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--results [RESULTS] "Write the statistics to this JSON file")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--duration [SECONDS] "Total solving budget in seconds")
                        .default_value("300")
                        .value_parser(value_parser!(u64)),
                )
                .arg(arg!(--"iterative-solving" "Solve the horizon month by month").action(ArgAction::SetTrue))
                .arg(
                    arg!(--"require-loading" "Require that vehicles load or drop at every node")
                        .action(ArgAction::SetTrue),
                )
                .arg(arg!(--"include-cost" "Minimize the travel cost").action(ArgAction::SetTrue))
                .arg(
                    arg!(--"include-quantities" "Include linear constraints for quantities and capacities")
                        .action(ArgAction::SetTrue),
                )
                .arg(arg!(--verbose "Print every model").action(ArgAction::SetTrue))
                .arg(
                    arg!(--"engine-arg" [ARG] "Option passed through to the engine")
                        .action(ArgAction::Append)
                        .allow_hyphen_values(true)
                        .value_parser(value_parser!(String)),
                ),
        )
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fleet_scheduling=info".parse().unwrap()))
        .init();

    let matches = cli().get_matches();
    let result = match matches.subcommand() {
        Some(("demo", sub_m)) => write_demo(sub_m),
        Some(("simulate", sub_m)) => simulate_instance(sub_m).await,
        _ => Err(SolveError::Program("invalid subcommand".to_string())),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn write_demo(matches: &ArgMatches) -> Result<()> {
    let output = matches.get_one::<PathBuf>("OUTPUT").cloned().unwrap_or_default();
    let size = matches.get_one::<String>("size").map(String::as_str).unwrap_or("SMALL");
    let demo: DemoData = size.parse().map_err(|_| {
        SolveError::Program(format!(
            "unknown demo data set `{}`, expected one of {}",
            size,
            list_demo_data().join(", ")
        ))
    })?;
    let copies = matches.get_one::<u32>("copies").copied().unwrap_or(1);

    let instance = demo_data::duplicate(&demo.generate()?, copies)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| SolveError::io(parent, e))?;
    }
    fs::write(&output, instance.render()).map_err(|e| SolveError::io(&output, e))?;
    println!(
        "Wrote {} demo instance ({} facts) to {}",
        demo.as_str(),
        instance.len(),
        output.display()
    );
    Ok(())
}

async fn simulate_instance(matches: &ArgMatches) -> Result<()> {
    let path = matches.get_one::<PathBuf>("INSTANCE").cloned().unwrap_or_default();
    let text = fs::read_to_string(&path).map_err(|e| SolveError::io(&path, e))?;
    let instance = Instance::parse(&text)?;

    let config = SolverConfig {
        time_limit: Duration::from_secs(matches.get_one::<u64>("duration").copied().unwrap_or(300)),
        mode: if matches.get_flag("iterative-solving") {
            SolveMode::Iterative
        } else {
            SolveMode::OneShot
        },
        loading: if matches.get_flag("require-loading") {
            Loading::Required
        } else {
            Loading::Optional
        },
        include_cost: matches.get_flag("include-cost"),
        include_quantities: matches.get_flag("include-quantities"),
        verbose: matches.get_flag("verbose"),
        solution_path: matches.get_one::<PathBuf>("solution").cloned(),
        statistics_path: matches.get_one::<PathBuf>("results").cloned(),
        ..SolverConfig::default_config()
    };
    let arguments: Vec<String> = matches
        .get_many::<String>("engine-arg")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    console::print_banner();
    console::print_simulation_notice();
    console::print_config(&instance);

    let engine = ScriptedEngine::new(DispatchBehaviour::default()).with_arguments(arguments);
    solver::solve(engine, &instance, &config).await?;
    Ok(())
}
