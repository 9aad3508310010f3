use clap::{Arg, ArgMatches, Command};
use colored::*;
use log::{error, info, LevelFilter};
use std::path::Path;

use boardsim::cli::CliArgs;
use boardsim::definitions::DefinitionLibrary;
use boardsim::session::{self, Session};

fn main() {
    let matches = create_cli().get_matches();
    init_logging(matches.get_count("verbose"));

    if let Err(e) = run_application(&matches) {
        error!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn create_cli() -> Command {
    Command::new("boardsim")
        .version(boardsim::VERSION)
        .about("Builds a circuit board from a script, checks it and emits a netlist")
        .arg(
            Arg::new("input")
                .help("Board script file")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Output file for the compiled netlist"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .default_value("spice")
                .value_parser(["spice", "json"])
                .help("Netlist output format"),
        )
        .arg(
            Arg::new("drc")
                .long("drc")
                .value_name("FILE")
                .help("Write the design rule report as CSV"),
        )
        .arg(
            Arg::new("library")
                .long("library")
                .value_name("FILE")
                .help("JSON component definitions added to the built-in library"),
        )
        .arg(
            Arg::new("history")
                .long("history")
                .value_name("N")
                .help("Undo history capacity"),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .action(clap::ArgAction::SetTrue)
                .help("Fail when the design rule check reports violations"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("Increase verbosity level"),
        )
}

fn run_application(matches: &ArgMatches) -> anyhow::Result<()> {
    let args = CliArgs::from_matches(matches)?;

    info!("{}", "Starting boardsim".green().bold());
    info!("Input script: {}", args.input_file.bright_blue());

    if !Path::new(&args.input_file).exists() {
        return Err(anyhow::anyhow!("Input script '{}' not found", args.input_file));
    }

    let mut library = DefinitionLibrary::builtin();
    if let Some(library_file) = &args.library_file {
        let extra = DefinitionLibrary::load_json(library_file)?;
        info!("Loaded {} definitions from {}", extra.len(), library_file.bright_blue());
        library.extend(extra);
    }

    let mut session = Session::with_library(args.session_config(), library);
    session.run_file(&args.input_file)?;
    let report = session.finish()?;

    match &args.output_file {
        Some(output_file) => {
            session::write_outputs(&report, output_file, &args.output_format, args.drc_file.as_deref())?;
            info!("Netlist written to: {}", output_file.bright_green());
        }
        None => {
            if let Some(drc_file) = &args.drc_file {
                report.drc.save_csv(drc_file)?;
            }
            session.print_summary(&report);
        }
    }

    if let Some(drc_file) = &args.drc_file {
        info!("DRC report written to: {}", drc_file.bright_green());
    }

    if report.drc.is_clean() {
        info!("{}", "Board compiled successfully!".green().bold());
    } else {
        info!(
            "{}",
            format!("Board compiled with {} DRC violations", report.drc.violations.len()).yellow()
        );
    }
    Ok(())
}
