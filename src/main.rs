use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::*;
use std::collections::HashMap;
use std::process;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use lanscan::{
    config::ScanConfig,
    history::{HistoryEntry, HistoryLog},
    output::{OutputConfig, OutputFormat, OutputManager},
    request::{ScanRequest, SubnetsResponse},
    tasks::TaskRunner,
    ScanEngine,
};

fn format_arg() -> Arg {
    Arg::new("format")
        .short('f')
        .long("format")
        .value_name("FORMAT")
        .help("Output format: text or json")
        .default_value("text")
}

fn output_arg() -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .value_name("FILE")
        .help("Write results to a file instead of stdout")
}

fn build_cli() -> Command {
    Command::new("lanscan")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Discover devices on the local network")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (defaults to ~/.lanscan.toml)")
                .global(true),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Disable colored output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("scan")
                .about("Scan a subnet for devices")
                .arg(
                    Arg::new("subnet")
                        .short('s')
                        .long("subnet")
                        .value_name("CIDR")
                        .help("Subnet to scan, or 'all' for every local subnet"),
                )
                .arg(
                    Arg::new("method")
                        .short('m')
                        .long("method")
                        .value_name("METHOD")
                        .help("auto, scan-l2 (arp-scan), scan-discovery (nmap) or ping"),
                )
                .arg(
                    Arg::new("include-offline")
                        .long("include-offline")
                        .help("Report hosts that did not answer")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("deep")
                        .short('d')
                        .long("deep")
                        .help("Merge SSDP, mDNS and DHCP lease data")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("timeout")
                        .short('t')
                        .long("timeout")
                        .value_name("SECONDS")
                        .help("Per-host ping timeout in seconds"),
                )
                .arg(
                    Arg::new("save")
                        .long("save")
                        .help("Append the result to the scan history")
                        .action(ArgAction::SetTrue),
                )
                .arg(format_arg())
                .arg(output_arg()),
        )
        .subcommand(
            Command::new("subnets")
                .about("List local IPv4 subnets that can be scanned")
                .arg(
                    Arg::new("max-prefix")
                        .long("max-prefix")
                        .value_name("N")
                        .help("Skip subnets with a longer prefix")
                        .value_parser(clap::value_parser!(u8).range(0..=32)),
                )
                .arg(format_arg()),
        )
        .subcommand(
            Command::new("stations")
                .about("List Wi-Fi stations associated with local access points")
                .arg(format_arg()),
        )
        .subcommand(
            Command::new("history").about("Show recent scans").arg(
                Arg::new("limit")
                    .short('n')
                    .long("limit")
                    .value_name("N")
                    .default_value("10")
                    .value_parser(clap::value_parser!(usize)),
            ),
        )
        .subcommand(
            Command::new("tasks")
                .about("Approved maintenance tasks")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List approved tasks").arg(format_arg()))
                .subcommand(
                    Command::new("run")
                        .about("Run an approved task")
                        .arg(Arg::new("id").value_name("ID").required(true).index(1))
                        .arg(
                            Arg::new("param")
                                .short('p')
                                .long("param")
                                .value_name("KEY=VALUE")
                                .help("Task parameter, may be repeated")
                                .action(ArgAction::Append),
                        )
                        .arg(
                            Arg::new("cwd")
                                .long("cwd")
                                .value_name("DIR")
                                .help("Working directory for the task"),
                        ),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<ScanConfig> {
    let config = match matches.get_one::<String>("config") {
        Some(path) => ScanConfig::from_toml_file(path)?,
        None => ScanConfig::load_default_config(),
    }
    .apply_env();
    config.validate()?;
    Ok(config)
}

fn output_manager(matches: &ArgMatches, colored: bool) -> anyhow::Result<OutputManager> {
    let format = match matches.get_one::<String>("format") {
        Some(f) => f.parse::<OutputFormat>().map_err(|e| anyhow!(e))?,
        None => OutputFormat::Text,
    };
    let file = matches.try_get_one::<String>("output").ok().flatten().cloned();
    Ok(OutputManager::new(OutputConfig { format, file, colored }))
}

fn parse_params(values: Option<clap::parser::ValuesRef<'_, String>>) -> anyhow::Result<HashMap<String, String>> {
    let mut params = HashMap::new();
    for value in values.into_iter().flatten() {
        let (key, val) = value
            .split_once('=')
            .ok_or_else(|| anyhow!("Parameter must be KEY=VALUE: {}", value))?;
        params.insert(key.trim().to_string(), val.to_string());
    }
    Ok(params)
}

async fn run_scan(config: ScanConfig, matches: &ArgMatches, colored: bool) -> anyhow::Result<()> {
    let mut query = HashMap::new();
    if let Some(subnet) = matches.get_one::<String>("subnet") {
        query.insert("subnet".to_string(), subnet.clone());
    }
    if let Some(method) = matches.get_one::<String>("method") {
        query.insert("method".to_string(), method.clone());
    }
    if let Some(timeout) = matches.get_one::<String>("timeout") {
        query.insert("timeout".to_string(), timeout.clone());
    }
    if matches.get_flag("include-offline") {
        query.insert("include_offline".to_string(), "true".to_string());
    }
    if matches.get_flag("deep") {
        query.insert("deep".to_string(), "true".to_string());
    }

    let request = ScanRequest::from_query(&query, &config).context("Invalid scan request")?;
    let output = output_manager(matches, colored)?;
    let history = HistoryLog::new(config.history_path());
    let engine = Arc::new(ScanEngine::new(config));

    let report = engine.scan_report(&request).await;
    if report.no_subnet() {
        eprintln!(
            "{}",
            "[!] No subnet given and none could be determined. Use --subnet <cidr>.".bright_red()
        );
        process::exit(2);
    }

    output.write_devices(&report.devices)?;

    if matches.get_flag("save") {
        history.append(&HistoryEntry::new(request.to_params(), report.devices))?;
        eprintln!("{} {}", "[~] Saved to".bright_blue(), history.path().display());
    }
    Ok(())
}

async fn run_tasks(config: &ScanConfig, matches: &ArgMatches, colored: bool) -> anyhow::Result<()> {
    let runner = TaskRunner::from_config(config);

    match matches.subcommand() {
        Some(("list", sub)) => {
            let tasks = runner.list()?;
            output_manager(sub, colored)?.write_tasks(&tasks)?;
        }
        Some(("run", sub)) => {
            let id = sub
                .get_one::<String>("id")
                .ok_or_else(|| anyhow!("Task id is required"))?;
            let params = parse_params(sub.get_many::<String>("param"))?;
            let cwd = sub.get_one::<String>("cwd").map(std::path::PathBuf::from);

            let outcome = runner.run(id, &params, cwd.as_deref()).await?;
            print!("{}", outcome.output);
            if outcome.code != 0 {
                process::exit(outcome.code);
            }
        }
        _ => unreachable!("subcommand is required"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = build_cli().get_matches();
    let colored = !matches.get_flag("no-color");
    if !colored {
        colored::control::set_override(false);
    }

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "[!] Configuration error:".bright_red(), e);
            process::exit(1);
        }
    };

    match matches.subcommand() {
        Some(("scan", sub)) => run_scan(config, sub, colored).await?,
        Some(("subnets", sub)) => {
            let max_prefix = sub.get_one::<u8>("max-prefix").copied().unwrap_or(config.max_prefix);
            let engine = ScanEngine::new(config);
            let subnets = engine.discover_all_cidrs(max_prefix).await;
            output_manager(sub, colored)?.write_subnets(&SubnetsResponse::new(&subnets))?;
        }
        Some(("stations", sub)) => {
            let engine = ScanEngine::new(config);
            let stations = engine.discover_wifi_stations().await;
            output_manager(sub, colored)?.write_stations(&stations)?;
        }
        Some(("history", sub)) => {
            let limit = sub.get_one::<usize>("limit").copied().unwrap_or(10);
            HistoryLog::new(config.history_path()).print_list(limit)?;
        }
        Some(("tasks", sub)) => run_tasks(&config, sub, colored).await?,
        _ => unreachable!("subcommand is required"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_scan_arguments() {
        let matches = build_cli()
            .try_get_matches_from(["lanscan", "scan", "--subnet", "all", "--deep", "-f", "json"])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "scan");
        assert_eq!(sub.get_one::<String>("subnet").unwrap(), "all");
        assert!(sub.get_flag("deep"));
        assert!(!sub.get_flag("include-offline"));
        assert_eq!(sub.get_one::<String>("format").unwrap(), "json");
    }

    #[test]
    fn test_task_params() {
        let matches = build_cli()
            .try_get_matches_from(["lanscan", "tasks", "run", "restart", "-p", "unit=nginx", "-p", "q=a=b"])
            .unwrap();
        let (_, tasks) = matches.subcommand().unwrap();
        let (_, run) = tasks.subcommand().unwrap();
        let params = parse_params(run.get_many::<String>("param")).unwrap();
        assert_eq!(params["unit"], "nginx");
        assert_eq!(params["q"], "a=b");

        let bad = build_cli()
            .try_get_matches_from(["lanscan", "tasks", "run", "restart", "-p", "novalue"])
            .unwrap();
        let (_, tasks) = bad.subcommand().unwrap();
        let (_, run) = tasks.subcommand().unwrap();
        assert!(parse_params(run.get_many::<String>("param")).is_err());
    }
}
