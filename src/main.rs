use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use herd_manager::config::{Config, MasterConfig, SITE_CONFIG_SUFFIX};
use herd_manager::error::{ErrorCategory, HerdError};
use herd_manager::logging::init_logging;
use herd_manager::ports::valid_port;
use herd_manager::proxies::{JsonFileStore, ProxyStore};
use herd_manager::templates::{NginxTemplates, PROXY_TEMPLATE, SITE_TEMPLATE};
use herd_manager::{metrics, DesiredSite, ProxyRegistry, SiteManager};

/// Тело запроса на применение: `{"sites": [...]}` или просто массив
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApplyRequest {
    Wrapped { sites: Vec<DesiredSite> },
    Bare(Vec<DesiredSite>),
}

impl ApplyRequest {
    fn into_sites(self) -> Vec<DesiredSite> {
        match self {
            ApplyRequest::Wrapped { sites } | ApplyRequest::Bare(sites) => sites,
        }
    }
}

fn cli() -> Command {
    Command::new("herd-manager")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Expose Herd sites on local ports and manage .test reverse proxies")
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .value_name("FILE")
            .help("Configuration file path (default: ~/.herd-manager.yaml)")
            .global(true)
            .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new("test")
            .short('t')
            .long("test")
            .help("Test configuration and exit")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("print-metrics")
            .long("print-metrics")
            .help("Print Prometheus metrics to stderr before exit")
            .global(true)
            .action(ArgAction::SetTrue))
        .subcommand(Command::new("sites")
            .about("Manage exposed sites")
            .subcommand_required(true)
            .subcommand(Command::new("list").about("List parked and linked sites"))
            .subcommand(Command::new("apply")
                .about("Expose exactly the given sites")
                .arg(Arg::new("file")
                    .value_name("FILE")
                    .help("JSON file with sites, '-' for stdin")
                    .required(true)))
            .subcommand(Command::new("check-port")
                .about("Check whether a local port is free")
                .arg(Arg::new("port")
                    .required(true)
                    .allow_negative_numbers(true)
                    .value_parser(value_parser!(i64))))
            .subcommand(Command::new("status")
                .about("Check that active ports answer and inactive ports are silent")
                .arg(Arg::new("active")
                    .long("active")
                    .value_name("PORT")
                    .action(ArgAction::Append)
                    .value_parser(value_parser!(u16)))
                .arg(Arg::new("inactive")
                    .long("inactive")
                    .value_name("PORT")
                    .action(ArgAction::Append)
                    .value_parser(value_parser!(u16))))
            .subcommand(Command::new("ip").about("Print the local network IP address")))
        .subcommand(Command::new("proxies")
            .about("Manage .test reverse proxies")
            .subcommand_required(true)
            .subcommand(Command::new("list").about("List proxies"))
            .subcommand(Command::new("create")
                .about("Create <NAME>.test proxying to 127.0.0.1:<PORT>")
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("port")
                    .required(true)
                    .allow_negative_numbers(true)
                    .value_parser(value_parser!(i64))))
            .subcommand(Command::new("delete")
                .about("Delete a proxy")
                .arg(Arg::new("name").required(true))))
}

fn main() {
    let matches = cli().get_matches();

    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(Config::default_path);

    // Если запрошена проверка конфигурации
    if matches.get_flag("test") {
        let _ = env_logger::try_init();
        test_configuration(&config_path);
        return;
    }

    let config = load_config(&config_path);

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialize logging: {}, falling back to env_logger", e);
        let _ = env_logger::try_init();
    }

    let code = match matches.subcommand() {
        Some(("sites", sub)) => run_sites(&config, sub),
        Some(("proxies", sub)) => run_proxies(&config, sub),
        _ => {
            let _ = cli().print_help();
            2
        }
    };

    if matches.get_flag("print-metrics") || config.logging.metrics.enabled {
        eprint!("{}", metrics::render());
    }

    std::process::exit(code);
}

fn load_config(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }

    Config::load_from_file(path).unwrap_or_else(|e| {
        eprintln!("Failed to load config from {}: {}", path.display(), e);
        eprintln!("Using default configuration");
        Config::default()
    })
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to encode output: {}", e),
    }
}

fn exit_code(category: ErrorCategory) -> i32 {
    match category {
        ErrorCategory::InvalidInput => 2,
        ErrorCategory::Conflict => 3,
        ErrorCategory::NotFound => 4,
        ErrorCategory::Internal => 1,
    }
}

fn report_error(err: &HerdError) -> i32 {
    log::error!("{}", err);
    print_json(&json!({
        "success": false,
        "error": err.public_message(),
    }));
    exit_code(err.category())
}

fn run_sites(config: &Config, matches: &ArgMatches) -> i32 {
    let manager = match SiteManager::from_config(config) {
        Ok(manager) => manager,
        Err(e) => return report_error(&e),
    };

    match matches.subcommand() {
        Some(("list", _)) => {
            print_json(&json!({ "sites": manager.list_sites() }));
            0
        }
        Some(("apply", sub)) => {
            let source = sub.get_one::<String>("file").map(String::as_str).unwrap_or("-");
            let sites = match read_apply_request(source) {
                Ok(sites) => sites,
                Err(e) => {
                    log::warn!("Rejected apply request: {}", e);
                    print_json(&json!({ "success": false, "error": "Invalid sites data" }));
                    return exit_code(ErrorCategory::InvalidInput);
                }
            };

            let report = manager.apply(&sites);
            if report.is_success() {
                print_json(&json!({
                    "success": true,
                    "message": "Configurations applied successfully",
                    "steps": report.steps,
                }));
                0
            } else {
                print_json(&json!({
                    "success": false,
                    "error": "Failed to apply configurations",
                    "steps": report.steps,
                }));
                1
            }
        }
        Some(("check-port", sub)) => {
            let port = sub.get_one::<i64>("port").copied().unwrap_or(0);
            if valid_port(port).is_none() {
                print_json(&json!({ "available": false, "error": "Invalid port" }));
                return exit_code(ErrorCategory::InvalidInput);
            }
            print_json(&json!({
                "available": manager.check_port_availability(port),
                "port": port,
            }));
            0
        }
        Some(("status", sub)) => {
            let active: Vec<u16> = sub.get_many::<u16>("active").into_iter().flatten().copied().collect();
            let inactive: Vec<u16> = sub.get_many::<u16>("inactive").into_iter().flatten().copied().collect();
            let status = manager.ports().ports_status(&active, &inactive);
            print_json(&json!(status));
            0
        }
        Some(("ip", _)) => {
            print_json(&json!({ "ip": manager.local_ip_address() }));
            0
        }
        _ => 2,
    }
}

fn read_apply_request(source: &str) -> Result<Vec<DesiredSite>, HerdError> {
    let content = if source == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(source)?
    };

    let request: ApplyRequest = serde_json::from_str(&content)?;
    Ok(request.into_sites())
}

fn run_proxies(config: &Config, matches: &ArgMatches) -> i32 {
    let registry = match ProxyRegistry::from_config(config) {
        Ok(registry) => registry,
        Err(e) => return report_error(&e),
    };

    let result = match matches.subcommand() {
        Some(("list", _)) => registry
            .list_proxies()
            .map(|proxies| json!({ "proxies": proxies })),
        Some(("create", sub)) => {
            let name = sub.get_one::<String>("name").map(String::as_str).unwrap_or("");
            let port = sub.get_one::<i64>("port").copied().unwrap_or(0);
            registry
                .create_proxy(name, port)
                .map(|proxy| json!({ "success": true, "proxy": proxy }))
        }
        Some(("delete", sub)) => {
            let name = sub.get_one::<String>("name").map(String::as_str).unwrap_or("");
            registry.delete_proxy(name).map(|_| json!({ "success": true }))
        }
        _ => return 2,
    };

    match result {
        Ok(value) => {
            print_json(&value);
            0
        }
        Err(e) => report_error(&e),
    }
}

/// Функция проверки конфигурации (как nginx -t)
fn test_configuration(config_path: &Path) {
    println!("herd-manager: testing configuration...");

    let mut errors = 0;
    let mut warnings = 0;

    let config = if config_path.exists() {
        match Config::load_from_file(config_path) {
            Ok(config) => {
                println!("herd-manager: configuration file {} syntax is ok", config_path.display());
                config
            }
            Err(e) => {
                println!("herd-manager: [error] configuration file {} test failed: {}", config_path.display(), e);
                errors += 1;
                Config::default()
            }
        }
    } else {
        println!("herd-manager: no configuration file at {}, using defaults", config_path.display());
        Config::default()
    };

    let paths = config.paths();
    info!("Using Herd root {}", paths.herd_root().display());

    // Проверяем директорию nginx и master конфиг
    let nginx_dir = paths.nginx_dir();
    if !nginx_dir.is_dir() {
        println!("herd-manager: [error] nginx directory not found: {}", nginx_dir.display());
        errors += 1;
    }

    let mut included = Vec::new();
    match MasterConfig::load(paths.master_config()) {
        Ok(master) => {
            println!("herd-manager: master config {} is readable", paths.master_config().display());
            if !master.has_anchor() {
                println!(
                    "herd-manager: [warn] 'include herd.conf;' not found in master config, newly exposed sites will not be included"
                );
                warnings += 1;
            }
            included = master.included_site_configs();
        }
        Err(e) => {
            println!("herd-manager: [error] master config {} unreadable: {}", paths.master_config().display(), e);
            errors += 1;
        }
    }

    // Сверяем include с файлами сайтов на диске
    let on_disk: Vec<String> = fs::read_dir(&nginx_dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
                .filter(|name| name.ends_with(SITE_CONFIG_SUFFIX))
                .collect()
        })
        .unwrap_or_default();
    println!("herd-manager: found {} exposed site config(s)", on_disk.len());

    for file in &included {
        if !on_disk.contains(file) {
            println!("herd-manager: [warn] master config includes missing file {}", file);
            warnings += 1;
        }
    }
    for file in &on_disk {
        if !included.contains(file) {
            println!("herd-manager: [warn] {} exists but is not included by master config", file);
            warnings += 1;
        }
    }

    if !paths.valet_nginx_dir().is_dir() {
        println!("herd-manager: [warn] valet nginx directory not found: {}", paths.valet_nginx_dir().display());
        warnings += 1;
    }

    if !paths.herd_executable().exists() {
        println!("herd-manager: [warn] herd executable not found: {}", paths.herd_executable().display());
        warnings += 1;
    }

    match JsonFileStore::new(paths.proxies_file()).load() {
        Ok(table) => println!("herd-manager: proxy registry has {} proxy(ies)", table.len()),
        Err(e) => {
            println!("herd-manager: [error] proxy registry unreadable: {}", e);
            errors += 1;
        }
    }

    // Проверяем шаблоны
    let templates = NginxTemplates::new(config.templates_dir.clone());
    for name in [SITE_TEMPLATE, PROXY_TEMPLATE] {
        if let Err(e) = templates.load(name) {
            println!("herd-manager: [error] {}", e);
            errors += 1;
        }
    }

    // Выводим результат
    if errors > 0 {
        println!("herd-manager: configuration test failed ({} error(s))", errors);
        std::process::exit(1);
    } else if warnings > 0 {
        println!("herd-manager: configuration test is successful (with {} warning(s))", warnings);
    } else {
        println!("herd-manager: configuration test is successful");
    }
}
