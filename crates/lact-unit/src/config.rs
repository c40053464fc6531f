use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_seconds: Option<u64>,
    pub auto_start: bool,
    pub json_logs: bool,
    pub seed: u64,
    pub sim_noise: bool,
    pub setpoints_path: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub audit_path: Option<PathBuf>,
    pub reports_dir: Option<PathBuf>,
    pub modbus_addr: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            run_seconds: None,
            auto_start: false,
            json_logs: false,
            seed: 0,
            sim_noise: true,
            setpoints_path: None,
            metrics_addr: None,
            audit_path: None,
            reports_dir: None,
            modbus_addr: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Self {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--run-seconds" => {
                    if i + 1 < args.len() {
                        cfg.run_seconds = args[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                "--start" => {
                    cfg.auto_start = true;
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--seed" => {
                    if i + 1 < args.len() {
                        cfg.seed = args[i + 1].parse().unwrap_or(0);
                        i += 1;
                    }
                }
                "--no-noise" => {
                    cfg.sim_noise = false;
                }
                "--setpoints" => {
                    if i + 1 < args.len() {
                        cfg.setpoints_path = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--metrics-addr" => {
                    if i + 1 < args.len() {
                        cfg.metrics_addr = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--audit-log" => {
                    if i + 1 < args.len() {
                        cfg.audit_path = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--reports-dir" => {
                    if i + 1 < args.len() {
                        cfg.reports_dir = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--modbus" => {
                    if i + 1 < args.len() {
                        cfg.modbus_addr = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                other => {
                    eprintln!("unrecognized argument: {other}");
                }
            }
            i += 1;
        }
        cfg
    }

    pub fn print_help() {
        println!(
            r#"lact-unit - LACT custody-transfer controller

USAGE:
    lact-unit [OPTIONS]

OPTIONS:
    --modbus <ADDR>        Drive real hardware via Modbus TCP (e.g. 192.168.1.10:502);
                           without it the built-in skid simulator is used
    --start                Issue a START command once the scan loop is up
    --run-seconds <SECS>   Run for a fixed duration then shut down
    --setpoints <PATH>     Load setpoints from a JSON file (startup aborts on bad values)
    --metrics-addr <ADDR>  Serve Prometheus metrics (e.g. 0.0.0.0:9090)
    --audit-log <PATH>     Append audit events to a JSONL file
    --reports-dir <PATH>   Write batch and proving reports into this directory
    --seed <N>             Simulator seed [default: 0]
    --no-noise             Disable simulator measurement noise
    --json-logs            JSON log output (for aggregation)
    -h, --help             Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG               Log filter (e.g. RUST_LOG=debug,lact_core=trace)

EXAMPLES:
    # Simulated skid with metrics and an audit trail
    lact-unit --start --metrics-addr 0.0.0.0:9090 --audit-log /var/log/lact/audit.jsonl

    # Ten-second smoke run
    lact-unit --start --run-seconds 10 --no-noise
"#
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> RuntimeConfig {
        let mut full = vec!["lact-unit".to_string()];
        full.extend(args.iter().map(|s| s.to_string()));
        RuntimeConfig::from_args(&full)
    }

    #[test]
    fn defaults_are_simulator_mode() {
        let cfg = parse(&[]);
        assert!(cfg.modbus_addr.is_none());
        assert!(!cfg.auto_start);
        assert!(cfg.sim_noise);
    }

    #[test]
    fn flags_parse() {
        let cfg = parse(&[
            "--start",
            "--run-seconds",
            "30",
            "--seed",
            "42",
            "--no-noise",
            "--metrics-addr",
            "0.0.0.0:9090",
            "--modbus",
            "10.0.0.5:502",
        ]);
        assert!(cfg.auto_start);
        assert_eq!(cfg.run_seconds, Some(30));
        assert_eq!(cfg.seed, 42);
        assert!(!cfg.sim_noise);
        assert_eq!(cfg.metrics_addr.as_deref(), Some("0.0.0.0:9090"));
        assert_eq!(cfg.modbus_addr.as_deref(), Some("10.0.0.5:502"));
    }

    #[test]
    fn help_short_circuits() {
        let cfg = parse(&["--help", "--start"]);
        assert!(cfg.show_help);
        assert!(!cfg.auto_start);
    }
}
