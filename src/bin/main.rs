//! rbfwatch CLI
//!
//!   rbfwatch watch <address>... --network <net>      → stream sync events, then final status
//!   rbfwatch balance <address> --network <net>       → {"spendable", "pending", "total", ...}
//!   rbfwatch conflict <txid:vout> <specs-json> --wif <key> --network <net>
//!   rbfwatch broadcast <raw-hex> --network <net>     → {"txid"}
//!   rbfwatch serve --port 8080                       → HTTP surface
//!
//! Configuration comes from `RBFWATCH_*` variables (a `.env` file in the
//! working directory is loaded first) or a JSON file given with `--config`.

use bitcoin::{Network, PrivateKey, Txid};
use rbfwatch::conflict::{CandidateSpec, OutpointDescriptor};
use rbfwatch::indexer::{Broadcaster, EsploraClient, WsFeed};
use rbfwatch::logging::init_logging;
use rbfwatch::monitor::{Config, IndexerConfig, Monitor};
use rbfwatch::rates::RateService;
use rbfwatch::runtime::install_signal_handlers;
use serde_json::{json, Value};
use std::env;
use std::io::IsTerminal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

fn main() {
    init_logging();
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("rbfwatch {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some("watch") => cmd_watch(&opts),
        Some("balance") => cmd_balance(&opts),
        Some("conflict") => cmd_conflict(&opts),
        Some("broadcast") => cmd_broadcast(&opts),
        #[cfg(feature = "server")]
        Some("serve") => cmd_serve(&opts),
        Some(cmd) => Err(format!("Unknown command: {}", cmd)),
        None => {
            print_usage();
            return;
        }
    };

    let pretty = opts.pretty || (!opts.json && std::io::stdout().is_terminal());
    let render = |v: &Value| {
        if pretty {
            serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
        } else {
            v.to_string()
        }
    };

    match result {
        Ok(output) => println!("{}", render(&output)),
        Err(e) => {
            eprintln!("{}", render(&json!({"error": e})));
            std::process::exit(1);
        }
    }
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    positional: Vec<String>,
    network: Option<String>,
    config: Option<String>,
    wif: Option<String>,
    value: Option<u64>,
    address: Option<String>,
    seconds: Option<u64>,
    port: Option<u16>,
    json: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        // Load .env file if present
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let value = value.trim().trim_matches('"');
                    if !value.is_empty() && env::var(key.trim()).is_err() {
                        env::set_var(key.trim(), value);
                    }
                }
            }
        }

        let mut opts = ParsedArgs::default();
        let mut i = 0;
        let take = |i: &mut usize| -> Option<String> {
            if *i + 1 < args.len() {
                *i += 1;
                Some(args[*i].clone())
            } else {
                None
            }
        };

        while i < args.len() {
            let arg = &args[i];
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--json" => opts.json = true,
                "--pretty" => opts.pretty = true,
                "--network" | "-n" => opts.network = take(&mut i),
                "--config" | "-c" => opts.config = take(&mut i),
                "--wif" | "-k" => opts.wif = take(&mut i),
                "--value" => opts.value = take(&mut i).and_then(|v| v.parse().ok()),
                "--address" => opts.address = take(&mut i),
                "--seconds" | "-s" => opts.seconds = take(&mut i).and_then(|v| v.parse().ok()),
                "--port" | "-p" => opts.port = take(&mut i).and_then(|v| v.parse().ok()),
                _ if !arg.starts_with('-') => opts.positional.push(arg.clone()),
                _ => {} // Ignore unknown flags
            }
            i += 1;
        }

        if !opts.positional.is_empty() {
            opts.command = Some(opts.positional.remove(0));
        }

        // Environment is lower priority than CLI args
        if opts.network.is_none() {
            opts.network = env::var("RBFWATCH_NETWORK").ok().filter(|s| !s.is_empty());
        }
        if opts.wif.is_none() {
            opts.wif = env::var("RBFWATCH_WIF").ok().filter(|s| !s.is_empty());
        }
        if opts.port.is_none() {
            opts.port = env::var("RBFWATCH_PORT").ok().and_then(|s| s.parse().ok());
        }

        opts
    }

    fn network(&self) -> Result<Network, String> {
        let raw = self.network.as_deref().unwrap_or("bitcoin");
        match raw {
            "mainnet" => Ok(Network::Bitcoin),
            other => Network::from_str(other).map_err(|_| format!("Invalid network: {}", other)),
        }
    }

    fn arg(&self, index: usize, what: &str) -> Result<&str, String> {
        self.positional.get(index).map(String::as_str).ok_or_else(|| format!("Missing {}", what))
    }
}

fn print_usage() {
    println!(
        r#"rbfwatch - RBF double-spend simulator and wallet monitor

USAGE:
    rbfwatch <command> [args] [options]

COMMANDS:
    watch <address>...                  Monitor addresses, print sync events as JSON lines
    balance <address>                   One-shot balance
    conflict <txid:vout> <specs-json>   Build signed conflicting candidates (never broadcasts)
    broadcast <raw-hex>                 Relay a signed transaction through the indexer
    serve                               Start HTTP server

OPTIONS:
    --network, -n <net>     bitcoin|testnet|signet|regtest (env: RBFWATCH_NETWORK)
    --config, -c <path>     JSON config file (default: RBFWATCH_* env)
    --seconds, -s <n>       watch: stop after n seconds (default: until Ctrl+C)
    --port, -p <port>       serve: port (default: 8080, env: RBFWATCH_PORT)
    --json                  Raw JSON output
    --pretty                Pretty-print JSON
    --version, -V           Print version

CONFLICT OPTIONS:
    --wif, -k <key>         Signing key, WIF (env: RBFWATCH_WIF)
    --value <sat>           Outpoint value; with --address skips the indexer lookup
    --address <addr>        Outpoint's address

SPECS:
    [{{"destination":"bc1q...","fee":{{"kind":"rate","sat_per_vb":15}}}},
     {{"destination":"bc1q...","fee":{{"kind":"flat","sat":3375}},"replaceable":true}},
     {{"destination":"bc1q...","fee":{{"kind":"smart","observed_sat_per_vb":12}}}}]

EXAMPLES:
    rbfwatch balance bc1q... --json | jq .spendable
    rbfwatch watch tb1q... tb1p... --network testnet --seconds 120
    rbfwatch conflict <txid>:0 "$(cat specs.json)" --wif cV... --network regtest
"#
    );
}

fn load_config(opts: &ParsedArgs, network: Network) -> Result<Config, String> {
    if let Some(path) = opts.config.as_deref() {
        return Config::load(Path::new(path)).map_err(|e| e.to_string());
    }
    let mut config = Config::from_env();
    if env::var("RBFWATCH_INDEXER_URL").is_err() {
        let timeout = config.indexer.request_timeout_secs;
        match network {
            Network::Testnet => config.indexer = IndexerConfig { request_timeout_secs: timeout, ..IndexerConfig::testnet() },
            Network::Signet => config.indexer = IndexerConfig { request_timeout_secs: timeout, ..IndexerConfig::signet() },
            _ => {}
        }
    }
    Ok(config)
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))
}

fn build_monitor(config: Config, network: Network) -> Result<Monitor, String> {
    let indexer = Arc::new(EsploraClient::new(&config.indexer, network).map_err(|e| e.to_string())?);
    let feed = Arc::new(WsFeed::new(config.indexer.ws_url.clone(), config.monitor.fetch_timeout()));
    let rates = if config.rates.enabled {
        Some(RateService::from_config(&config.rates, config.indexer.request_timeout()).map_err(|e| e.to_string())?)
    } else {
        None
    };
    let monitor = Monitor::new(config, indexer, feed);
    if let Some(rates) = rates {
        monitor.set_rates(Arc::new(rates));
    }
    Ok(monitor)
}

fn cmd_balance(opts: &ParsedArgs) -> Result<Value, String> {
    let network = opts.network()?;
    let address = opts.arg(0, "address")?.to_string();
    let config = load_config(opts, network)?;
    let rates_enabled = config.rates.enabled;
    let monitor = build_monitor(config, network)?;

    runtime()?.block_on(async {
        monitor.add_monitored_address(&address, network).await.map_err(|e| e.to_string())?;
        if rates_enabled {
            let _ = monitor.refresh_rates().await;
        }
        let report = monitor.get_balance(&address).await.map_err(|e| e.to_string());
        monitor.shutdown();
        serde_json::to_value(report?).map_err(|e| e.to_string())
    })
}

fn cmd_watch(opts: &ParsedArgs) -> Result<Value, String> {
    let network = opts.network()?;
    if opts.positional.is_empty() {
        return Err("Missing address".into());
    }
    let config = load_config(opts, network)?;
    let monitor = build_monitor(config, network)?;

    runtime()?.block_on(async {
        let shutdown = install_signal_handlers();
        let mut events = monitor.subscribe_events();
        let tasks = monitor.start(&shutdown);

        for address in &opts.positional {
            monitor.add_monitored_address(address, network).await.map_err(|e| e.to_string())?;
        }
        info!(addresses = opts.positional.len(), %network, "watching");

        let deadline = async {
            match opts.seconds {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let mut stop = shutdown.subscribe();
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                _ = &mut deadline => break,
                event = events.recv() => match event {
                    Ok(event) => println!("{}", json!(event)),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => debug!(skipped = n, "event_stream_lagged"),
                    Err(_) => break,
                },
            }
        }

        shutdown.trigger().await;
        for task in tasks {
            let _ = task.await;
        }
        serde_json::to_value(monitor.get_full_status()).map_err(|e| e.to_string())
    })
}

fn parse_outpoint(raw: &str) -> Result<(Txid, u32), String> {
    let (txid, vout) = raw.split_once(':').ok_or("Outpoint must be <txid>:<vout>")?;
    let txid = Txid::from_str(txid).map_err(|e| format!("Invalid txid: {}", e))?;
    let vout = vout.parse().map_err(|e| format!("Invalid vout: {}", e))?;
    Ok((txid, vout))
}

fn cmd_conflict(opts: &ParsedArgs) -> Result<Value, String> {
    let network = opts.network()?;
    let (txid, vout) = parse_outpoint(opts.arg(0, "outpoint")?)?;
    let specs: Vec<CandidateSpec> =
        serde_json::from_str(opts.arg(1, "specs JSON")?).map_err(|e| format!("Invalid specs JSON: {}", e))?;
    let wif = opts.wif.as_deref().ok_or("Missing --wif (or RBFWATCH_WIF)")?;
    let key = PrivateKey::from_wif(wif.trim()).map_err(|e| format!("Invalid signing key: {}", e))?;

    let config = load_config(opts, network)?;
    let outpoint = match (opts.value, opts.address.clone()) {
        (Some(value_sat), Some(address)) => OutpointDescriptor { txid, vout, value_sat, address, network },
        _ => {
            let indexer = EsploraClient::new(&config.indexer, network).map_err(|e| e.to_string())?;
            runtime()?
                .block_on(OutpointDescriptor::resolve(&indexer, txid, vout, network))
                .map_err(|e| e.to_string())?
        }
    };

    let set = rbfwatch::conflict::build_conflict_set(&config.conflict, &outpoint, &key, &specs)
        .map_err(|e| e.to_string())?;
    serde_json::to_value(set).map_err(|e| e.to_string())
}

fn cmd_broadcast(opts: &ParsedArgs) -> Result<Value, String> {
    let network = opts.network()?;
    let raw = opts.arg(0, "raw transaction hex")?;
    let config = load_config(opts, network)?;
    let client = EsploraClient::new(&config.indexer, network).map_err(|e| e.to_string())?;

    let txid = runtime()?.block_on(client.broadcast(raw.trim(), network)).map_err(|e| e.to_string())?;
    Ok(json!({"txid": txid, "network": network}))
}

#[cfg(feature = "server")]
fn cmd_serve(opts: &ParsedArgs) -> Result<Value, String> {
    let network = opts.network()?;
    let port = opts.port.unwrap_or(8080);
    let config = load_config(opts, network)?;
    let monitor = build_monitor(config, network)?;

    runtime()?.block_on(async {
        // Install signal handlers for graceful shutdown
        let shutdown = install_signal_handlers();
        let tasks = monitor.start(&shutdown);

        for address in &opts.positional {
            monitor.add_monitored_address(address, network).await.map_err(|e| e.to_string())?;
        }

        let addr = format!("0.0.0.0:{}", port);
        info!("rbfwatch listening on http://{}", addr);
        info!("  GET  /balance/:address    - Balance");
        info!("  GET  /status              - Full status");
        debug!("  POST /addresses           - Watch address");
        debug!("  POST /conflict            - Build conflict set");

        rbfwatch::server::serve(monitor.clone(), &addr, shutdown.clone())
            .await
            .map_err(|e| format!("Server error: {}", e))?;

        shutdown.trigger().await;
        for task in tasks {
            let _ = task.await;
        }
        Ok::<(), String>(())
    })?;

    Ok(json!({"status": "stopped"}))
}
