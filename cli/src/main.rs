//! chainfabric CLI: watch a peer's event stream from the terminal.
//!
//! Usage:
//! ```bash
//! # Print every block and every event of one chaincode
//! chainfabric listen --url grpc://localhost:7053 --msp-id Org1MSP \
//!     --cert user.pem --key-file priv_sk --blocks --chaincode marbles:transfer.*
//!
//! # Wait for one transaction to commit
//! chainfabric listen --config hub.json --cert user.pem --key-file user.key --tx 4f2a...
//! ```

mod logging;

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use chainfabric_core::{EcdsaIdentity, PeerConfig, SigningIdentity};
use chainfabric_events::{EventHub, EventHubConfig};
use chainfabric_grpc::GrpcEventTransport;

use logging::{init_tracing, LogConfig};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "listen" => cmd_listen(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("chainfabric {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainfabric {}", env!("CARGO_PKG_VERSION"));
    println!("Listen to block, chaincode and transaction events from a peer\n");
    println!("USAGE:");
    println!("    chainfabric <COMMAND>\n");
    println!("COMMANDS:");
    println!("    listen     Connect to a peer event service and print events as JSON lines");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("LISTEN FLAGS:");
    println!("    --url <URL>                 Peer event URL (grpc://, grpcs://, host:port)");
    println!("    --config <FILE>             JSON hub config instead of --url");
    println!("    --tls-cert <FILE>           CA certificate PEM for TLS");
    println!("    --server-name <NAME>        TLS server name override");
    println!("    --insecure                  Plaintext for scheme-less URLs");
    println!("    --msp-id <ID>               MSP of the signing identity  [default: Org1MSP]");
    println!("    --cert <FILE>               Enrollment certificate PEM   [required]");
    println!("    --key <HEX> | --key-file <FILE>  P-256 private key, hex or PEM (PKCS#8 / SEC1)  [required]");
    println!("    --blocks                    Print every committed block");
    println!("    --chaincode <ID[:FILTER]>   Print chaincode events (repeatable, filter defaults to .*)");
    println!("    --tx <TXID>                 Wait for one transaction, then exit");
    println!("    --timeout-secs <N>          How long --tx waits          [default: 60]");
    println!("    --reg-timeout-ms <N>        Registration timeout         [default: 3000]");
    println!("    --log-level <LEVEL>         trace|debug|info|warn|error  [default: info]");
    println!("    --json-logs                 Structured JSON logs on stderr");
}

async fn cmd_listen(args: &[String]) -> Result<(), String> {
    init_tracing(&LogConfig {
        level: parse_flag(args, "--log-level").unwrap_or_else(|| "info".into()),
        json: has_flag(args, "--json-logs"),
        ..Default::default()
    });

    let config = hub_config(args)?;
    let identity = load_identity(args)?;
    tracing::info!(url = %config.peer.url, msp_id = identity.msp_id(), "starting listener");

    let transport = Arc::new(GrpcEventTransport::new(config.peer.clone()));
    let identity: Arc<dyn SigningIdentity> = identity;
    let hub = EventHub::new(config, transport, Some(identity));

    if has_flag(args, "--blocks") {
        hub.register_block_event(|block| {
            println!(
                "{}",
                json!({
                    "type": "block",
                    "number": block.header.as_ref().map(|h| h.number),
                    "transactions": block.data.as_ref().map_or(0, |d| d.data.len()),
                })
            );
        })
        .map_err(|e| e.to_string())?;
    }

    for spec in parse_flags(args, "--chaincode") {
        let (chaincode_id, filter) = spec.split_once(':').unwrap_or((spec.as_str(), ".*"));
        hub.register_chaincode_event(chaincode_id, filter, |ev| {
            println!(
                "{}",
                json!({
                    "type": "chaincode",
                    "chaincode_id": ev.chaincode_id,
                    "event_name": ev.event_name,
                    "tx_id": ev.tx_id,
                    "channel_id": ev.channel_id,
                    "payload": hex::encode(&ev.payload),
                })
            );
        })
        .map_err(|e| e.to_string())?;
    }

    hub.connect().await.map_err(|e| e.to_string())?;

    let outcome = match parse_flag(args, "--tx") {
        Some(tx_id) => {
            let secs = parse_flag(args, "--timeout-secs")
                .map(|s| s.parse::<u64>().map_err(|e| format!("--timeout-secs: {e}")))
                .transpose()?
                .unwrap_or(60);
            let result = hub.wait_for_tx(&tx_id, Duration::from_secs(secs)).await;
            let (valid, detail) = match &result {
                Ok(code) => (true, code.to_string()),
                Err(e) => (false, e.to_string()),
            };
            println!("{}", json!({ "type": "transaction", "tx_id": tx_id, "valid": valid, "detail": detail }));
            result.map(|_| ()).map_err(|e| e.to_string())
        }
        None => {
            tokio::signal::ctrl_c().await.map_err(|e| e.to_string())?;
            tracing::info!("interrupted");
            Ok(())
        }
    };

    hub.disconnect().await.map_err(|e| e.to_string())?;
    outcome
}

fn hub_config(args: &[String]) -> Result<EventHubConfig, String> {
    let mut config = match (parse_flag(args, "--config"), parse_flag(args, "--url")) {
        (Some(path), _) => EventHubConfig::from_json_file(&path).map_err(|e| e.to_string())?,
        (None, Some(url)) => EventHubConfig::new(url),
        (None, None) => return Err("--url or --config is required".into()),
    };

    let mut peer: PeerConfig = config.peer;
    if let Some(ca) = parse_flag(args, "--tls-cert") {
        peer = peer.with_tls_ca_cert(ca);
    }
    if let Some(name) = parse_flag(args, "--server-name") {
        peer = peer.with_server_host_override(name);
    }
    if has_flag(args, "--insecure") {
        peer = peer.with_allow_insecure(true);
    }
    config.peer = peer;

    if let Some(ms) = parse_flag(args, "--reg-timeout-ms") {
        config.reg_timeout_ms = ms.parse().map_err(|e| format!("--reg-timeout-ms: {e}"))?;
    }
    Ok(config)
}

fn load_identity(args: &[String]) -> Result<Arc<EcdsaIdentity>, String> {
    let msp_id = parse_flag(args, "--msp-id").unwrap_or_else(|| "Org1MSP".into());
    let cert_path = parse_flag(args, "--cert").ok_or("--cert is required")?;
    let cert = std::fs::read(&cert_path).map_err(|e| format!("reading {cert_path}: {e}"))?;

    let key = match (parse_flag(args, "--key"), parse_flag(args, "--key-file")) {
        (Some(key), _) => key,
        (None, Some(path)) => {
            std::fs::read_to_string(&path).map_err(|e| format!("reading {path}: {e}"))?
        }
        (None, None) => return Err("--key or --key-file is required".into()),
    };

    let identity = EcdsaIdentity::from_key(msp_id, cert, &key).map_err(|e| e.to_string())?;
    Ok(Arc::new(identity))
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn parse_flags(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|w| w[0] == flag)
        .map(|w| w[1].clone())
        .collect()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn repeated_flags() {
        let a = args("--chaincode cc1 --blocks --chaincode cc2:evt.* --tx abc");
        assert_eq!(parse_flags(&a, "--chaincode"), vec!["cc1", "cc2:evt.*"]);
        assert_eq!(parse_flag(&a, "--tx").as_deref(), Some("abc"));
        assert!(has_flag(&a, "--blocks"));
        assert!(parse_flag(&a, "--url").is_none());
    }

    #[test]
    fn config_from_flags() {
        let a = args("--url peer0:7053 --insecure --server-name peer0.org1 --reg-timeout-ms 750");
        let config = hub_config(&a).unwrap();
        assert_eq!(config.peer.url, "peer0:7053");
        assert!(!config.peer.is_secure());
        assert_eq!(config.peer.server_host_override.as_deref(), Some("peer0.org1"));
        assert_eq!(config.reg_timeout(), Duration::from_millis(750));

        assert!(hub_config(&args("--blocks")).is_err());
        assert!(hub_config(&args("--url x --reg-timeout-ms soon")).is_err());
    }
}
