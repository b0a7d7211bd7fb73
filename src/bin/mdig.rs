use std::net::SocketAddr;
use std::time::Duration;

use clap::{Arg, Command};

use muninn::{DnsQuestion, RecordType, ResolveError, Resolver};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let matches = Command::new("mdig")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Look up a name with the muninn resolver")
        .arg(Arg::new("name").required(true).help("Hostname to resolve"))
        .arg(
            Arg::new("type")
                .short('t')
                .long("type")
                .value_name("RECORD_TYPE")
                .help("Record type to query (A, AAAA, MX, TXT, ...)")
                .default_value("A"),
        )
        .arg(
            Arg::new("server")
                .short('s')
                .long("server")
                .value_name("ADDRESS:PORT")
                .help("Name server to query instead of the defaults"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .help("Per-query timeout in seconds")
                .default_value("5"),
        )
        .arg(
            Arg::new("no-tcp")
                .long("no-tcp")
                .help("Disable TCP fallback for truncated answers")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("addresses")
                .short('a')
                .long("addresses")
                .help("Resolve to addresses instead of printing raw records")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let name = matches.get_one::<String>("name").unwrap();
    let timeout_secs: u64 = matches
        .get_one::<String>("timeout")
        .unwrap()
        .parse()
        .expect("Invalid timeout");

    let mut builder = Resolver::builder()
        .query_timeout(Duration::from_secs(timeout_secs))
        .tcp_fallback(!matches.get_flag("no-tcp"));

    if let Some(server) = matches.get_one::<String>("server") {
        let addr: SocketAddr = server
            .parse()
            .or_else(|_| format!("{}:53", server).parse())
            .expect("Invalid server address");
        builder = builder.name_servers(vec![addr]);
    }

    let resolver = builder.build().await?;

    if matches.get_flag("addresses") {
        match resolver.resolve_all(name).await {
            Ok(addrs) => {
                for addr in addrs {
                    println!("{}", addr);
                }
            }
            Err(ResolveError::UnknownHost(host)) => {
                eprintln!("unknown host: {}", host);
                std::process::exit(1);
            }
            Err(e) => return Err(e.into()),
        }
        resolver.close().await;
        return Ok(());
    }

    let rtype = parse_record_type(matches.get_one::<String>("type").unwrap());
    let question = DnsQuestion::new(name, rtype);
    match resolver.resolve_all_records(&question, &[]).await {
        Ok(records) => {
            for record in records {
                println!(
                    "{}\t{}\t{}\t{:?}",
                    record.name, record.ttl, record.rtype, record.rdata
                );
            }
        }
        Err(ResolveError::UnknownHost(host)) => {
            eprintln!("no records for: {}", host);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    }

    resolver.close().await;
    Ok(())
}

fn parse_record_type(value: &str) -> RecordType {
    match value.to_ascii_uppercase().as_str() {
        "A" => RecordType::A,
        "AAAA" => RecordType::AAAA,
        "CNAME" => RecordType::CNAME,
        "NS" => RecordType::NS,
        "PTR" => RecordType::PTR,
        "SOA" => RecordType::SOA,
        "TXT" => RecordType::TXT,
        "MX" => RecordType::MX,
        "SRV" => RecordType::SRV,
        "ANY" => RecordType::ANY,
        other => match other.strip_prefix("TYPE").and_then(|n| n.parse::<u16>().ok()) {
            Some(code) => RecordType::from(code),
            None => {
                eprintln!("unknown record type: {}", other);
                std::process::exit(2);
            }
        },
    }
}
