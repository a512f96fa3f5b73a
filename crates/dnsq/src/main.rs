use clap::Parser;
use std::process;

use dns_stub::driver;
use dns_stub::{DnsResponse, Settings};
use dns_types::protocol::types::{Message, QueryType, ResourceRecord};

fn print_section(heading: &str, rrs: &[ResourceRecord]) {
    if rrs.is_empty() {
        return;
    }

    println!("\n;; {heading}");
    for rr in rrs {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            rr.name,
            rr.ttl,
            rr.rclass,
            rr.data.rtype(),
            rr.data
        );
    }
}

fn print_message(message: &Message) {
    println!(";; {}", message.question);
    print_section("ANSWER", &message.answers);
    print_section("AUTHORITY", &message.authority);
    print_section("ADDITIONAL", &message.additional);
}

// the doc comments for this struct turn into the CLI help text
#[derive(Parser)]
/// DNS stub lookup utility
///
/// Issues a single A, SRV, or NAPTR query through the configured stub
/// resolver, optionally walking NAPTR/SRV chains down to address
/// records first.
struct Args {
    /// Domain name to resolve
    #[clap(value_parser)]
    domain: String,

    /// Query type to resolve
    #[clap(default_value_t = QueryType::A, value_parser)]
    qtype: QueryType,

    /// Resolver configuration file
    #[clap(short, long, value_parser, default_value = "dnsq")]
    config: String,

    /// Follow NAPTR/SRV chains down to address records before
    /// returning
    #[clap(long, action(clap::ArgAction::SetTrue))]
    resolve_all: bool,

    /// Do not consult or populate the answer cache
    #[clap(long, action(clap::ArgAction::SetTrue))]
    no_cache: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let settings = match Settings::new(&args.config) {
        Ok(settings) => settings,
        Err(error) => {
            eprintln!("could not load configuration: {error}");
            process::exit(1);
        }
    };

    let resolver = match driver::spawn(settings).await {
        Ok(handle) => handle,
        Err(error) => {
            eprintln!("could not start resolver: {error}");
            process::exit(1);
        }
    };

    match resolver
        .query(&args.domain, args.qtype, args.resolve_all, !args.no_cache)
        .await
    {
        Ok(response) => {
            let ok = response.is_no_error();
            match response {
                DnsResponse::Message(message) => print_message(&message),
                DnsResponse::MessageList(messages) => {
                    for message in &messages {
                        print_message(message);
                    }
                }
                DnsResponse::Status(status) => println!("; query failed: {status}"),
            }
            if !ok {
                process::exit(1);
            }
        }
        Err(error) => {
            eprintln!("{error}");
            process::exit(1);
        }
    }
}
