use std::{thread, time::Duration};

use kadmesh::{rpc::UdpTransport, Contact, Node};

use clap::{Parser, Subcommand};

use tracing::{info, Level};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to bind the UDP socket to
    #[arg(short, long, default_value = "127.0.0.1:0")]
    bind: String,
    /// Address other hosts reach this node at, required when binding `0.0.0.0`
    #[arg(short, long)]
    public_address: Option<String>,
    /// Address of a running node to connect through, as `host:port`
    #[arg(short, long)]
    seed: Option<String>,
    /// Print trace level logs
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Store a value under a key
    Put { key: String, value: String },
    /// Look up the value stored under a key
    Get { key: String },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            Level::TRACE
        } else {
            Level::INFO
        })
        .with_thread_names(true)
        .init();

    let mut transport = UdpTransport::bind(cli.bind.as_str()).expect("Failed to bind UDP socket");
    if let Some(address) = &cli.public_address {
        transport = transport.with_public_address(address);
    }

    let node = Node::builder()
        .transport(Box::new(transport))
        .build()
        .expect("Failed to create node");

    let info = node.info().expect("node was shutdown");
    info!(id = %info.id(), contact = %info.contact(), "Node is running");

    if let Some(seed) = cli.seed {
        let (address, port) = seed.rsplit_once(':').expect("seed should be host:port");
        let port = port.parse().expect("invalid seed port");

        let seed = Contact::address_port(address, port).expect("invalid seed");

        node.connect(seed).expect("Failed to connect");
        info!("Connected to the network");
    }

    match cli.command {
        Some(Command::Put { key, value }) => match node.put(&key, &value) {
            Ok(count) => println!("Stored {:?} at {} nodes", key, count),
            Err(error) => println!("Failed to store {:?}: {}", key, error),
        },
        Some(Command::Get { key }) => match node.get(&key) {
            Ok(value) => println!("{:?} = {:?}", key, value),
            Err(error) => println!("Failed to get {:?}: {}", key, error),
        },
        None => loop {
            thread::sleep(Duration::from_secs(30));

            let info = node.info().expect("node was shutdown");

            info!(
                routing_table_size = info.routing_table_size(),
                stored_items = info.stored_items(),
                dropped_messages = info.dropped_messages(),
                "=== Node Status ==="
            );
        },
    }
}
