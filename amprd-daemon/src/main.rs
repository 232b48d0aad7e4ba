//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

use std::net::Ipv4Addr;
use std::path::PathBuf;

use amprd_rip::config::{Config, MAX_NUM};
use amprd_rip::instance::Instance;
use amprd_rip::network::{self, PacketSource};
use amprd_rip::southbound::linux::LinuxSystem;
use clap::{App, Arg};
use ipnetwork::Ipv4Network;
use nix::unistd::Uid;
use tracing::{error, info};

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("amprd=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

fn parse_num(value: &str) -> u32 {
    match value.parse::<u32>() {
        Ok(num) if num <= MAX_NUM => num,
        _ => {
            eprintln!("bad unsigned integer: {}", value);
            std::process::exit(1);
        }
    }
}

fn parse_prefix(value: &str) -> Ipv4Network {
    match value.parse() {
        Ok(prefix) => prefix,
        Err(_) => {
            eprintln!("bad route (use CIDR): {}", value);
            std::process::exit(1);
        }
    }
}

fn parse_addr(value: &str) -> Ipv4Addr {
    match value.parse() {
        Ok(addr) => addr,
        Err(_) => {
            eprintln!("bad IPv4 address: {}", value);
            std::process::exit(1);
        }
    }
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("AMPRNet tunnel routing daemon")
        .version(clap::crate_version!())
        .arg(
            Arg::with_name("foreground")
                .short("d")
                .help("Do not daemonize."),
        )
        .arg(
            Arg::with_name("route-table")
                .short("T")
                .value_name("rtable")
                .help("Routing table tunnels and routes are created in."),
        )
        .arg(
            Arg::with_name("bind-table")
                .short("B")
                .value_name("rtable")
                .help("Routing table the receive socket is bound against."),
        )
        .arg(
            Arg::with_name("accept")
                .short("A")
                .value_name("prefix/len")
                .multiple(true)
                .number_of_values(1)
                .help("Accept announcements inside this prefix."),
        )
        .arg(
            Arg::with_name("ignore")
                .short("I")
                .value_name("prefix/len")
                .multiple(true)
                .number_of_values(1)
                .help("Ignore announcements inside this prefix."),
        )
        .arg(
            Arg::with_name("static")
                .short("s")
                .value_name("ifnum")
                .multiple(true)
                .number_of_values(1)
                .help("Reserve a statically managed interface number."),
        )
        .arg(
            Arg::with_name("replay")
                .short("f")
                .value_name("file")
                .help("Replay datagrams from a capture file."),
        )
        .arg(
            Arg::with_name("local-outer")
                .required(true)
                .index(1)
                .help("Local address tunnels are encapsulated from."),
        )
        .arg(
            Arg::with_name("local-inner")
                .required(true)
                .index(2)
                .help("Local address numbered on tunnel interfaces."),
        )
        .get_matches();

    let outer_local = parse_addr(matches.value_of("local-outer").unwrap());
    let inner_local = parse_addr(matches.value_of("local-inner").unwrap());

    let mut config = Config::new(outer_local, inner_local);
    if let Some(value) = matches.value_of("route-table") {
        config.route_table = parse_num(value);
    }
    if let Some(value) = matches.value_of("bind-table") {
        config.bind_table = parse_num(value);
    }
    config.accept = matches
        .values_of("accept")
        .into_iter()
        .flatten()
        .map(parse_prefix)
        .collect();
    config.ignore = matches
        .values_of("ignore")
        .into_iter()
        .flatten()
        .map(parse_prefix)
        .collect();
    config.static_interfaces = matches
        .values_of("static")
        .into_iter()
        .flatten()
        .map(|value| parse_num(value) as usize)
        .collect();
    config.replay = matches.value_of("replay").map(PathBuf::from);

    // Check for root privileges.
    if !Uid::effective().is_root() {
        eprintln!("need privileged user");
        std::process::exit(1);
    }

    // Initialize tracing.
    init_tracing();

    // Detach from the terminal unless asked not to.
    if !matches.is_present("foreground")
        && let Err(error) = nix::unistd::daemon(false, true)
    {
        error!(%error, "failed to daemonize");
        std::process::exit(1);
    }

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // We're ready to go!
    info!("starting up");

    // Main loop.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(async {
            let system = match LinuxSystem::init() {
                Ok(system) => system,
                Err(error) => {
                    error!(%error, "failed to initialize system adapter");
                    std::process::exit(1);
                }
            };

            let mut source = match &config.replay {
                Some(path) => match PacketSource::replay(path).await {
                    Ok(source) => source,
                    Err(error) => {
                        error!(%error, "failed to open replay file");
                        std::process::exit(1);
                    }
                },
                None => match network::socket(config.bind_table) {
                    Ok(socket) => PacketSource::socket(socket),
                    Err(error) => {
                        error!(%error, "failed to create receive socket");
                        std::process::exit(1);
                    }
                },
            };

            let mut instance = Instance::new(config, system);
            if let Err(error) = instance.run(&mut source).await {
                error!(%error, "receive loop failed");
                std::process::exit(1);
            }
        });
}
