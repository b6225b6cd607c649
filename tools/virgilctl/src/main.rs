// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! virgilctl: interactive Virgil master console.
//!
//! Discovers slaves on the LAN, then takes commands on stdin:
//!
//! ```text
//! list                              known devices
//! show <device>                     registry record detail
//! request <device> <channel>        ask for a parameter tree scope
//! subscribe <device> <channel>      join the channel's telemetry group
//! unsubscribe <device> <channel>    leave it
//! set <device> <channel> <param> <value>
//! watch [seconds]                   print events as they arrive
//! quit
//! ```

use clap::Parser;
use serde_json::{Map, Value};
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use virgil::{Master, MasterConfig, MasterEvent};

#[derive(Parser)]
#[command(name = "virgilctl", about = "Interactive Virgil master console", version)]
struct Args {
    /// Device name to announce on the audio transport fabric.
    #[arg(long, default_value = "VirgilConsole")]
    name: String,

    /// Control port (non-default values are for bench setups).
    #[arg(long, default_value_t = virgil::config::VIRGIL_PORT)]
    port: u16,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let master = match Master::start(
        MasterConfig::new(args.name.clone()).with_control_port(args.port),
    ) {
        Ok(master) => master,
        Err(e) => {
            eprintln!("virgilctl: failed to start master: {}", e);
            std::process::exit(1);
        }
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        log::warn!("[virgilctl] no ctrl-c handler: {}", e);
    }

    println!("virgilctl: announcing as '{}' on port {}", args.name, args.port);
    println!("Type 'help' for commands.");

    let stdin = io::stdin();
    loop {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        print!("virgil> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("read error: {}", e);
                break;
            }
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        match run_command(&master, &tokens, &interrupted) {
            CommandResult::Continue => {}
            CommandResult::Quit => break,
        }
    }

    println!("virgilctl: shutting down");
    master.stop();
}

enum CommandResult {
    Continue,
    Quit,
}

fn run_command(master: &Master, tokens: &[&str], interrupted: &AtomicBool) -> CommandResult {
    match tokens {
        ["help"] => {
            println!("list | show <dev> | request <dev> <ch> | subscribe <dev> <ch>");
            println!("unsubscribe <dev> <ch> | set <dev> <ch> <param> <value> | watch [s] | quit");
        }
        ["quit" | "exit"] => return CommandResult::Quit,
        ["list"] => {
            let devices = master.list_devices();
            if devices.is_empty() {
                println!("no devices discovered yet");
            }
            for record in devices {
                println!(
                    "{:<24} {:<9} {:<20} present={} channels={:?}",
                    record.device_name,
                    record.role,
                    record.model,
                    record.is_present,
                    record.channel_indices
                );
            }
        }
        ["show", device] => match master.device(device) {
            Some(record) => {
                println!("name:       {}", record.device_name);
                println!("role:       {}", record.role);
                println!("model:      {}", record.model);
                println!("type:       {}", record.device_type);
                println!("version:    {}", record.protocol_version);
                println!("address:    {:?}", record.ip_address);
                println!("base:       {:?}", record.multicast_base.map(|b| b.to_string()));
                println!("present:    {}", record.is_present);
                println!("channels:   {:?}", record.channel_indices);
                for (index, fields) in &record.channels {
                    println!(
                        "  [{}] {}",
                        index,
                        serde_json::to_string_pretty(&Value::Object(fields.clone()))
                            .unwrap_or_else(|_| "<unprintable>".to_string())
                    );
                }
            }
            None => println!("unknown device '{}'", device),
        },
        ["request", device, channel] => match channel.parse::<i32>() {
            Ok(index) => report(master.request_parameters(device, index)),
            Err(_) => println!("channel must be an integer"),
        },
        ["subscribe", device, channel] => match channel.parse::<i32>() {
            Ok(index) => match master.subscribe(device, index) {
                Ok(true) => println!("subscribed"),
                Ok(false) => println!("already subscribed"),
                Err(e) => println!("error: {}", e),
            },
            Err(_) => println!("channel must be an integer"),
        },
        ["unsubscribe", device, channel] => match channel.parse::<i32>() {
            Ok(index) => match master.unsubscribe(device, index) {
                Ok(true) => println!("unsubscribed"),
                Ok(false) => println!("was not subscribed"),
                Err(e) => println!("error: {}", e),
            },
            Err(_) => println!("channel must be an integer"),
        },
        ["set", device, channel, param, value] => match channel.parse::<i32>() {
            Ok(index) => {
                let mut changes = Map::new();
                changes.insert((*param).to_string(), parse_value(value));
                report(master.send_command(device, index, &changes));
            }
            Err(_) => println!("channel must be an integer"),
        },
        ["watch"] => watch(master, Duration::from_secs(10), interrupted),
        ["watch", seconds] => match seconds.parse::<u64>() {
            Ok(s) => watch(master, Duration::from_secs(s), interrupted),
            Err(_) => println!("seconds must be an integer"),
        },
        _ => println!("unrecognized command; try 'help'"),
    }
    CommandResult::Continue
}

fn report(result: virgil::Result<()>) {
    match result {
        Ok(()) => println!("sent"),
        Err(e) => println!("error: {}", e),
    }
}

/// Best-effort value parsing: bool, then number, then string.
fn parse_value(token: &str) -> Value {
    match token {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => match token.parse::<f64>() {
            Ok(n) => serde_json::json!(n),
            Err(_) => Value::String(token.to_string()),
        },
    }
}

/// Drain master events to stdout for a bounded window.
fn watch(master: &Master, window: Duration, interrupted: &AtomicBool) {
    println!("watching for {}s (ctrl-c to stop early)...", window.as_secs());
    let events = master.events();
    let start = Instant::now();
    while start.elapsed() < window && !interrupted.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(MasterEvent::DeviceDiscovered { device_name }) => {
                println!("+ discovered {}", device_name);
            }
            Ok(MasterEvent::DeviceLost { device_name }) => {
                println!("- lost {}", device_name);
            }
            Ok(MasterEvent::DeviceUpdated { device_name, channel_index }) => {
                match master.device(&device_name) {
                    Some(record) if channel_index >= 0 => {
                        let values = record
                            .channels
                            .get(&channel_index)
                            .map(|fields| Value::Object(fields.clone()))
                            .unwrap_or(Value::Null);
                        println!("~ {}[{}] {}", device_name, channel_index, values);
                    }
                    _ => println!("~ {} device-level update", device_name),
                }
            }
            Ok(MasterEvent::ErrorReported { device_name, error_value, error_string }) => {
                println!("! {} {}: {}", device_name, error_value, error_string);
            }
            Err(_) => {}
        }
    }
}
