// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! virgil-device-sim: a simulated slave device.
//!
//! Announces itself on the LAN, answers parameter requests and commands,
//! and feeds random-walk sensor values into the continuous parameters so
//! subscribed masters see moving telemetry.

use clap::{Parser, ValueEnum};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use virgil::model::profiles::{stage_box_channel, wireless_receiver_channel};
use virgil::model::ParamValue;
use virgil::{DeviceType, MulticastBase, Slave, SlaveConfig};

#[derive(Parser)]
#[command(name = "virgil-device-sim", about = "Simulated Virgil slave device", version)]
struct Args {
    /// Device name to announce on the audio transport fabric.
    #[arg(long, default_value = "SimBox")]
    name: String,

    /// Model string announced in discovery.
    #[arg(long, default_value = "SIM-1")]
    model: String,

    /// Number of channels.
    #[arg(long, default_value_t = 4)]
    channels: u16,

    /// Channel profile.
    #[arg(long, value_enum, default_value_t = Profile::WirelessReceiver)]
    profile: Profile,

    /// Control port (non-default values are for bench setups).
    #[arg(long, default_value_t = virgil::config::VIRGIL_PORT)]
    port: u16,

    /// Fixed multicast base (a.b.c); skips the startup scan.
    #[arg(long)]
    base: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    WirelessReceiver,
    StageBox,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let device_type = match args.profile {
        Profile::WirelessReceiver => DeviceType::WirelessReceiver,
        Profile::StageBox => DeviceType::DigitalStageBox,
    };
    let mut config = SlaveConfig::new(args.name.clone(), args.model.clone(), device_type)
        .with_control_port(args.port);
    for index in 0..i32::from(args.channels) {
        let channel = match args.profile {
            Profile::WirelessReceiver => wireless_receiver_channel(),
            Profile::StageBox => stage_box_channel(),
        };
        config = config.with_channel(index, channel);
    }
    if let Some(base) = &args.base {
        match base.parse::<MulticastBase>() {
            Ok(base) => config = config.with_multicast_base(base),
            Err(e) => {
                eprintln!("virgil-device-sim: invalid --base: {}", e);
                std::process::exit(1);
            }
        }
    }

    let slave = match Slave::start(config) {
        Ok(slave) => slave,
        Err(e) => {
            eprintln!("virgil-device-sim: failed to start: {}", e);
            std::process::exit(1);
        }
    };
    println!(
        "virgil-device-sim: '{}' up with {} channel(s), base {}, port {}",
        args.name,
        args.channels,
        slave.multicast_base(),
        args.port
    );

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst)) {
        log::warn!("[sim] no ctrl-c handler: {}", e);
    }

    // Random-walk sensor state per channel.
    let mut audio: Vec<f64> = vec![-30.0; args.channels as usize];
    let mut rf: Vec<f64> = vec![-50.0; args.channels as usize];
    let mut battery: Vec<f64> = vec![90.0; args.channels as usize];

    while running.load(Ordering::SeqCst) {
        for index in 0..args.channels as usize {
            audio[index] = (audio[index] + jitter(6.0)).clamp(-120.0, 0.0);
            feed(&slave, index as i32, "audioLevel", audio[index]);

            if matches!(args.profile, Profile::WirelessReceiver) {
                rf[index] = (rf[index] + jitter(3.0)).clamp(-120.0, 0.0);
                feed(&slave, index as i32, "rfLevel", rf[index]);

                // Batteries only drain.
                battery[index] = (battery[index] - fastrand::f64() * 0.05).max(0.0);
                feed(&slave, index as i32, "batteryLevel", battery[index]);
            }
        }
        std::thread::sleep(Duration::from_millis(250));
    }

    println!("virgil-device-sim: shutting down");
    slave.stop();
}

fn jitter(magnitude: f64) -> f64 {
    (fastrand::f64() - 0.5) * magnitude
}

fn feed(slave: &Slave, index: i32, name: &str, value: f64) {
    if let Err(e) = slave.simulate_continuous(index, name, ParamValue::Number(value)) {
        log::debug!("[sim] sensor write {}[{}]: {}", name, index, e);
    }
}
