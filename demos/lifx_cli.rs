//! CLI application for controlling LIFX bulbs through their gateways.
//!
//! Every command first discovers gateways for a while, then acts on what
//! was found.
//!
//! Run with: cargo run --example lifx_cli -- --help

use std::time::Duration;

use clap::{Parser, Subcommand};
use lifx_lights_rs::{Client, ClientConfig, Event, Hsbk, ReconnectPolicy, Selection};

#[derive(Parser)]
#[command(name = "lifx-cli")]
#[command(about = "Control LIFX bulbs from the command line", long_about = None)]
struct Cli {
    /// Seconds to wait for gateways and bulbs to report in
    #[arg(short, long, global = true, default_value = "3")]
    wait: u64,

    /// Limit the command to the bulbs of this group
    #[arg(short, long, global = true)]
    group: Option<String>,

    /// Limit the command to this bulb (may be repeated)
    #[arg(short, long, global = true)]
    bulb: Vec<String>,

    /// Log every frame in hex
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the bulbs that reported in
    List,

    /// List the known group labels
    Groups,

    /// Turn bulbs on
    On,

    /// Turn bulbs off
    Off,

    /// Set color from hue (degrees), saturation and brightness (0.0-1.0)
    Color {
        hue: f32,
        saturation: f32,
        brightness: f32,
        /// Fade time in milliseconds
        #[arg(short, long, default_value = "0")]
        fade: u32,
    },

    /// Set a white at the given color temperature
    White {
        #[arg(value_parser = clap::value_parser!(u16).range(2500..=9000))]
        kelvin: u16,
        /// Brightness (0.0-1.0)
        #[arg(default_value = "1.0")]
        brightness: f32,
    },

    /// Print everything the client knows as JSON
    Diagnostics,

    /// Print events as they arrive
    Watch,
}

impl Cli {
    fn selection(&self) -> Selection {
        if let Some(group) = &self.group {
            Selection::group(group)
        } else if !self.bulb.is_empty() {
            Selection::Bulbs(self.bulb.iter().map(|name| name.as_str().into()).collect())
        } else {
            Selection::All
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let config = ClientConfig {
        debug: cli.debug,
        reconnect: ReconnectPolicy::Never,
        ..ClientConfig::default()
    };
    let client = Client::start(config);
    let mut events = client.subscribe();

    if let Commands::Watch = cli.command {
        println!("Watching events... (Press Ctrl+C to stop)\n");
        while let Ok(event) = events.recv().await {
            if !matches!(event, Event::Packet { .. }) || cli.debug {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
        return Ok(());
    }

    println!("Looking for bulbs ({}s)...", cli.wait);
    tokio::time::sleep(Duration::from_secs(cli.wait)).await;

    let group = cli.group.as_deref();
    match &cli.command {
        Commands::Watch => unreachable!(),

        Commands::List => {
            let bulbs = client.bulbs(group);
            if bulbs.is_empty() {
                println!("No bulbs found.");
            }
            for bulb in bulbs {
                let state = bulb.state();
                let color = state.color();
                println!(
                    "  {:20} {}  power: {:?}  hsbk: {}/{}/{}/{}K",
                    bulb.name(),
                    bulb.address(),
                    state.power(),
                    color.hue,
                    color.saturation,
                    color.brightness,
                    color.kelvin
                );
            }
        }

        Commands::Groups => {
            for label in client.groups() {
                println!("  {:20} {:?}", label, client.list_bulbs(Some(&label)));
            }
        }

        Commands::On => {
            let sent = client.lights_on(cli.selection())?;
            println!("Sent {} power-on frame(s)", sent);
        }

        Commands::Off => {
            let sent = client.lights_off(cli.selection())?;
            println!("Sent {} power-off frame(s)", sent);
        }

        Commands::Color {
            hue,
            saturation,
            brightness,
            fade,
        } => {
            let color = Hsbk::from_degrees(*hue, *saturation, *brightness);
            let sent = client.set_color(cli.selection(), color, *fade)?;
            println!("Sent {} color frame(s)", sent);
        }

        Commands::White { kelvin, brightness } => {
            let level = (brightness.clamp(0.0, 1.0) * f32::from(u16::MAX)).round() as u16;
            let sent = client.set_color(cli.selection(), Hsbk::white(level, *kelvin), 0)?;
            println!("Sent {} color frame(s)", sent);
        }

        Commands::Diagnostics => {
            println!("{}", serde_json::to_string_pretty(&client.diagnostics())?);
        }
    }

    // let queued frames reach the gateways before the connections close
    tokio::time::sleep(Duration::from_millis(200)).await;
    client.close();
    Ok(())
}
