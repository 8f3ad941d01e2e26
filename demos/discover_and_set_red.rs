//! Discover all LIFX bulbs on the network and set them to red.
//!
//! This example demonstrates:
//! - Discovery of gateways and their bulbs
//! - Reacting to bulb events
//! - Setting all discovered bulbs to red
//!
//! Run with: cargo run --example discover_and_set_red

use std::time::Duration;

use lifx_lights_rs::{Client, ClientConfig, Event, Hsbk};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    println!("Discovering LIFX bulbs on the network...");

    let client = Client::start(ClientConfig::default());
    let mut events = client.subscribe();

    // Collect bulbs for 5 seconds
    let deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(Event::Gateway(gateway)) => println!("  gateway {} (site {})", gateway.ip, gateway.site),
                Ok(Event::Bulb(bulb)) => println!("  bulb {:?} at {}", bulb.name(), bulb.address()),
                Ok(_) => {}
                Err(_) => break,
            },
        }
    }

    let bulbs = client.bulbs(None);
    if bulbs.is_empty() {
        println!("No bulbs found on the network.");
        return Ok(());
    }

    println!("\nSetting {} bulb(s) to red...", bulbs.len());
    let red = Hsbk::from_degrees(0.0, 1.0, 1.0);
    for bulb in &bulbs {
        match client.set_color(bulb, red, 1000) {
            Ok(_) => println!("  ✓ Sent red to {}", bulb.name()),
            Err(e) => eprintln!("  ✗ Failed to send red to {}: {}", bulb.name(), e),
        }
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    client.close();
    println!("\nDone!");
    Ok(())
}
