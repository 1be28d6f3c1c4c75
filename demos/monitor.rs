use std::env;
use std::time::Duration;

use tornado_ac::{AuxCloudClient, Coordinator, Event, Integration, MessageLogMode, Region};

#[tokio::main]
async fn main() -> tornado_ac::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let Some(session_file) = args.get(1) else {
        eprintln!("usage: monitor <session.json> [--usa] [--log <file>]");
        std::process::exit(2);
    };
    let region = if args.iter().any(|a| a == "--usa") {
        Region::Usa
    } else {
        Region::Eu
    };

    let mut builder = AuxCloudClient::builder()
        .region(region)
        .session_file(session_file);
    if let Some(pos) = args.iter().position(|a| a == "--log")
        && let Some(path) = args.get(pos + 1)
    {
        builder = builder.message_log(MessageLogMode::Diffed, path.as_str());
    }
    let client = builder.build()?;

    let coordinator = Coordinator::builder(client)
        .update_interval(Duration::from_secs(30))
        .on_event(|event| match event {
            Event::DeviceAdded { device_id, name } => println!("+ {name} ({device_id})"),
            Event::DeviceRemoved { device_id } => println!("- {device_id}"),
            Event::ParamChanged { device_id, param, old, new } => {
                println!("[{device_id}] {param}: {old:?} -> {new}")
            }
            Event::RefreshFailed { error } => eprintln!("refresh failed: {error}"),
        })
        .build()?;

    let integration = Integration::setup(coordinator).await?;

    for set in integration.devices() {
        let state = set.climate.state();
        println!(
            "{} | mode: {:?} | target: {} | room: {} | fan: {:?} | sleep: {}",
            set.climate.name(),
            state.hvac_mode,
            state.target_temperature.map(|t| t.to_string()).unwrap_or_default(),
            state.current_temperature.map(|t| t.to_string()).unwrap_or_default(),
            state.fan_mode,
            set.sleep_mode.is_on(),
        );
    }

    println!("Monitoring, Ctrl-C to stop...");
    let _ = tokio::signal::ctrl_c().await;
    integration.unload();
    Ok(())
}
