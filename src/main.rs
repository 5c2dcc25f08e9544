use bevy::app::ScheduleRunnerPlugin;
use bevy::log::LogPlugin;
use bevy::prelude::*;

use switchboard::api::BridgePlugin;
use switchboard::handlers::builtin_handlers;
use switchboard::BridgeConfig;

fn main() {
    let config = BridgeConfig::load();
    println!(
        "[Switchboard] Starting headless at {} Hz, API on {}",
        config.tick_hz, config.bind
    );

    let mut app = App::new();
    app.add_plugins(
        MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(config.tick_interval())),
    )
    .add_plugins(LogPlugin {
        filter: config.log.clone(),
        ..default()
    })
    .add_plugins(BridgePlugin::new(config, builtin_handlers()));

    app.run();
}
