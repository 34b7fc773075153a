use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::*;

use status_orchestrator::prelude::*;

mod actions;
mod ble;
mod diagnostics;
mod hardware;
mod joystick;
mod mqtt;
mod services;
mod wifi;

const CONFIG: &str = include_str!("../config.ron");

const STATUS_REPORT_PERIOD: Duration = Duration::from_secs(30);

fn load_config() -> Config {
    match Config::from_ron_str(CONFIG) {
        Ok(config) => config,
        Err(e) => {
            error!("main: embedded config.ron rejected ({:#}), using defaults", e);
            Config::default()
        }
    }
}

fn spawn(name: &str, stack_size: usize, f: impl FnOnce() + Send + 'static) -> Result<()> {
    thread::Builder::new()
        .name(name.into())
        .stack_size(stack_size)
        .spawn(f)?;
    Ok(())
}

fn main() -> Result<()> {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("main: status orchestrator starting");
    diagnostics::print_memory_summary("boot");

    let config = load_config();
    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let (connectivity_writer, connectivity) = cell(ConnectivityState::Idle);
    let (mode_writer, mode) = cell(SelectedMode::None);
    let display_override = OverrideCell::new();

    let indicator = match hardware::Ws2812Pixel::new(peripherals.rmt.channel0, peripherals.pins.gpio48) {
        Ok(pixel) => Indicator::new(pixel),
        Err(e) => {
            error!("main: status pixel unavailable, running dark: {:#}", e);
            Indicator::disabled()
        }
    };
    indicator.clear();

    let control = ManualControl::new(indicator.clone(), display_override.clone());
    let broker = Arc::new(BrokerChannel::new(control.clone(), &config.broker));
    let wireless = Arc::new(WirelessChannel::new(control, &config.ble));

    let (events, queue) = event_queue();
    let (wifi_modem, bt_modem) = peripherals.modem.split();

    let manager = ConnectivityManager::new(
        wifi::EspRadio::new(wifi_modem, sys_loop, nvs.clone(), events.clone())?,
        services::EspNetServices::new(events.clone()),
        connectivity_writer,
        &config.network,
    );
    spawn("connectivity", 8 * 1024, move || run_connectivity(manager, queue))?;
    diagnostics::print_memory_summary("wifi ready");

    let ble = ble::BleService::new(bt_modem, nvs, wireless, &config.ble.device_name)?;
    diagnostics::print_memory_summary("ble ready");

    let display = DisplayArbitrator::new(connectivity.clone(), display_override.clone(), indicator);
    let render_period = config.display.render_period();
    spawn("render", 4 * 1024, move || display.run(render_period))?;

    let controller = ModeSwitchController::new(
        actions::DeviceActions::new(events, broker, config.broker.clone(), ble),
        mode_writer,
        display_override,
        Thresholds::from(&config.input),
        config.mode.teardown,
    );
    let sampler = joystick::Joystick::new(
        peripherals.adc1,
        peripherals.pins.gpio1,
        peripherals.pins.gpio2,
        peripherals.pins.gpio42,
    )?;
    let poller = InputPoller::new(sampler, controller, ButtonTracker::from(&config.input));
    let poll_period = config.input.poll_period();
    spawn("input", 8 * 1024, move || poller.run(poll_period))?;

    info!("main: push the joystick right for station, left for access point, up for BLE");

    loop {
        thread::sleep(STATUS_REPORT_PERIOD);
        diagnostics::print_memory_summary(&format!("{} / {}", mode.get(), connectivity.get()));
    }
}
