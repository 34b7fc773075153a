//! Wi-Fi driver behind the connectivity state machine.
//!
//! The driver only configures and starts the radio. Progress is reported by the
//! IDF event loop, whose callbacks are translated into [`RadioEvent`]s and
//! posted to the connectivity task; nothing here touches the shared state.

use std::net::Ipv4Addr;
use std::os::raw::c_void;
use std::ptr;

use anyhow::{anyhow, Result};
use embedded_svc::wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration};
use esp_idf_hal::modem::WifiModem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::EspWifi;
use esp_idf_sys::{
    self as sys, esp, esp_event_base_t, esp_event_handler_register, ESP_EVENT_ANY_ID, IP_EVENT,
    WIFI_EVENT,
};
use log::*;
use once_cell::sync::OnceCell;

use status_orchestrator::connectivity::{AccessPointSettings, Radio, RadioEvent, StationCredentials};
use status_orchestrator::EventSender;

/// Where the raw event handler posts. Installed once by [`EspRadio::new`].
static EVENTS: OnceCell<EventSender> = OnceCell::new();

const AP_CHANNEL: u8 = 1;

pub struct EspRadio {
    wifi: EspWifi<'static>,
}

impl EspRadio {
    pub fn new(
        modem: WifiModem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        events: EventSender,
    ) -> Result<Self> {
        let wifi = EspWifi::new(modem, sys_loop, Some(nvs))?;

        if EVENTS.set(events).is_err() {
            return Err(anyhow!("wifi: radio driver created twice"));
        }

        unsafe {
            esp!(esp_event_handler_register(
                WIFI_EVENT,
                ESP_EVENT_ANY_ID,
                Some(radio_event_handler),
                ptr::null_mut(),
            ))?;
            esp!(esp_event_handler_register(
                IP_EVENT,
                sys::ip_event_t_IP_EVENT_STA_GOT_IP as i32,
                Some(radio_event_handler),
                ptr::null_mut(),
            ))?;
        }

        info!("wifi: driver ready");
        Ok(Self { wifi })
    }
}

impl Radio for EspRadio {
    fn start_station(&mut self, credentials: &StationCredentials) -> Result<()> {
        let config = Configuration::Client(ClientConfiguration {
            ssid: fixed(&credentials.ssid, "ssid")?,
            password: fixed(&credentials.password, "password")?,
            auth_method: AuthMethod::WPA2Personal,
            ..Default::default()
        });

        self.wifi.set_configuration(&config)?;
        self.wifi.start()?;
        info!("wifi: station started for '{}'", credentials.ssid);
        Ok(())
    }

    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<()> {
        let auth_method = if settings.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };
        let config = Configuration::AccessPoint(AccessPointConfiguration {
            ssid: fixed(&settings.ssid, "ssid")?,
            password: fixed(&settings.password, "password")?,
            auth_method,
            channel: AP_CHANNEL,
            max_connections: settings.max_connections as u16,
            ..Default::default()
        });

        self.wifi.set_configuration(&config)?;
        self.wifi.start()?;

        let mac = self.wifi.ap_netif().get_mac()?;
        info!(
            "wifi: access point '{}' up, bssid {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            settings.ssid, mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
        );
        Ok(())
    }

    fn connect(&mut self) -> Result<()> {
        self.wifi.connect()?;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.wifi.stop()?;
        info!("wifi: stopped");
        Ok(())
    }
}

/// Copy into the driver's fixed-capacity string
fn fixed<const N: usize>(value: &str, field: &str) -> Result<heapless::String<N>> {
    heapless::String::try_from(value)
        .map_err(|_| anyhow!("wifi: {} longer than {} bytes", field, N))
}

unsafe extern "C" fn radio_event_handler(
    _arg: *mut c_void,
    event_base: esp_event_base_t,
    event_id: i32,
    event_data: *mut c_void,
) {
    let Some(events) = EVENTS.get() else {
        return;
    };

    let event = if event_base == WIFI_EVENT {
        match event_id as u32 {
            sys::wifi_event_t_WIFI_EVENT_STA_START => Some(RadioEvent::StationStarted),
            sys::wifi_event_t_WIFI_EVENT_STA_DISCONNECTED => {
                let event = event_data as *const sys::wifi_event_sta_disconnected_t;
                Some(RadioEvent::StationDisconnected {
                    reason: (*event).reason as u8,
                })
            }
            sys::wifi_event_t_WIFI_EVENT_AP_START => Some(RadioEvent::AccessPointStarted),
            sys::wifi_event_t_WIFI_EVENT_AP_STACONNECTED => {
                let event = event_data as *const sys::wifi_event_ap_staconnected_t;
                Some(RadioEvent::StationAttached { mac: (*event).mac })
            }
            sys::wifi_event_t_WIFI_EVENT_AP_STADISCONNECTED => {
                let event = event_data as *const sys::wifi_event_ap_stadisconnected_t;
                Some(RadioEvent::StationDetached { mac: (*event).mac })
            }
            _ => None,
        }
    } else if event_base == IP_EVENT && event_id as u32 == sys::ip_event_t_IP_EVENT_STA_GOT_IP {
        let event = event_data as *const sys::ip_event_got_ip_t;
        // lwIP keeps the address in network order
        let addr = (*event).ip_info.ip.addr;
        Some(RadioEvent::AddressAssigned {
            ip: Ipv4Addr::from(addr.to_le_bytes()),
        })
    } else {
        None
    };

    if let Some(event) = event {
        events.radio(event);
    }
}
