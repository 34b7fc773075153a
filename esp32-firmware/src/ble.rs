//! Bluedroid GATT server for the wireless command channel.
//!
//! Four primary services are registered once at boot: the LED command service
//! plus device information, current time and battery. Handles are mapped back
//! to an [`Attribute`] as the stack reports them, and every access the app has
//! to answer is delegated to [`WirelessChannel`].
//!
//! Starting and stopping the channel only toggles advertising; the attribute
//! table stays registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use enumset::{enum_set, EnumSet};
use esp_idf_hal::modem::BluetoothModem;
use esp_idf_svc::bt::ble::gap::{AdvConfiguration, BleGapEvent, EspBleGap};
use esp_idf_svc::bt::ble::gatt::server::{ConnectionId, EspGatts, GattsEvent, TransferId};
use esp_idf_svc::bt::ble::gatt::{
    AutoResponse, GattCharacteristic, GattDescriptor, GattId, GattInterface, GattResponse,
    GattServiceId, GattStatus, Handle, Permission, Property,
};
use esp_idf_svc::bt::{Ble, BtDriver, BtStatus, BtUuid};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::*;

use common::protocol;
use status_orchestrator::commands::{AttError, Attribute, WirelessChannel};

type Driver = Arc<BtDriver<'static, Ble>>;

const APP_ID: u16 = 0;
const CCCD_UUID: u16 = 0x2902;
const HANDLES_PER_SERVICE: u16 = 8;
const MAX_VALUE_LEN: usize = 32;

const SERVICES: [u16; 4] = [
    protocol::COMMAND_SERVICE_UUID,
    protocol::DEVICE_INFO_SERVICE_UUID,
    protocol::CURRENT_TIME_SERVICE_UUID,
    protocol::BATTERY_SERVICE_UUID,
];

#[derive(Default)]
struct Table {
    gatt_if: Option<GattInterface>,
    attributes: HashMap<Handle, Attribute>,
    status: Option<Handle>,
    status_cccd: Option<Handle>,
    peer: Option<ConnectionId>,
    notify: bool,
}

struct Server {
    gap: EspBleGap<'static, Ble, Driver>,
    gatts: EspGatts<'static, Ble, Driver>,
    channel: Arc<WirelessChannel>,
    device_name: String,
    table: Mutex<Table>,
    /// Advertising requested by the mode controller
    enabled: AtomicBool,
    /// Advertising data accepted by the stack
    configured: AtomicBool,
}

pub struct BleService {
    server: Arc<Server>,
}

impl BleService {
    pub fn new(
        modem: BluetoothModem,
        nvs: EspDefaultNvsPartition,
        channel: Arc<WirelessChannel>,
        device_name: &str,
    ) -> Result<Self> {
        let driver: Driver = Arc::new(BtDriver::new(modem, Some(nvs))?);

        let server = Arc::new(Server {
            gap: EspBleGap::new(driver.clone())?,
            gatts: EspGatts::new(driver)?,
            channel,
            device_name: device_name.to_string(),
            table: Mutex::new(Table::default()),
            enabled: AtomicBool::new(false),
            configured: AtomicBool::new(false),
        });

        let gap_server = server.clone();
        server.gap.subscribe(move |event| {
            if let Err(e) = gap_server.on_gap_event(event) {
                error!("ble::gap: {:#}", e);
            }
        })?;

        let gatts_server = server.clone();
        server.gatts.subscribe(move |(gatt_if, event)| {
            if let Err(e) = gatts_server.on_gatts_event(gatt_if, event) {
                error!("ble::gatts: {:#}", e);
            }
        })?;

        server.gatts.register_app(APP_ID)?;
        info!("ble: GATT application registered");

        Ok(Self { server })
    }

    pub fn start(&self) -> Result<()> {
        self.server.enabled.store(true, Ordering::SeqCst);
        // Otherwise advertising starts once the stack accepts the config
        if self.server.configured.load(Ordering::SeqCst) {
            self.server.gap.start_advertising()?;
        }
        info!("ble: advertising as '{}'", self.server.device_name);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.server.enabled.store(false, Ordering::SeqCst);
        self.server.gap.stop_advertising()?;
        info!("ble: advertising stopped");
        Ok(())
    }
}

impl Server {
    fn table(&self) -> MutexGuard<'_, Table> {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn on_gap_event(&self, event: BleGapEvent) -> Result<()> {
        if let BleGapEvent::AdvertisingConfigured(status) = event {
            if status != BtStatus::Success {
                bail!("advertising configuration rejected: {:?}", status);
            }
            self.configured.store(true, Ordering::SeqCst);
            if self.enabled.load(Ordering::SeqCst) {
                self.gap.start_advertising()?;
            }
        }
        Ok(())
    }

    fn on_gatts_event(&self, gatt_if: GattInterface, event: GattsEvent) -> Result<()> {
        match event {
            GattsEvent::ServiceRegistered { status, app_id } if app_id == APP_ID => {
                check(status)?;
                self.table().gatt_if = Some(gatt_if);

                self.gap.set_device_name(&self.device_name)?;
                self.gap.set_adv_conf(&AdvConfiguration {
                    include_name: true,
                    include_txpower: true,
                    flag: 2,
                    service_uuid: Some(BtUuid::uuid16(protocol::COMMAND_SERVICE_UUID)),
                    ..Default::default()
                })?;

                for uuid in SERVICES {
                    let service = GattServiceId {
                        id: GattId {
                            uuid: BtUuid::uuid16(uuid),
                            inst_id: 0,
                        },
                        is_primary: true,
                    };
                    self.gatts
                        .create_service(gatt_if, &service, HANDLES_PER_SERVICE)?;
                }
            }
            GattsEvent::ServiceCreated {
                status,
                service_handle,
                service_id,
            } => {
                check(status)?;
                self.gatts.start_service(service_handle)?;

                for attribute in Attribute::ALL {
                    if service_id.id.uuid == BtUuid::uuid16(attribute.service_uuid16()) {
                        self.add_characteristic(service_handle, attribute)?;
                    }
                }
            }
            GattsEvent::CharacteristicAdded {
                status,
                attr_handle,
                service_handle,
                char_uuid,
            } => {
                check(status)?;
                let Some(attribute) = Attribute::ALL
                    .into_iter()
                    .find(|attribute| char_uuid == BtUuid::uuid16(attribute.uuid16()))
                else {
                    return Ok(());
                };
                debug!("ble: {:?} at handle {}", attribute, attr_handle);

                self.table().attributes.insert(attr_handle, attribute);
                if attribute.notifies() {
                    self.table().status = Some(attr_handle);
                    self.gatts.add_descriptor(
                        service_handle,
                        &GattDescriptor {
                            uuid: BtUuid::uuid16(CCCD_UUID),
                            permissions: enum_set!(Permission::Read | Permission::Write),
                        },
                    )?;
                }
            }
            GattsEvent::DescriptorAdded {
                status,
                attr_handle,
                descr_uuid,
                ..
            } => {
                check(status)?;
                if descr_uuid == BtUuid::uuid16(CCCD_UUID) {
                    self.table().status_cccd = Some(attr_handle);
                }
            }
            GattsEvent::PeerConnected { conn_id, addr, .. } => {
                info!("ble: peer {} connected", addr);
                let mut table = self.table();
                table.peer = Some(conn_id);
                table.notify = false;
            }
            GattsEvent::PeerDisconnected { addr, .. } => {
                info!("ble: peer {} disconnected", addr);
                let mut table = self.table();
                table.peer = None;
                table.notify = false;
                drop(table);

                if self.enabled.load(Ordering::SeqCst) {
                    self.gap.start_advertising()?;
                }
            }
            GattsEvent::Read {
                conn_id,
                trans_id,
                handle,
                offset,
                need_rsp,
                ..
            } => {
                if need_rsp {
                    self.on_read(gatt_if, conn_id, trans_id, handle, offset)?;
                }
            }
            GattsEvent::Write {
                conn_id,
                trans_id,
                handle,
                offset,
                need_rsp,
                is_prep,
                value,
                ..
            } => {
                let status = if is_prep {
                    GattStatus::ReqNotSupported
                } else {
                    self.on_write(gatt_if, conn_id, handle, value)
                };
                if need_rsp {
                    let mut response = GattResponse::new();
                    response
                        .attr_handle(handle)
                        .auth_req(0)
                        .offset(offset)
                        .value(value)
                        .map_err(|_| anyhow!("write response too long"))?;
                    self.gatts
                        .send_response(gatt_if, conn_id, trans_id, status, Some(&response))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn add_characteristic(&self, service_handle: Handle, attribute: Attribute) -> Result<()> {
        let mut permissions = EnumSet::empty();
        let mut properties = EnumSet::empty();
        if attribute.is_readable() {
            permissions.insert(Permission::Read);
            properties.insert(Property::Read);
        }
        if attribute.is_writable() {
            permissions.insert(Permission::Write);
            properties.insert(Property::Write);
        }
        if attribute.notifies() {
            properties.insert(Property::Notify);
        }

        // The command and status values change at runtime; the rest are fixed
        let dynamic = matches!(attribute, Attribute::LedCommand | Attribute::LedStatus);
        let (auto_rsp, initial) = if dynamic {
            (AutoResponse::ByApp, Vec::new())
        } else {
            (AutoResponse::ByGatt, self.channel.initial_value(attribute))
        };

        self.gatts.add_characteristic(
            service_handle,
            &GattCharacteristic {
                uuid: BtUuid::uuid16(attribute.uuid16()),
                permissions,
                properties,
                max_len: MAX_VALUE_LEN,
                auto_rsp,
            },
            &initial,
        )?;
        Ok(())
    }

    fn on_read(
        &self,
        gatt_if: GattInterface,
        conn_id: ConnectionId,
        trans_id: TransferId,
        handle: Handle,
        offset: u16,
    ) -> Result<()> {
        let attribute = self.table().attributes.get(&handle).copied();
        let result = match attribute {
            Some(attribute) => self.channel.handle_read(attribute.uuid16()),
            None => Err(AttError::Unlikely),
        };

        let (status, value) = match result {
            Ok(value) if usize::from(offset) <= value.len() => {
                (GattStatus::Ok, value[usize::from(offset)..].to_vec())
            }
            Ok(_) => (GattStatus::InvalidOffset, Vec::new()),
            Err(e) => (gatt_status(e), Vec::new()),
        };

        let mut response = GattResponse::new();
        response
            .attr_handle(handle)
            .auth_req(0)
            .offset(offset)
            .value(&value)
            .map_err(|_| anyhow!("read response too long"))?;
        self.gatts
            .send_response(gatt_if, conn_id, trans_id, status, Some(&response))?;
        Ok(())
    }

    fn on_write(
        &self,
        gatt_if: GattInterface,
        conn_id: ConnectionId,
        handle: Handle,
        value: &[u8],
    ) -> GattStatus {
        let table = self.table();
        if table.status_cccd == Some(handle) {
            drop(table);
            let enabled = value.first().is_some_and(|flags| flags & 0x01 != 0);
            self.table().notify = enabled;
            info!(
                "ble: status notifications {}",
                if enabled { "enabled" } else { "disabled" }
            );
            return GattStatus::Ok;
        }
        let attribute = table.attributes.get(&handle).copied();
        let status_handle = table.status.filter(|_| table.notify);
        drop(table);

        if !self.enabled.load(Ordering::SeqCst) {
            warn!("ble: write while the command channel is stopped");
            return GattStatus::WriteNotPermit;
        }

        let result = match attribute {
            Some(attribute) => self.channel.handle_write(attribute.uuid16(), value),
            None => Err(AttError::Unlikely),
        };
        match result {
            Ok(_) => {
                if let Some(status_handle) = status_handle {
                    let status = self.channel.status_value();
                    if let Err(e) = self.gatts.notify(gatt_if, conn_id, status_handle, &status) {
                        warn!("ble: status notification failed: {:?}", e);
                    }
                }
                GattStatus::Ok
            }
            Err(e) => gatt_status(e),
        }
    }
}

fn check(status: GattStatus) -> Result<()> {
    if status != GattStatus::Ok {
        bail!("GATT operation failed: {:?}", status);
    }
    Ok(())
}

fn gatt_status(error: AttError) -> GattStatus {
    match error {
        AttError::ReadNotPermitted => GattStatus::ReadNotPermit,
        AttError::WriteNotPermitted => GattStatus::WriteNotPermit,
        AttError::InvalidAttributeValueLength => GattStatus::InvalidAttrLen,
        AttError::Unlikely => GattStatus::ErrUnlikely,
    }
}
