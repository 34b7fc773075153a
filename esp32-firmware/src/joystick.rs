use anyhow::Result;
use esp_idf_hal::adc::attenuation::DB_11;
use esp_idf_hal::adc::oneshot::config::AdcChannelConfig;
use esp_idf_hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
use esp_idf_hal::adc::ADC1;
use esp_idf_hal::gpio::{Gpio1, Gpio2, Gpio42, Input, PinDriver, Pull};

use status_orchestrator::input::{InputSampler, JoystickSample};

/// Analog joystick: X on GPIO1, Y on GPIO2, push switch on GPIO42 (active low)
pub struct Joystick {
    adc: AdcDriver<'static, ADC1>,
    config: AdcChannelConfig,
    x: Gpio1,
    y: Gpio2,
    switch: PinDriver<'static, Gpio42, Input>,
}

impl Joystick {
    pub fn new(adc1: ADC1, x: Gpio1, y: Gpio2, switch: Gpio42) -> Result<Self> {
        let mut switch = PinDriver::input(switch)?;
        switch.set_pull(Pull::Up)?;

        Ok(Self {
            adc: AdcDriver::new(adc1)?,
            // Full 0..3.3 V swing
            config: AdcChannelConfig {
                attenuation: DB_11,
                ..Default::default()
            },
            x,
            y,
            switch,
        })
    }
}

impl InputSampler for Joystick {
    fn sample(&mut self) -> Result<JoystickSample> {
        // Channels borrow the unit, so they are configured per read
        let mut x = AdcChannelDriver::new(&self.adc, &mut self.x, &self.config)?;
        let x = self.adc.read(&mut x)?;
        let mut y = AdcChannelDriver::new(&self.adc, &mut self.y, &self.config)?;
        let y = self.adc.read(&mut y)?;

        Ok(JoystickSample {
            x,
            y,
            pressed: self.switch.is_low(),
        })
    }
}
