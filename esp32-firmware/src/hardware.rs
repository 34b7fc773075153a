use anyhow::Result;
use esp_idf_hal::{gpio::Gpio48, peripheral::Peripheral, rmt::RmtChannel};
use log::*;
use smart_leds::{SmartLedsWrite, RGB8};
use ws2812_esp32_rmt_driver::Ws2812Esp32Rmt;

use status_orchestrator::indicator::PixelSink;

/// The board's single WS2812 status pixel, driven by the RMT peripheral
pub struct Ws2812Pixel {
    driver: Ws2812Esp32Rmt<'static>,
}

impl Ws2812Pixel {
    pub fn new<C>(channel: impl Peripheral<P = C> + 'static, pin: Gpio48) -> Result<Self>
    where
        C: RmtChannel,
    {
        let driver = Ws2812Esp32Rmt::new(channel, pin)?;
        Ok(Self { driver })
    }
}

impl PixelSink for Ws2812Pixel {
    fn show(&mut self, color: RGB8) -> Result<()> {
        // The driver reorders to GRB on the wire
        self.driver.write([color].into_iter())?;
        debug!(
            "hardware: pixel RGB({}, {}, {})",
            color.r, color.g, color.b
        );
        Ok(())
    }
}
