use embassy_stm32::gpio::Input;
use embassy_time::{Duration, Ticker};
use energy_core::button::{ButtonAction, ButtonConfig, ClickDetector};

use super::SHARED;
use crate::clock::FirmwareInstant;

const SAMPLE_PERIOD: Duration = Duration::from_millis(10);

#[embassy_executor::task]
pub async fn run(button: Input<'static>) -> ! {
    let mut detector = ClickDetector::<FirmwareInstant>::new(ButtonConfig::default());
    let mut ticker = Ticker::every(SAMPLE_PERIOD);
    loop {
        ticker.next().await;
        for action in detector.sample(FirmwareInstant::now(), button.is_low()) {
            if let Some(event) = action.latched() {
                defmt::debug!("button: {}", defmt::Display2Format(&event));
                SHARED.button.post(event);
            } else if action == ButtonAction::LongPressed {
                defmt::debug!("button: long press");
            }
        }
    }
}
