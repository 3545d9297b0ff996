use embassy_time::{Duration, Ticker};
use energy_core::gauge::{GaugeRenderer, LED_COUNT};

use super::SHARED;
use crate::board::MatrixPins;

#[embassy_executor::task]
pub async fn run(mut pins: MatrixPins, ordering: [u8; LED_COUNT]) -> ! {
    let mut renderer = GaugeRenderer::new(ordering);
    let mut ticker = Ticker::every(Duration::from_millis(1));
    loop {
        ticker.next().await;
        renderer.tick(&SHARED.gauge, &mut pins);
    }
}
