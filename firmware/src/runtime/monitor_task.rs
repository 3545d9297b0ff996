use embassy_futures::select::select;
use embassy_time::Ticker;
use energy_core::battery::BatteryMonitor;
use energy_core::power::PowerPhase;
use energy_core::telemetry::EventId;
use energy_core::Supervisor;

use super::{POWER_REQUEST, SHARED};
use crate::board::{BoardAnalog, BoardRails};
use crate::clock::FirmwareInstant;

#[embassy_executor::task]
pub async fn run(monitor: BatteryMonitor<BoardAnalog>, rails: BoardRails) -> ! {
    let mut supervisor: Supervisor<FirmwareInstant, _, _> = Supervisor::new(monitor, rails);

    let init = supervisor.boot(&SHARED, FirmwareInstant::now());
    match init.cells {
        Some(cells) => defmt::info!(
            "battery: {} mV, {} cells, chemistry {}",
            init.voltage_mv,
            cells,
            init.chemistry.to_raw()
        ),
        None => defmt::warn!(
            "battery: {} mV matches no pack, chemistry {}, safe={}",
            init.voltage_mv,
            init.chemistry.to_raw(),
            init.safe_to_power
        ),
    }

    let mut logged: Option<EventId> = None;
    let mut ticker = Ticker::every(to_embassy(energy_core::config::BATTERY_POLL_PERIOD));
    loop {
        select(ticker.next(), POWER_REQUEST.wait()).await;

        let step = supervisor.poll(&SHARED, FirmwareInstant::now());
        for record in supervisor.telemetry().since(logged) {
            defmt::info!(
                "power: {} at {} ms",
                defmt::Display2Format(&record.event),
                record.timestamp.into_inner().as_millis()
            );
            logged = Some(record.id);
        }

        if step.phase == PowerPhase::Shutdown {
            // Self power is gone; idle until the rail collapses.
            defmt::info!("power: shutdown complete");
            loop {
                ticker.next().await;
            }
        }
    }
}

fn to_embassy(period: core::time::Duration) -> embassy_time::Duration {
    embassy_time::Duration::from_micros(u64::try_from(period.as_micros()).unwrap_or(u64::MAX))
}
