use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32 as hal;
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_stm32::flash::{FLASH_SIZE, Flash};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use energy_core::SharedState;
use energy_core::battery::BatteryMonitor;
use energy_core::battery::calibration::{FlashCalibration, effective_calibration};

use crate::board::{BoardParts, BoardPins};
use crate::clock::FirmwareInstant;
use crate::config;

mod button_task;
mod gauge_task;
mod monitor_task;
mod uart_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Calibration record lives alone in the last flash page.
const CALIBRATION_PAGE_SIZE: usize = 1024;

pub(super) static SHARED: SharedState<FirmwareInstant> = SharedState::new(FirmwareInstant::ZERO);

/// Raised by the UART task after a command that changes the power state.
pub(super) static POWER_REQUEST: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Runs the LED multiplexer above thread mode so ADC reads cannot stall it.
static GAUGE_EXECUTOR: InterruptExecutor = InterruptExecutor::new();

// I2C1 is unused on this board; its vector only drives the gauge executor.
#[interrupt]
unsafe fn I2C1() {
    // SAFETY: called only from the I2C1 vector the executor was started on.
    unsafe { GAUGE_EXECUTOR.on_interrupt() }
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let p = hal::init(hal::Config::default());
    let board = config::board();
    defmt::info!("boot: board revision {}", board.revision);

    let offset = u32::try_from(FLASH_SIZE - CALIBRATION_PAGE_SIZE).unwrap_or(0);
    let mut calibration = FlashCalibration::new(Flash::new_blocking(p.FLASH), offset);
    let counts = effective_calibration(&mut calibration);
    defmt::info!("boot: calibration {} counts at 24V", counts);

    let pins = BoardPins::take(
        BoardParts {
            adc: p.ADC1,
            pa0: p.PA0,
            pa1: p.PA1,
            pa2: p.PA2,
            pa3: p.PA3,
            pa4: p.PA4,
            pa5: p.PA5,
            pa6: p.PA6,
            pa7: p.PA7,
            pa13: p.PA13,
            pa14: p.PA14,
            pb1: p.PB1,
            pf0: p.PF0,
            pf1: p.PF1,
        },
        board,
    );

    let monitor = BatteryMonitor::new(pins.analog, board, counts);

    spawner
        .spawn(monitor_task::run(monitor, pins.rails))
        .expect("failed to spawn monitor task");
    interrupt::I2C1.set_priority(Priority::P1);
    let gauge_spawner = GAUGE_EXECUTOR.start(interrupt::I2C1);
    gauge_spawner
        .spawn(gauge_task::run(pins.gauge, board.led_ordering))
        .expect("failed to spawn gauge task");
    spawner
        .spawn(button_task::run(pins.button))
        .expect("failed to spawn button task");
    spawner
        .spawn(uart_task::run(board, p.USART1, p.PA9, p.PA10))
        .expect("failed to spawn UART task");

    core::future::pending::<()>().await;
}
