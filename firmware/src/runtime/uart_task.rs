use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::pac;
use embassy_stm32::pac::gpio::vals::{Moder, Pupdr};
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};
use energy_core::config::BoardRevision;
use energy_core::protocol::codec::{FrameBuffer, write_response};
use energy_core::protocol::{FrameDecoder, Opcode};
use static_cell::StaticCell;

use super::{POWER_REQUEST, SHARED};
use crate::clock::FirmwareInstant;

const HOST_UART_BAUD: u32 = 115_200;
const UART_BUFFER_SIZE: usize = 64;
/// PA9, shared with the programming connector.
const TX_PIN: usize = 9;

static TX_BUFFER: StaticCell<[u8; UART_BUFFER_SIZE]> = StaticCell::new();
static RX_BUFFER: StaticCell<[u8; UART_BUFFER_SIZE]> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART1>;
});

#[embassy_executor::task]
pub async fn run(
    board: &'static BoardRevision,
    usart: Peri<'static, hal::peripherals::USART1>,
    tx_pin: Peri<'static, hal::peripherals::PA9>,
    rx_pin: Peri<'static, hal::peripherals::PA10>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = HOST_UART_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;

    let mut uart = BufferedUart::new(
        usart,
        rx_pin,
        tx_pin,
        TX_BUFFER.init([0; UART_BUFFER_SIZE]),
        RX_BUFFER.init([0; UART_BUFFER_SIZE]),
        UartIrqs,
        config,
    )
    .expect("failed to initialize host UART");
    release_tx_line();

    let dispatcher = SHARED.dispatcher(board);
    let mut decoder = FrameDecoder::new();
    let mut ingress = [0u8; 16];

    loop {
        let count = match uart.read(&mut ingress).await {
            Ok(count) => count,
            Err(_) => {
                defmt::warn!("uart: read error");
                decoder.reset();
                Timer::after(Duration::from_millis(5)).await;
                continue;
            }
        };

        for &byte in &ingress[..count] {
            let command = match decoder.push(byte) {
                Some(Ok(command)) => command,
                Some(Err(error)) => {
                    defmt::debug!("uart: dropped frame: {}", defmt::Display2Format(&error));
                    continue;
                }
                None => continue,
            };

            let reply = match dispatcher.dispatch(command, FirmwareInstant::now()) {
                Ok(reply) => reply,
                Err(error) => {
                    defmt::warn!("uart: {}", defmt::Display2Format(&error));
                    None
                }
            };

            if changes_power_state(command.opcode) {
                POWER_REQUEST.signal(());
            }

            if let Some(value) = reply {
                let mut frame = FrameBuffer::new();
                if write_response(&mut frame, value).is_err() {
                    continue;
                }
                claim_tx_line();
                let written = match uart.write_all(frame.as_bytes()).await {
                    Ok(()) => uart.flush().await,
                    Err(error) => Err(error),
                };
                release_tx_line();
                if written.is_err() {
                    defmt::warn!("uart: write error");
                }
            }
        }
    }
}

/// Hands PA9 back to the USART before a reply.
fn claim_tx_line() {
    pac::GPIOA
        .moder()
        .modify(|w| w.set_moder(TX_PIN, Moder::ALTERNATE));
}

/// Leaves PA9 as a pulled-up input once the reply has left the shifter.
fn release_tx_line() {
    pac::GPIOA
        .pupdr()
        .modify(|w| w.set_pupdr(TX_PIN, Pupdr::PULL_UP));
    pac::GPIOA
        .moder()
        .modify(|w| w.set_moder(TX_PIN, Moder::INPUT));
}

fn changes_power_state(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::SetLoadSwitch
            | Opcode::Shutdown
            | Opcode::RequestReset
            | Opcode::LeaveCriticalSection
    )
}
