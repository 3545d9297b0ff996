mod session;

use std::env;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process;

use energy_core::battery::profile::Chemistry;
use energy_core::battery::temperature::TemperatureModel;
use session::{BoardOptions, Session};

const USAGE: &str = "Usage: energy-emulator [--revision <n>] [--battery <mV>] \
                     [--chemistry <lipo|life|custom>] [--thermistor <linear|beta>] \
                     [--transcript <path>]";

struct Options {
    board: BoardOptions,
    transcript: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let color = stdout.is_terminal();
    let mut writer = stdout.lock();
    let mut session = Session::new(options.board, options.transcript.as_deref(), color)?;
    let mut line = String::new();

    writeln!(
        writer,
        "Battery coprocessor emulator ready (board rev {}). Type `help` for commands or `exit` to quit.",
        options.board.revision
    )?;
    for entry in session.boot_log() {
        writeln!(writer, "{entry}")?;
    }

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options() -> Result<Options, String> {
    let mut options = Options {
        board: BoardOptions::default(),
        transcript: None,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let value = match inline {
            Some(value) => value,
            None => args
                .next()
                .ok_or_else(|| format!("Expected value after {flag}"))?,
        };

        match flag.as_str() {
            "--revision" => {
                options.board.revision = value
                    .parse()
                    .map_err(|err| format!("Invalid revision `{value}`: {err}"))?;
            }
            "--battery" => {
                options.board.battery_mv = value
                    .parse()
                    .map_err(|err| format!("Invalid battery voltage `{value}`: {err}"))?;
            }
            "--chemistry" => options.board.chemistry = parse_chemistry(&value)?,
            "--thermistor" => options.board.temperature = parse_temperature_model(&value)?,
            "--transcript" => options.transcript = Some(PathBuf::from(value)),
            other => return Err(format!("Unknown option `{other}`")),
        }
    }
    Ok(options)
}

fn parse_chemistry(tag: &str) -> Result<Chemistry, String> {
    match tag.to_ascii_lowercase().as_str() {
        "lipo" => Ok(Chemistry::LiPo),
        "life" | "lifepo4" => Ok(Chemistry::LiFe),
        "custom" => Ok(Chemistry::Custom),
        other => Err(format!("Unknown chemistry `{other}`")),
    }
}

fn parse_temperature_model(tag: &str) -> Result<TemperatureModel, String> {
    match tag.to_ascii_lowercase().as_str() {
        "linear" => Ok(TemperatureModel::Linear),
        "beta" => Ok(TemperatureModel::Beta),
        other => Err(format!("Unknown thermistor model `{other}`")),
    }
}
