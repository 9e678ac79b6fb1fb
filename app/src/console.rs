//! Text commands standing in for the touch GUI.

use boombox_core::protocol::{AM_STEPS, FM_STEPS};
use boombox_core::{ControlTag, GuiRequest, Mode, PlayControl};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("empty line")]
    Empty,
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),
    #[error("bad value `{value}` for `{command}`")]
    BadNumber { command: &'static str, value: String },
}

pub const HELP: &str = "\
air | bt | web                 switch source
vol N                          volume 0..100
freq N                         tune (FM in 10 kHz, else kHz)
seek | up [N] | down [N]       seek, step the frequency
next | prev                    stored station (air) or track/station
band fm|mw|sw|lw               band
mod am|lsb|usb|cw|fm           modulation
stepfm N | stepam N            spacing (FM 1,5,10,20 / AM 1,5,9,10)
bwfm N | bwam N | bwssb N      bandwidth index
agc on|off | att N             AGC and attenuation 0..36
play | pause | stop            transport
station N                      web station, counted from 0";

fn number(command: &'static str, arg: Option<&str>) -> Result<i32, ConsoleError> {
    let arg = arg.ok_or(ConsoleError::MissingArgument(command))?;
    arg.parse().map_err(|_| ConsoleError::BadNumber {
        command,
        value: arg.to_owned(),
    })
}

/// Position of `arg` in `choices`, compared case-insensitively.
fn choice(command: &'static str, arg: Option<&str>, choices: &[&str]) -> Result<i32, ConsoleError> {
    let arg = arg.ok_or(ConsoleError::MissingArgument(command))?;
    choices
        .iter()
        .position(|c| c.eq_ignore_ascii_case(arg))
        .map(|i| i as i32)
        .ok_or_else(|| ConsoleError::BadNumber {
            command,
            value: arg.to_owned(),
        })
}

fn step_index(command: &'static str, arg: Option<&str>, steps: &[u16]) -> Result<i32, ConsoleError> {
    let value = number(command, arg)?;
    steps
        .iter()
        .position(|&s| i32::from(s) == value)
        .map(|i| i as i32)
        .ok_or_else(|| ConsoleError::BadNumber {
            command,
            value: value.to_string(),
        })
}

/// Turn one console line into the request the GUI would have sent while
/// showing `current`.
pub fn parse(line: &str, current: Mode) -> Result<GuiRequest, ConsoleError> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Err(ConsoleError::Empty);
    };
    let arg = words.next();
    let control = |tag, value| GuiRequest::control(current, tag, value);

    let request = match command.to_ascii_lowercase().as_str() {
        "air" => GuiRequest::select(Mode::Air),
        "bt" => GuiRequest::select(Mode::Bt),
        "web" => GuiRequest::select(Mode::Web),
        "vol" => control(ControlTag::SliderVolume, number("vol", arg)?),
        "freq" => control(ControlTag::SetFrequency, number("freq", arg)?),
        "seek" => control(ControlTag::SeekUp, 0),
        "up" => control(
            ControlTag::StationStepUp,
            arg.map_or(Ok(1), |_| number("up", arg))?,
        ),
        "down" => control(
            ControlTag::StationStepDown,
            arg.map_or(Ok(1), |_| number("down", arg))?,
        ),
        "next" if current == Mode::Air => control(ControlTag::StepUp, 0),
        "prev" if current == Mode::Air => control(ControlTag::StepDown, 0),
        "next" => GuiRequest::play(current, PlayControl::Next),
        "prev" => GuiRequest::play(current, PlayControl::Previous),
        // word order follows the wire discriminants
        "band" => control(
            ControlTag::BandIndex,
            choice("band", arg, &["lw", "mw", "sw", "fm"])?,
        ),
        "mod" => control(
            ControlTag::ModulationIndex,
            choice("mod", arg, &["am", "lsb", "usb", "cw", "fm"])?,
        ),
        "stepfm" => control(ControlTag::StepFm, step_index("stepfm", arg, &FM_STEPS)?),
        "stepam" => control(ControlTag::StepAm, step_index("stepam", arg, &AM_STEPS)?),
        "bwfm" => control(ControlTag::BandwidthFm, number("bwfm", arg)?),
        "bwam" => control(ControlTag::BandwidthAm, number("bwam", arg)?),
        "bwssb" => control(ControlTag::BandwidthSsb, number("bwssb", arg)?),
        "agc" => control(ControlTag::AgcGain, choice("agc", arg, &["off", "on"])?),
        "att" => control(ControlTag::SliderAgc, number("att", arg)?),
        "play" => GuiRequest::play(current, PlayControl::Play),
        "pause" => GuiRequest::play(current, PlayControl::Pause),
        "stop" => GuiRequest::play(current, PlayControl::Stop),
        "station" => {
            let index = number("station", arg)?;
            let index = u16::try_from(index).map_err(|_| ConsoleError::BadNumber {
                command: "station",
                value: index.to_string(),
            })?;
            GuiRequest::play(current, PlayControl::Select(index))
        }
        _ => return Err(ConsoleError::Unknown(command.to_owned())),
    };
    Ok(request)
}

#[cfg(test)]
mod tests {
    use boombox_core::{BandType, Command, Modulation};

    use super::*;

    fn command(line: &str, current: Mode) -> Option<Command> {
        parse(line, current).unwrap().command().unwrap()
    }

    #[test]
    fn source_words_select_without_control() {
        let request = parse("web", Mode::Air).unwrap();
        assert_eq!(request, GuiRequest::select(Mode::Web));
        assert!(request.state);
        assert_eq!(request.command(), Ok(None));
    }

    #[test]
    fn controls_target_the_current_source() {
        let request = parse("vol 80", Mode::Air).unwrap();
        assert_eq!(request.mode, Mode::Air);
        assert_eq!(request.command(), Ok(Some(Command::Volume(80))));

        assert_eq!(command("freq 10490", Mode::Air), Some(Command::SetFrequency(10490)));
        assert_eq!(command("up", Mode::Air), Some(Command::TuneUp(1)));
        assert_eq!(command("down 3", Mode::Air), Some(Command::TuneDown(3)));
        assert_eq!(command("band MW", Mode::Air), Some(Command::Band(BandType::Mw)));
        assert_eq!(command("mod usb", Mode::Air), Some(Command::Modulation(Modulation::Usb)));
        assert_eq!(command("stepfm 10", Mode::Air), Some(Command::StepFm(10)));
        assert_eq!(command("stepam 9", Mode::Air), Some(Command::StepAm(9)));
        assert_eq!(command("agc on", Mode::Air), Some(Command::Agc(true)));
        assert_eq!(command("att 20", Mode::Air), Some(Command::AgcAttenuation(20)));
    }

    #[test]
    fn next_depends_on_source() {
        assert_eq!(command("next", Mode::Air), Some(Command::NextStation));
        assert_eq!(command("prev", Mode::Air), Some(Command::PreviousStation));
        assert_eq!(
            command("next", Mode::Bt),
            Some(Command::Play(PlayControl::Next))
        );
        assert_eq!(
            command("station 4", Mode::Web),
            Some(Command::Play(PlayControl::Select(4)))
        );
    }

    #[test]
    fn bad_input_is_reported() {
        assert_eq!(parse("   ", Mode::Air), Err(ConsoleError::Empty));
        assert_eq!(
            parse("louder", Mode::Air),
            Err(ConsoleError::Unknown("louder".into()))
        );
        assert_eq!(parse("vol", Mode::Air), Err(ConsoleError::MissingArgument("vol")));
        assert_eq!(
            parse("vol max", Mode::Air),
            Err(ConsoleError::BadNumber {
                command: "vol",
                value: "max".into()
            })
        );
        assert!(matches!(
            parse("stepfm 7", Mode::Air),
            Err(ConsoleError::BadNumber { .. })
        ));
        assert!(matches!(
            parse("station -1", Mode::Web),
            Err(ConsoleError::BadNumber { .. })
        ));
    }
}
