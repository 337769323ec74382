//! Replay of recorded transport steps.
//!
//! A trace is a plain text file with one step per line:
//!
//! ```text
//! # event edep_kev  pre_x pre_y pre_z  post_x post_y post_z  particle charge volume time_ns track
//! 0 12.5  0.1 -0.05 0.2  0.1 0.0 0.2  proton 1 sensitive 0.05 1
//! 0 0.0   0.1 0.05 0.2   0.1 0.06 0.2 e- -1 back 0.07 2
//! ```
//!
//! Positions are in millimeters. `volume` is one of `sensitive`, `front`,
//! `back` or `other`. Blank lines and lines starting with `#` are skipped.

use crate::error::Error;
use crate::gen::Transport;
use crate::step::{ElectrodeSide, ParticleCategory, Point3, StepEvent, TrackStatus, Volume};
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use uom::si::energy::kiloelectronvolt;
use uom::si::f64::{Energy, Length, Time};
use uom::si::length::millimeter;
use uom::si::time::nanosecond;
use winnow::ascii::{dec_int, dec_uint, float, line_ending, space0, space1, till_line_ending};
use winnow::combinator::{alt, empty, opt, preceded, separated, terminated};
use winnow::error::ContextError;
use winnow::token::take_till;
use winnow::Parser;

/// A step as found in a trace, tagged with the event it belongs to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraceStep {
    pub event: u64,
    pub step: StepEvent,
}

fn number(input: &mut &str) -> winnow::Result<f64> {
    float.parse_next(input)
}

fn point(input: &mut &str) -> winnow::Result<Point3> {
    let (x, y, z) = (number, preceded(space1, number), preceded(space1, number))
        .parse_next(input)?;
    let mm = Length::new::<millimeter>;

    Ok(Point3::new(mm(x), mm(y), mm(z)))
}

fn volume(input: &mut &str) -> winnow::Result<Volume> {
    alt((
        "sensitive".value(Volume::Sensitive),
        "front".value(Volume::Electrode(ElectrodeSide::Front)),
        "back".value(Volume::Electrode(ElectrodeSide::Back)),
        "other".value(Volume::Other),
    ))
    .parse_next(input)
}

fn particle(input: &mut &str) -> winnow::Result<ParticleCategory> {
    let (name, charge_number): (&str, i32) = (
        take_till(1.., (' ', '\t')),
        preceded(space1, dec_int),
    )
        .parse_next(input)?;

    Ok(ParticleCategory::from_name(name, charge_number))
}

fn record(input: &mut &str) -> winnow::Result<TraceStep> {
    let (event, edep, pre, post, particle, volume, time, track_id): (
        u64,
        f64,
        Point3,
        Point3,
        ParticleCategory,
        Volume,
        f64,
        u32,
    ) = (
        dec_uint,
        preceded(space1, number),
        preceded(space1, point),
        preceded(space1, point),
        preceded(space1, particle),
        preceded(space1, volume),
        preceded(space1, number),
        preceded(space1, dec_uint),
    )
        .parse_next(input)?;

    let step = StepEvent::builder()
        .energy_deposit(Energy::new::<kiloelectronvolt>(edep))
        .pre(pre)
        .post(post)
        .particle(particle)
        .volume(volume)
        .global_time(Time::new::<nanosecond>(time))
        .track_id(track_id)
        .build();

    Ok(TraceStep { event, step })
}

fn comment(input: &mut &str) -> winnow::Result<()> {
    ('#', till_line_ending).void().parse_next(input)
}

// As with any line-oriented format, a bad line is reported as a whole. The
// offending field is not worth a dedicated error.
fn line(input: &mut &str) -> winnow::Result<Option<TraceStep>> {
    preceded(
        space0,
        alt((
            comment.value(None),
            terminated(record, space0).map(Some),
            empty.value(None),
        )),
    )
    .parse_next(input)
}

/// The error type returned when parsing a [`StepTrace`] fails.
#[derive(Debug)]
pub struct ParseError {
    input: String,
    span: std::ops::Range<usize>,
}

impl ParseError {
    fn from_parse(error: winnow::error::ParseError<&str, ContextError>) -> Self {
        let input = error.input().to_string();
        let span = error.char_span();
        Self { input, span }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = annotate_snippets::Level::Error
            .title("invalid step record starting here")
            .snippet(
                annotate_snippets::Snippet::source(&self.input)
                    .fold(true)
                    .annotation(annotate_snippets::Level::Error.span(self.span.clone())),
            );
        let renderer = annotate_snippets::Renderer::plain();
        let rendered = renderer.render(message);
        rendered.fmt(f)
    }
}

impl std::error::Error for ParseError {}

/// Recorded steps grouped by event.
///
/// Events are replayed in ascending order of their recorded id, and steps
/// within an event in file order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepTrace {
    events: Vec<(u64, Vec<StepEvent>)>,
}

impl StepTrace {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(text.parse()?)
    }

    /// Recorded id of the `index`-th replayed event.
    pub fn recorded_id(&self, index: u64) -> Option<u64> {
        let index = usize::try_from(index).ok()?;
        self.events.get(index).map(|(id, _)| *id)
    }

    pub fn steps(&self, index: u64) -> &[StepEvent] {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.events.get(i))
            .map(|(_, steps)| steps.as_slice())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl FromIterator<TraceStep> for StepTrace {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = TraceStep>,
    {
        let mut grouped: BTreeMap<u64, Vec<StepEvent>> = BTreeMap::new();
        for TraceStep { event, step } in iter {
            grouped.entry(event).or_default().push(step);
        }

        Self {
            events: grouped.into_iter().collect(),
        }
    }
}

impl std::str::FromStr for StepTrace {
    type Err = ParseError;

    /// # Examples
    ///
    /// ```
    /// use sensim::trace::StepTrace;
    ///
    /// let trace: StepTrace = "\
    /// ## a single proton crossing the cell
    /// 3 20.0 0 -0.05 0 0 0.05 0 proton 1 sensitive 0.1 1
    /// "
    /// .parse()?;
    /// assert_eq!(trace.recorded_id(0), Some(3));
    /// assert_eq!(trace.steps(0).len(), 1);
    /// # Ok::<(), sensim::trace::ParseError>(())
    /// ```
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let steps: Vec<Option<TraceStep>> =
            terminated(separated(0.., line, line_ending), opt(line_ending))
                .parse(input)
                .map_err(ParseError::from_parse)?;

        Ok(steps.into_iter().flatten().collect())
    }
}

impl Transport for StepTrace {
    fn num_events(&self) -> u64 {
        self.events.len() as u64
    }

    fn event_id(&self, index: u64) -> u64 {
        self.recorded_id(index).unwrap_or(index)
    }

    /// Feed the recorded steps of one event. Once a track is killed, the rest
    /// of its recorded steps are dropped. Recorded times are shifted by `t0`.
    fn simulate_event<R, F>(&self, event_index: u64, t0: Time, _rng: &mut R, mut on_step: F)
    where
        R: Rng + ?Sized,
        F: FnMut(&StepEvent) -> TrackStatus,
    {
        let mut killed = HashSet::new();
        for step in self.steps(event_index) {
            if killed.contains(&step.track_id) {
                continue;
            }

            let shifted = StepEvent {
                global_time: step.global_time + t0,
                ..*step
            };
            if on_step(&shifted) == TrackStatus::StopAndKill {
                killed.insert(step.track_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const TRACE: &str = "\
# event edep pre post particle charge volume time track
1 0.0 0 -0.15 0 0 -0.05 0 proton 1 front 0.0 1
1 12.5 0 -0.05 0 0 0.05 0 proton 1 sensitive 0.1 1

0 1.5 0.1 0.0 0.2 0.1 0.02 0.2 e- -1 sensitive 0.2 2
0 0.0 0.1 0.05 0.2 0.1 0.06 0.2 e- -1 back 0.3 2
0 0.4 0.1 0.06 0.2 0.1 0.07 0.2 e- -1 back 0.4 2
0 2.0 0 0 0 0 0 0 alpha 2 other 1e3 3
";

    #[test]
    fn groups_by_event() {
        let trace: StepTrace = TRACE.parse().unwrap();
        assert_eq!(trace.num_events(), 2);
        assert_eq!(trace.recorded_id(0), Some(0));
        assert_eq!(trace.recorded_id(1), Some(1));
        assert_eq!(trace.recorded_id(2), None);
        assert_eq!(trace.steps(0).len(), 4);
        assert_eq!(trace.steps(1).len(), 2);
        assert!(trace.steps(5).is_empty());
    }

    #[test]
    fn fields() {
        let trace: StepTrace = TRACE.parse().unwrap();
        let step = trace.steps(1)[1];
        assert_eq!(step.volume, Volume::Sensitive);
        assert_eq!(step.particle, ParticleCategory::PrimaryBeam);
        assert_eq!(step.track_id, 1);
        assert!((step.energy_deposit.get::<kiloelectronvolt>() - 12.5).abs() < 1e-12);
        assert!((step.pre.y.get::<millimeter>() + 0.05).abs() < 1e-12);
        assert!((step.global_time.get::<nanosecond>() - 0.1).abs() < 1e-12);

        let electron = trace.steps(0)[1];
        assert_eq!(electron.particle, ParticleCategory::Electron);
        assert_eq!(electron.volume, Volume::Electrode(ElectrodeSide::Back));

        let alpha = trace.steps(0)[3];
        assert_eq!(alpha.volume, Volume::Other);
        assert!((alpha.global_time.get::<nanosecond>() - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn killed_tracks_are_dropped() {
        let trace: StepTrace = TRACE.parse().unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let mut seen = Vec::new();
        trace.simulate_event(0, Time::new::<nanosecond>(100.0), &mut rng, |step| {
            seen.push(*step);
            if step.volume.is_electrode() {
                TrackStatus::StopAndKill
            } else {
                TrackStatus::Alive
            }
        });

        // The second electrode step of track 2 never shows up.
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].track_id, 3);
        assert!((seen[0].global_time.get::<nanosecond>() - 100.2).abs() < 1e-9);
    }

    #[test]
    fn empty_input() {
        let trace: StepTrace = "".parse().unwrap();
        assert!(trace.is_empty());
        let trace: StepTrace = "# nothing\n\n".parse().unwrap();
        assert!(trace.is_empty());
    }

    #[test]
    fn crlf_line_endings() {
        let unix: StepTrace = TRACE.parse().unwrap();
        let windows: StepTrace = TRACE.replace('\n', "\r\n").parse().unwrap();
        assert_eq!(unix, windows);
    }

    #[test]
    fn bad_line() {
        let input = "0 1.0 0 0 0 0 0 0 proton 1 sensitive 0 1\n\
                     0 1.0 0 0 0 0 0 0 proton 1 nowhere 0 1\n";
        let err = input.parse::<StepTrace>().unwrap_err();
        assert!(err.to_string().contains("invalid step record"));
    }
}
