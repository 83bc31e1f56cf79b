//! The call-order protocol of a constrained time step.
//!
//! A time step is bracketed by `preprocess` and `postprocess`. In between, the outer integrator
//! and the constraint solver exchange data through a fixed set of operations. Every operation is
//! validated against the current [`Phase`] through a single [`transition`] table, and the two
//! producer/consumer hand-offs of a step (Lagrangian velocity interpolation and constraint force
//! spreading) are tracked with explicit [`Readiness`] values.
use crate::kinematics::PositionUpdateRule;
use log::{debug, warn};
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// The phase of the current time step, i.e. the last successful protocol operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Preprocessed,
    VelocityInterpolated,
    PositionAdvanced,
    ForceSet,
    ForceConsumed,
    VelocitySet,
    ForceSpread,
    Postprocessed,
}

impl Phase {
    /// Whether the phase lies between `preprocess` and `postprocess`.
    pub fn is_in_step(&self) -> bool {
        !matches!(self, Phase::Idle | Phase::Postprocessed)
    }
}

/// Operations subject to protocol validation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ProtocolEvent {
    Preprocess,
    RequestVelocityInterpolation,
    InterpolateVelocity,
    GetInterpolatedVelocity,
    AdvancePositions(PositionUpdateRule),
    SetConstraintForce,
    GetConstraintForce,
    ComputeGeneralizedForce,
    SetRigidBodyVelocity,
    SpreadForce,
    Postprocess,
}

impl Display for ProtocolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolEvent::Preprocess => write!(f, "preprocess_integrate_data"),
            ProtocolEvent::RequestVelocityInterpolation => write!(f, "request_velocity_interpolation"),
            ProtocolEvent::InterpolateVelocity => write!(f, "interpolate_velocity"),
            ProtocolEvent::GetInterpolatedVelocity => write!(f, "get_interpolated_velocity"),
            ProtocolEvent::AdvancePositions(rule) => write!(f, "advance positions ({rule})"),
            ProtocolEvent::SetConstraintForce => write!(f, "set_constraint_force"),
            ProtocolEvent::GetConstraintForce => write!(f, "get_constraint_force"),
            ProtocolEvent::ComputeGeneralizedForce => write!(f, "compute_net_rigid_generalized_force"),
            ProtocolEvent::SetRigidBodyVelocity => write!(f, "set_rigid_body_velocity"),
            ProtocolEvent::SpreadForce => write!(f, "spread_force"),
            ProtocolEvent::Postprocess => write!(f, "postprocess_integrate_data"),
        }
    }
}

/// The two data hand-offs of a time step.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ReadinessFlag {
    /// Produced by a velocity interpolation request, consumed by velocity interpolation.
    LagrangianVelocity,
    /// Produced by setting the constraint force, consumed by force spreading.
    ConstraintForce,
}

impl Display for ReadinessFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessFlag::LagrangianVelocity => write!(f, "Lagrangian velocity"),
            ReadinessFlag::ConstraintForce => write!(f, "constraint force"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Readiness {
    Empty,
    Ready,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TimeLevel {
    Current,
    Half,
    New,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TimestepWindow {
    pub current: f64,
    pub half: f64,
    pub new: f64,
}

impl TimestepWindow {
    pub fn new(current: f64, new: f64) -> Self {
        Self {
            current,
            half: 0.5 * (current + new),
            new,
        }
    }

    pub fn dt(&self) -> f64 {
        self.new - self.current
    }

    pub fn time(&self, level: TimeLevel) -> f64 {
        match level {
            TimeLevel::Current => self.current,
            TimeLevel::Half => self.half,
            TimeLevel::New => self.new,
        }
    }

    /// Finds the first of the given levels whose time equals `time` up to a relative tolerance.
    pub fn match_time(&self, time: f64, levels: &[TimeLevel], epsilon: f64) -> Option<TimeLevel> {
        levels
            .iter()
            .copied()
            .find(|&level| times_equal(time, self.time(level), epsilon))
    }
}

impl Display for TimestepWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[current = {}, half = {}, new = {}]", self.current, self.half, self.new)
    }
}

fn times_equal(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() <= epsilon * f64::max(1.0, a.abs().max(b.abs()))
}

/// Fatal violations of the time step protocol.
///
/// These indicate programming or integration errors. Continuing after a violation would produce
/// silently wrong physics.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolViolation {
    /// An operation that requires an active time step was called outside of one.
    NotInStep { event: ProtocolEvent },
    AlreadyPreprocessed,
    UnsupportedTimeStepping { rule: PositionUpdateRule },
    /// A midpoint step requires the predicted half-time state of a forward Euler step.
    MidpointWithoutPrediction,
    /// A readiness flag was produced again before it was consumed.
    DuplicateProduction { flag: ReadinessFlag },
    TimeMismatch {
        operation: ProtocolEvent,
        time: f64,
        window: TimestepWindow,
    },
    SubVectorCountMismatch { expected: usize, found: usize },
    StructureOutOfRange { index: usize, count: usize },
    /// Attempt to set the rigid velocity of a structure whose velocity is prescribed.
    PrescribedVelocityOverride { index: usize },
    /// The operation is not accepted in the current phase of the step.
    IllegalTransition { from: Phase, event: ProtocolEvent },
    /// The step was closed while a produced readiness flag was still waiting to be consumed.
    UnconsumedProduction { flag: ReadinessFlag },
}

impl Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolViolation::NotInStep { event } => {
                write!(f, "{event} called outside of a time step.")
            }
            ProtocolViolation::AlreadyPreprocessed => {
                write!(f, "preprocess_integrate_data called twice without postprocess_integrate_data.")
            }
            ProtocolViolation::UnsupportedTimeStepping { rule } => write!(
                f,
                "The {rule} rule is not supported for position updates of rigid structures. \
                 Only the midpoint rule is supported."
            ),
            ProtocolViolation::MidpointWithoutPrediction => {
                write!(f, "Midpoint step requires a preceding forward Euler step in the same time step.")
            }
            ProtocolViolation::DuplicateProduction { flag } => {
                write!(f, "The {flag} was produced twice without being consumed.")
            }
            ProtocolViolation::TimeMismatch { operation, time, window } => {
                write!(f, "{operation} called with time {time}, which does not match the time step {window}.")
            }
            ProtocolViolation::SubVectorCountMismatch { expected, found } => write!(
                f,
                "Composite vector has {found} sub-vectors, but there are {expected} structures."
            ),
            ProtocolViolation::StructureOutOfRange { index, count } => {
                write!(f, "Structure index {index} out of range ({count} structures).")
            }
            ProtocolViolation::PrescribedVelocityOverride { index } => {
                write!(f, "The velocity of structure {index} is prescribed and can not be set.")
            }
            ProtocolViolation::IllegalTransition { from, event } => {
                write!(f, "{event} is not allowed in phase {from:?}.")
            }
            ProtocolViolation::UnconsumedProduction { flag } => {
                write!(f, "The {flag} was produced but never consumed.")
            }
        }
    }
}

impl Error for ProtocolViolation {}

/// The transition table of the protocol.
///
/// Outside of a time step only `Preprocess` is accepted. A step first predicts positions
/// (`Preprocessed`, `VelocityInterpolated`, `PositionAdvanced`) and then runs the constraint
/// solve (`ForceSet`, `ForceConsumed`, `VelocitySet`, `ForceSpread`), whose operations may repeat
/// in any order. The forward Euler prediction is only accepted before the positions have been
/// advanced, while the midpoint update may also follow the constraint solve, which supplies the
/// half-time rigid velocity. Interpolation during the solve or after the positions have been
/// advanced leaves the phase unchanged, as do queries and requests.
pub fn transition(phase: Phase, event: ProtocolEvent) -> Result<Phase, ProtocolViolation> {
    use Phase::*;
    use ProtocolEvent::*;
    if !phase.is_in_step() {
        return match event {
            Preprocess => Ok(Preprocessed),
            event => Err(ProtocolViolation::NotInStep { event }),
        };
    }

    let solving = matches!(phase, ForceSet | ForceConsumed | VelocitySet | ForceSpread);
    let next = match event {
        Preprocess => return Err(ProtocolViolation::AlreadyPreprocessed),
        AdvancePositions(PositionUpdateRule::Trapezoidal) => {
            return Err(ProtocolViolation::UnsupportedTimeStepping {
                rule: PositionUpdateRule::Trapezoidal,
            })
        }
        InterpolateVelocity => match phase {
            Preprocessed | VelocityInterpolated => Some(VelocityInterpolated),
            _ => Some(phase),
        },
        AdvancePositions(PositionUpdateRule::ForwardEuler) => {
            matches!(phase, Preprocessed | VelocityInterpolated).then_some(PositionAdvanced)
        }
        AdvancePositions(PositionUpdateRule::Midpoint) => {
            (phase != ForceSet).then_some(PositionAdvanced)
        }
        SetConstraintForce => Some(ForceSet),
        ComputeGeneralizedForce => solving.then_some(ForceConsumed),
        SetRigidBodyVelocity => (solving || phase == PositionAdvanced).then_some(VelocitySet),
        SpreadForce => (solving || phase == PositionAdvanced).then_some(ForceSpread),
        Postprocess => {
            matches!(phase, PositionAdvanced | ForceConsumed | VelocitySet | ForceSpread).then_some(Postprocessed)
        }
        RequestVelocityInterpolation | GetInterpolatedVelocity | GetConstraintForce => Some(phase),
    };
    next.ok_or(ProtocolViolation::IllegalTransition { from: phase, event })
}

/// Tracks the protocol state of all structures of a coordinator.
#[derive(Debug, Clone)]
pub struct TransferProtocol {
    phase: Phase,
    window: Option<TimestepWindow>,
    velocity_request: Readiness,
    constraint_force: Readiness,
    predicted: bool,
    time_epsilon: f64,
}

impl TransferProtocol {
    pub fn new(time_epsilon: f64) -> Self {
        Self {
            phase: Phase::Idle,
            window: None,
            velocity_request: Readiness::Empty,
            constraint_force: Readiness::Empty,
            predicted: false,
            time_epsilon,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The time window of the active step, if any.
    pub fn window(&self) -> Option<TimestepWindow> {
        self.window
    }

    pub fn readiness(&self, flag: ReadinessFlag) -> Readiness {
        match flag {
            ReadinessFlag::LagrangianVelocity => self.velocity_request,
            ReadinessFlag::ConstraintForce => self.constraint_force,
        }
    }

    /// Validates `event` and commits the resulting phase.
    fn apply(&mut self, event: ProtocolEvent) -> Result<TimestepWindow, ProtocolViolation> {
        let next = transition(self.phase, event)?;
        let window = self.window.ok_or(ProtocolViolation::NotInStep { event })?;
        self.phase = next;
        Ok(window)
    }

    /// Checks that `event` is legal without changing the phase.
    pub fn check(&self, event: ProtocolEvent) -> Result<TimestepWindow, ProtocolViolation> {
        transition(self.phase, event)?;
        self.window.ok_or(ProtocolViolation::NotInStep { event })
    }

    pub fn begin_step(&mut self, current_time: f64, new_time: f64) -> Result<TimestepWindow, ProtocolViolation> {
        self.phase = transition(self.phase, ProtocolEvent::Preprocess)?;
        let window = TimestepWindow::new(current_time, new_time);
        self.window = Some(window);
        self.velocity_request = Readiness::Empty;
        self.constraint_force = Readiness::Empty;
        self.predicted = false;
        debug!("began time step {}", window);
        Ok(window)
    }

    /// Closes the step.
    ///
    /// A constraint force that was set but never spread is an error, an unconsumed velocity
    /// request only produces a warning.
    pub fn end_step(&mut self) -> Result<TimestepWindow, ProtocolViolation> {
        self.check(ProtocolEvent::Postprocess)?;
        if self.constraint_force == Readiness::Ready {
            return Err(ProtocolViolation::UnconsumedProduction {
                flag: ReadinessFlag::ConstraintForce,
            });
        }
        let window = self.apply(ProtocolEvent::Postprocess)?;
        if self.velocity_request == Readiness::Ready {
            warn!(
                "The {} was produced but never consumed during time step {}.",
                ReadinessFlag::LagrangianVelocity,
                window
            );
        }
        self.window = None;
        self.velocity_request = Readiness::Empty;
        self.constraint_force = Readiness::Empty;
        self.predicted = false;
        debug!("ended time step {}", window);
        Ok(window)
    }

    fn expect_time(
        &self,
        event: ProtocolEvent,
        window: TimestepWindow,
        time: f64,
        levels: &[TimeLevel],
    ) -> Result<TimeLevel, ProtocolViolation> {
        window
            .match_time(time, levels, self.time_epsilon)
            .ok_or(ProtocolViolation::TimeMismatch {
                operation: event,
                time,
                window,
            })
    }

    /// Produces the Lagrangian velocity flag. `time` must be the half time of the step.
    pub fn request_velocity_interpolation(&mut self, time: f64) -> Result<(), ProtocolViolation> {
        let event = ProtocolEvent::RequestVelocityInterpolation;
        let window = self.check(event)?;
        self.expect_time(event, window, time, &[TimeLevel::Half])?;
        if self.velocity_request == Readiness::Ready {
            return Err(ProtocolViolation::DuplicateProduction {
                flag: ReadinessFlag::LagrangianVelocity,
            });
        }
        self.velocity_request = Readiness::Ready;
        Ok(())
    }

    /// Consumes the Lagrangian velocity flag.
    ///
    /// Returns `false` without changing the phase if the flag was not produced, in which case the
    /// interpolation must be skipped.
    pub fn consume_velocity_request(&mut self) -> Result<bool, ProtocolViolation> {
        let event = ProtocolEvent::InterpolateVelocity;
        self.check(event)?;
        if self.velocity_request == Readiness::Empty {
            debug!("skipping velocity interpolation, no interpolation was requested");
            return Ok(false);
        }
        self.apply(event)?;
        self.velocity_request = Readiness::Empty;
        Ok(true)
    }

    /// Checks that the constraint force can be produced at `time` without producing it.
    ///
    /// Returns the time level that `time` refers to, which must be the current or new time.
    pub fn check_constraint_force(&self, time: f64) -> Result<TimeLevel, ProtocolViolation> {
        let event = ProtocolEvent::SetConstraintForce;
        let window = self.check(event)?;
        let level = self.expect_time(event, window, time, &[TimeLevel::Current, TimeLevel::New])?;
        if self.constraint_force == Readiness::Ready {
            return Err(ProtocolViolation::DuplicateProduction {
                flag: ReadinessFlag::ConstraintForce,
            });
        }
        Ok(level)
    }

    /// Produces the constraint force flag, see [`Self::check_constraint_force`].
    pub fn produce_constraint_force(&mut self, time: f64) -> Result<TimeLevel, ProtocolViolation> {
        let level = self.check_constraint_force(time)?;
        self.apply(ProtocolEvent::SetConstraintForce)?;
        self.constraint_force = Readiness::Ready;
        Ok(level)
    }

    /// Consumes the constraint force flag, see [`Self::consume_velocity_request`].
    ///
    /// Skipping only requires an active step. A pending force can only be spread once the
    /// constraint solve has started.
    pub fn consume_constraint_force(&mut self) -> Result<bool, ProtocolViolation> {
        let event = ProtocolEvent::SpreadForce;
        if self.constraint_force == Readiness::Empty {
            self.window.ok_or(ProtocolViolation::NotInStep { event })?;
            debug!("skipping force spreading, no constraint force was set");
            return Ok(false);
        }
        self.apply(event)?;
        self.constraint_force = Readiness::Empty;
        Ok(true)
    }

    /// Validates a position update with the given rule.
    pub fn advance_positions(&mut self, rule: PositionUpdateRule) -> Result<TimestepWindow, ProtocolViolation> {
        let event = ProtocolEvent::AdvancePositions(rule);
        self.check(event)?;
        if rule == PositionUpdateRule::Midpoint && !self.predicted {
            return Err(ProtocolViolation::MidpointWithoutPrediction);
        }
        let window = self.apply(event)?;
        if rule == PositionUpdateRule::ForwardEuler {
            self.predicted = true;
        }
        Ok(window)
    }

    /// Whether the half-time state has been predicted by a forward Euler step.
    pub fn is_predicted(&self) -> bool {
        self.predicted
    }

    /// Validates a velocity query at `time`, which must be the half time of the step.
    pub fn interpolated_velocity_query(&self, time: f64) -> Result<(), ProtocolViolation> {
        let event = ProtocolEvent::GetInterpolatedVelocity;
        let window = self.check(event)?;
        self.expect_time(event, window, time, &[TimeLevel::Half])?;
        Ok(())
    }

    /// The time level of a constraint force query, or `None` if `time` is neither the current nor
    /// the new time of the step.
    pub fn constraint_force_query(&self, time: f64) -> Result<Option<TimeLevel>, ProtocolViolation> {
        let window = self.check(ProtocolEvent::GetConstraintForce)?;
        Ok(window.match_time(time, &[TimeLevel::Current, TimeLevel::New], self.time_epsilon))
    }

    /// Validates and commits an operation without time or readiness requirements.
    pub fn record(&mut self, event: ProtocolEvent) -> Result<TimestepWindow, ProtocolViolation> {
        self.apply(event)
    }
}
