use crate::actuator::{Actuator, ActuatorError, FlipDirection};
use crate::types::Label;
use log::{info, warn};
use std::fmt;
use thiserror::Error;

pub const MOVE_DISTANCE_CM: u32 = 30;
pub const ROTATION_DEGREES: i32 = 180; // antihorario
pub const ROLL_FLIP: FlipDirection = FlipDirection::Left;

/// Una orden al dron por cada gesto conocido
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DroneCommand {
    MoveUp(u32),
    MoveDown(u32),
    MoveLeft(u32),
    MoveRight(u32),
    Flip(FlipDirection),
    Rotate(i32),
    /// Neutral: mantener posición, no se envía nada
    Hold,
}

impl DroneCommand {
    /// Tabla gesto → orden. `Unknown` no tiene orden.
    pub fn for_label(label: Label) -> Option<Self> {
        use DroneCommand::*;

        match label {
            Label::Up => Some(MoveUp(MOVE_DISTANCE_CM)),
            Label::Down => Some(MoveDown(MOVE_DISTANCE_CM)),
            Label::Left => Some(MoveLeft(MOVE_DISTANCE_CM)),
            Label::Right => Some(MoveRight(MOVE_DISTANCE_CM)),
            Label::Roll => Some(Flip(ROLL_FLIP)),
            Label::Rotate => Some(Rotate(ROTATION_DEGREES)),
            Label::Neutral => Some(Hold),
            Label::Unknown => None,
        }
    }

    pub fn execute<A: Actuator + ?Sized>(&self, drone: &mut A) -> Result<(), ActuatorError> {
        match *self {
            DroneCommand::MoveUp(cm) => drone.move_up(cm),
            DroneCommand::MoveDown(cm) => drone.move_down(cm),
            DroneCommand::MoveLeft(cm) => drone.move_left(cm),
            DroneCommand::MoveRight(cm) => drone.move_right(cm),
            DroneCommand::Flip(direction) => drone.flip(direction),
            DroneCommand::Rotate(degrees) => drone.rotate(degrees),
            DroneCommand::Hold => Ok(()),
        }
    }
}

impl fmt::Display for DroneCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DroneCommand::MoveUp(cm) => write!(f, "move_up({})", cm),
            DroneCommand::MoveDown(cm) => write!(f, "move_down({})", cm),
            DroneCommand::MoveLeft(cm) => write!(f, "move_left({})", cm),
            DroneCommand::MoveRight(cm) => write!(f, "move_right({})", cm),
            DroneCommand::Flip(direction) => write!(f, "flip({})", direction.as_char()),
            DroneCommand::Rotate(degrees) => write!(f, "rotate({})", degrees),
            DroneCommand::Hold => write!(f, "hold"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Executed(DroneCommand),
    Held,
    /// Gesto sin orden asociada: no se tocó el dron
    Ignored(Label),
}

#[derive(Error, Debug)]
#[error("Error ejecutando {command} para '{label}': {source}")]
pub struct DispatchError {
    pub label: Label,
    pub command: DroneCommand,
    #[source]
    pub source: ActuatorError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub executed: usize,
    pub held: usize,
    pub ignored: usize,
    pub failed: usize,
}

/// Traduce cada gesto predicho en una única orden al dron.
/// Un fallo del dron se devuelve como `DispatchError` para que quien llama lo
/// registre; nunca entra en pánico.
#[derive(Debug, Default)]
pub struct ActionDispatcher {
    stats: DispatchStats,
}

impl ActionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch<A: Actuator + ?Sized>(
        &mut self,
        drone: &mut A,
        label: Label,
    ) -> Result<DispatchOutcome, DispatchError> {
        let command = match DroneCommand::for_label(label) {
            Some(command) => command,
            None => {
                warn!("Acción desconocida: {}", label);
                self.stats.ignored += 1;
                return Ok(DispatchOutcome::Ignored(label));
            }
        };

        if command == DroneCommand::Hold {
            info!("Neutral detectado, manteniendo posición");
            self.stats.held += 1;
            return Ok(DispatchOutcome::Held);
        }

        match command.execute(drone) {
            Ok(()) => {
                info!("Acción ejecutada: {} -> {}", label, command);
                self.stats.executed += 1;
                Ok(DispatchOutcome::Executed(command))
            }
            Err(source) => {
                self.stats.failed += 1;
                Err(DispatchError {
                    label,
                    command,
                    source,
                })
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::recording::RecordingActuator;

    #[test]
    fn test_up_moves_up_once() {
        let (mut drone, calls) = RecordingActuator::new();
        let mut dispatcher = ActionDispatcher::new();

        let outcome = dispatcher.dispatch(&mut drone, Label::Up).unwrap();
        assert_eq!(outcome, DispatchOutcome::Executed(DroneCommand::MoveUp(30)));
        assert_eq!(*calls.lock().unwrap(), vec!["move_up(30)"]);
    }

    #[test]
    fn test_every_known_label_has_a_command() {
        for label in Label::KNOWN {
            assert!(DroneCommand::for_label(label).is_some(), "{}", label);
        }
        assert_eq!(DroneCommand::for_label(Label::Unknown), None);
    }

    #[test]
    fn test_command_table() {
        let (mut drone, calls) = RecordingActuator::new();
        let mut dispatcher = ActionDispatcher::new();

        for label in [Label::Down, Label::Left, Label::Right, Label::Roll, Label::Rotate] {
            dispatcher.dispatch(&mut drone, label).unwrap();
        }

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "move_down(30)",
                "move_left(30)",
                "move_right(30)",
                "flip(l)",
                "rotate(180)"
            ]
        );
        assert_eq!(dispatcher.stats().executed, 5);
    }

    #[test]
    fn test_bogus_label_touches_nothing() {
        let (mut drone, calls) = RecordingActuator::new();
        let mut dispatcher = ActionDispatcher::new();

        let outcome = dispatcher
            .dispatch(&mut drone, Label::parse("bogus"))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Ignored(Label::Unknown));
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(dispatcher.stats().ignored, 1);
    }

    #[test]
    fn test_neutral_holds_without_calls() {
        let (mut drone, calls) = RecordingActuator::new();
        let mut dispatcher = ActionDispatcher::new();

        let outcome = dispatcher.dispatch(&mut drone, Label::Neutral).unwrap();
        assert_eq!(outcome, DispatchOutcome::Held);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_actuator_failure_is_reported() {
        let (drone, calls) = RecordingActuator::new();
        let mut drone = drone.failing_on("flip");
        let mut dispatcher = ActionDispatcher::new();

        let err = dispatcher.dispatch(&mut drone, Label::Roll).unwrap_err();
        assert_eq!(err.label, Label::Roll);
        assert_eq!(err.command, DroneCommand::Flip(FlipDirection::Left));

        // El siguiente gesto se sigue ejecutando
        dispatcher.dispatch(&mut drone, Label::Up).unwrap();
        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(dispatcher.stats().failed, 1);
        assert_eq!(dispatcher.stats().executed, 1);
    }
}
