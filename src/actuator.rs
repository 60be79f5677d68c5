use crate::config::DroneConfig;
use log::{debug, info};
use std::io;
use std::net::UdpSocket;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("Error de IO con el dron: {0}")]
    Io(#[from] io::Error),

    #[error("Sin respuesta a '{command}' tras {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("El dron rechazó '{command}': {reply}")]
    Rejected { command: String, reply: String },

    #[error("'{command}' fuera de rango: {value}")]
    OutOfRange { command: &'static str, value: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipDirection {
    Left,
    Right,
    Forward,
    Back,
}

impl FlipDirection {
    pub fn as_char(&self) -> char {
        match self {
            FlipDirection::Left => 'l',
            FlipDirection::Right => 'r',
            FlipDirection::Forward => 'f',
            FlipDirection::Back => 'b',
        }
    }
}

/// Primitivas del vehículo. Cada una puede fallar por separado; quien llama
/// decide si el fallo es fatal.
pub trait Actuator {
    fn connect(&mut self) -> Result<(), ActuatorError>;
    fn takeoff(&mut self) -> Result<(), ActuatorError>;
    fn land(&mut self) -> Result<(), ActuatorError>;
    fn move_up(&mut self, cm: u32) -> Result<(), ActuatorError>;
    fn move_down(&mut self, cm: u32) -> Result<(), ActuatorError>;
    fn move_left(&mut self, cm: u32) -> Result<(), ActuatorError>;
    fn move_right(&mut self, cm: u32) -> Result<(), ActuatorError>;
    fn flip(&mut self, direction: FlipDirection) -> Result<(), ActuatorError>;
    /// Grados positivos = antihorario, negativos = horario
    fn rotate(&mut self, degrees: i32) -> Result<(), ActuatorError>;
}

const TELLO_MIN_MOVE_CM: u32 = 20;
const TELLO_MAX_MOVE_CM: u32 = 500;

/// Tello SDK: comandos de texto por UDP, el dron responde "ok" o "error ...".
/// Cada comando espera la respuesta como mucho `command_timeout`, así que
/// ningún comando (tampoco `land`) bloquea indefinidamente.
pub struct TelloActuator {
    socket: UdpSocket,
    timeout: Duration,
}

impl TelloActuator {
    pub fn new(config: &DroneConfig) -> Result<Self, ActuatorError> {
        if config.command_timeout_ms == 0 {
            return Err(ActuatorError::OutOfRange {
                command: "command_timeout_ms",
                value: 0,
            });
        }
        let socket = UdpSocket::bind(config.bind.as_str())?;
        socket.connect(config.address.as_str())?;
        let timeout = config.command_timeout();
        socket.set_read_timeout(Some(timeout))?;
        debug!("Socket Tello {} -> {}", socket.local_addr()?, config.address);
        Ok(Self { socket, timeout })
    }

    /// Descarta respuestas atrasadas de comandos que agotaron el timeout
    fn drain_stale_replies(&mut self) -> Result<(), ActuatorError> {
        self.socket.set_nonblocking(true)?;
        let mut buf = [0u8; 256];
        loop {
            match self.socket.recv(&mut buf) {
                Ok(n) => debug!(
                    "Respuesta atrasada descartada: {:?}",
                    String::from_utf8_lossy(&buf[..n])
                ),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // p.ej. ConnectionRefused por un ICMP previo: no hay nada que leer
                Err(_) => break,
            }
        }
        self.socket.set_nonblocking(false)?;
        Ok(())
    }

    fn send_command(&mut self, command: &str) -> Result<(), ActuatorError> {
        self.drain_stale_replies()?;
        debug!("→ {}", command);
        self.socket.send(command.as_bytes())?;

        let mut buf = [0u8; 256];
        let n = match self.socket.recv(&mut buf) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                ) =>
            {
                return Err(ActuatorError::Timeout {
                    command: command.to_string(),
                    timeout: self.timeout,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let reply = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        debug!("← {}", reply);
        if reply.eq_ignore_ascii_case("ok") {
            Ok(())
        } else {
            Err(ActuatorError::Rejected {
                command: command.to_string(),
                reply,
            })
        }
    }

    fn send_move(&mut self, verb: &'static str, cm: u32) -> Result<(), ActuatorError> {
        if !(TELLO_MIN_MOVE_CM..=TELLO_MAX_MOVE_CM).contains(&cm) {
            return Err(ActuatorError::OutOfRange {
                command: verb,
                value: cm as i64,
            });
        }
        self.send_command(&format!("{} {}", verb, cm))
    }
}

impl Actuator for TelloActuator {
    fn connect(&mut self) -> Result<(), ActuatorError> {
        // Entra en modo SDK
        self.send_command("command")
    }

    fn takeoff(&mut self) -> Result<(), ActuatorError> {
        self.send_command("takeoff")
    }

    fn land(&mut self) -> Result<(), ActuatorError> {
        self.send_command("land")
    }

    fn move_up(&mut self, cm: u32) -> Result<(), ActuatorError> {
        self.send_move("up", cm)
    }

    fn move_down(&mut self, cm: u32) -> Result<(), ActuatorError> {
        self.send_move("down", cm)
    }

    fn move_left(&mut self, cm: u32) -> Result<(), ActuatorError> {
        self.send_move("left", cm)
    }

    fn move_right(&mut self, cm: u32) -> Result<(), ActuatorError> {
        self.send_move("right", cm)
    }

    fn flip(&mut self, direction: FlipDirection) -> Result<(), ActuatorError> {
        self.send_command(&format!("flip {}", direction.as_char()))
    }

    fn rotate(&mut self, degrees: i32) -> Result<(), ActuatorError> {
        let amount = degrees.unsigned_abs();
        if !(1..=360).contains(&amount) {
            return Err(ActuatorError::OutOfRange {
                command: "rotate",
                value: degrees as i64,
            });
        }
        let verb = if degrees > 0 { "ccw" } else { "cw" };
        self.send_command(&format!("{} {}", verb, amount))
    }
}

/// Actuador sin vehículo: registra cada primitiva y siempre tiene éxito
#[derive(Debug, Default)]
pub struct DryRunActuator {
    commands: usize,
}

impl DryRunActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> usize {
        self.commands
    }

    fn log(&mut self, what: String) -> Result<(), ActuatorError> {
        self.commands += 1;
        info!("[dry-run] {}", what);
        Ok(())
    }
}

impl Actuator for DryRunActuator {
    fn connect(&mut self) -> Result<(), ActuatorError> {
        self.log("connect".to_string())
    }

    fn takeoff(&mut self) -> Result<(), ActuatorError> {
        self.log("takeoff".to_string())
    }

    fn land(&mut self) -> Result<(), ActuatorError> {
        self.log("land".to_string())
    }

    fn move_up(&mut self, cm: u32) -> Result<(), ActuatorError> {
        self.log(format!("up {}", cm))
    }

    fn move_down(&mut self, cm: u32) -> Result<(), ActuatorError> {
        self.log(format!("down {}", cm))
    }

    fn move_left(&mut self, cm: u32) -> Result<(), ActuatorError> {
        self.log(format!("left {}", cm))
    }

    fn move_right(&mut self, cm: u32) -> Result<(), ActuatorError> {
        self.log(format!("right {}", cm))
    }

    fn flip(&mut self, direction: FlipDirection) -> Result<(), ActuatorError> {
        self.log(format!("flip {}", direction.as_char()))
    }

    fn rotate(&mut self, degrees: i32) -> Result<(), ActuatorError> {
        self.log(format!("rotate {}", degrees))
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Actuador de prueba que apunta cada llamada en un log compartido y puede
    /// fallar en las primitivas indicadas
    pub struct RecordingActuator {
        calls: Arc<Mutex<Vec<String>>>,
        fail_on: Vec<&'static str>,
    }

    impl RecordingActuator {
        pub fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    calls: Arc::clone(&calls),
                    fail_on: Vec::new(),
                },
                calls,
            )
        }

        pub fn failing_on(mut self, primitive: &'static str) -> Self {
            self.fail_on.push(primitive);
            self
        }

        fn record(&mut self, primitive: &'static str, call: String) -> Result<(), ActuatorError> {
            self.calls.lock().unwrap().push(call.clone());
            if self.fail_on.contains(&primitive) {
                return Err(ActuatorError::Rejected {
                    command: call,
                    reply: "error".to_string(),
                });
            }
            Ok(())
        }
    }

    impl Actuator for RecordingActuator {
        fn connect(&mut self) -> Result<(), ActuatorError> {
            self.record("connect", "connect".to_string())
        }

        fn takeoff(&mut self) -> Result<(), ActuatorError> {
            self.record("takeoff", "takeoff".to_string())
        }

        fn land(&mut self) -> Result<(), ActuatorError> {
            self.record("land", "land".to_string())
        }

        fn move_up(&mut self, cm: u32) -> Result<(), ActuatorError> {
            self.record("move_up", format!("move_up({})", cm))
        }

        fn move_down(&mut self, cm: u32) -> Result<(), ActuatorError> {
            self.record("move_down", format!("move_down({})", cm))
        }

        fn move_left(&mut self, cm: u32) -> Result<(), ActuatorError> {
            self.record("move_left", format!("move_left({})", cm))
        }

        fn move_right(&mut self, cm: u32) -> Result<(), ActuatorError> {
            self.record("move_right", format!("move_right({})", cm))
        }

        fn flip(&mut self, direction: FlipDirection) -> Result<(), ActuatorError> {
            self.record("flip", format!("flip({})", direction.as_char()))
        }

        fn rotate(&mut self, degrees: i32) -> Result<(), ActuatorError> {
            self.record("rotate", format!("rotate({})", degrees))
        }
    }
}
