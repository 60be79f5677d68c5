use crate::actuator::{Actuator, ActuatorError};
use crate::classifier::{Classifier, GestureModel};
use crate::dispatcher::{ActionDispatcher, DispatchOutcome, DispatchStats};
use crate::features::FeatureNormalizer;
use crate::session_log::SessionRecorder;
use crate::transport::{LineSource, TransportError};
use crate::windower::Windower;
use crossbeam_channel::Receiver;
use log::{error, info, warn};
use thiserror::Error;

/// Fases del bucle de sesión. `Landing` es terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Armed,
    WaitingForStart,
    Collecting,
    Classifying,
    Dispatching,
    Resetting,
    Landing,
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("No se pudo conectar con el dron: {0}")]
    Connect(#[source] ActuatorError),

    #[error("Falló el despegue: {0}")]
    Takeoff(#[source] ActuatorError),

    #[error("Error fatal de transporte en {phase:?}: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: TransportError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Interrupted,
    TransportFailed,
}

/// Resumen de una ejecución terminada
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub sessions: usize,
    /// Fase en la que se salió del bucle
    pub exit_phase: Phase,
    pub reason: ExitReason,
    /// `land` respondió ok
    pub landed: bool,
    pub dispatch: DispatchStats,
}

/// Dueño exclusivo del dron durante toda la ejecución.
///
/// `run` consume el controlador: despega una sola vez, procesa sesiones hasta
/// que el transporte falla o llega una interrupción, e intenta aterrizar
/// exactamente una vez. Si el controlador se destruye con el dron en el aire
/// (p.ej. un pánico dentro del bucle), `Drop` intenta el aterrizaje.
///
/// Con `with_shutdown` el controlador consulta además el canal de apagado en
/// los puntos donde no lee del transporte: antes de despegar y antes de
/// enviar cada orden.
pub struct SessionController<A: Actuator, M: GestureModel> {
    drone: A,
    shutdown: Option<Receiver<()>>,
    classifier: Classifier<M>,
    normalizer: FeatureNormalizer,
    windower: Windower,
    dispatcher: ActionDispatcher,
    recorder: Option<SessionRecorder>,
    phase: Phase,
    airborne: bool,
    land_attempted: bool,
    sessions: usize,
}

impl<A: Actuator, M: GestureModel> SessionController<A, M> {
    pub fn new(drone: A, classifier: Classifier<M>, normalizer: FeatureNormalizer) -> Self {
        Self {
            drone,
            shutdown: None,
            classifier,
            normalizer,
            windower: Windower::new(),
            dispatcher: ActionDispatcher::new(),
            recorder: None,
            phase: Phase::Idle,
            airborne: false,
            land_attempted: false,
            sessions: 0,
        }
    }

    /// Guarda las muestras crudas de cada sesión en un CSV
    pub fn with_session_log(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Canal de apagado del operador (el mismo que alimenta Ctrl+C)
    pub fn with_shutdown(mut self, shutdown: Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn run<S>(mut self, source: &mut S) -> Result<RunReport, ControllerError>
    where
        S: LineSource + ?Sized,
    {
        if !self.launch()? {
            info!("Interrupción recibida antes del despegue, saliendo sin volar");
            return Ok(RunReport {
                sessions: 0,
                exit_phase: self.phase,
                reason: ExitReason::Interrupted,
                landed: false,
                dispatch: self.dispatcher.stats(),
            });
        }

        let cause = loop {
            if let Err(e) = self.run_once(source) {
                break e;
            }
        };

        let exit_phase = self.phase;
        match &cause {
            TransportError::Interrupted => {
                info!("Interrupción recibida en {:?}, aterrizando...", exit_phase)
            }
            e => error!("Error de comunicación en {:?}: {}", exit_phase, e),
        }

        let landed = self.land_once();
        let report = RunReport {
            sessions: self.sessions,
            exit_phase,
            reason: match cause {
                TransportError::Interrupted => ExitReason::Interrupted,
                _ => ExitReason::TransportFailed,
            },
            landed,
            dispatch: self.dispatcher.stats(),
        };
        info!("Fin de la ejecución: {:?}", report);

        match cause {
            TransportError::Interrupted => Ok(report),
            source => Err(ControllerError::Transport {
                phase: exit_phase,
                source,
            }),
        }
    }

    /// Conecta y despega. Devuelve false si llegó una interrupción antes del
    /// despegue: en ese caso no se envía `takeoff`.
    /// Si el despegue falla el estado del dron es incierto, así que se intenta
    /// aterrizar antes de devolver el error.
    fn launch(&mut self) -> Result<bool, ControllerError> {
        if self.shutdown_requested() {
            return Ok(false);
        }
        self.drone.connect().map_err(ControllerError::Connect)?;
        info!("Conectado al dron");

        // connect puede tardar hasta el timeout del comando
        if self.shutdown_requested() {
            return Ok(false);
        }

        self.airborne = true;
        if let Err(e) = self.drone.takeoff() {
            error!("Falló el despegue: {}", e);
            self.land_once();
            return Err(ControllerError::Takeoff(e));
        }

        self.phase = Phase::Armed;
        info!("Dron en el aire");
        Ok(true)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map_or(false, |shutdown| shutdown.try_recv().is_ok())
    }

    /// Una vuelta completa: START → END → clasificar → despachar → reset
    fn run_once<S>(&mut self, source: &mut S) -> Result<(), TransportError>
    where
        S: LineSource + ?Sized,
    {
        self.phase = Phase::WaitingForStart;
        info!("Esperando señal START del ESP32...");
        self.windower.wait_for_start(source)?;

        self.phase = Phase::Collecting;
        let session = match self.recorder.as_mut() {
            Some(recorder) => self.windower.collect(source, recorder)?,
            None => self.windower.collect(source, &mut ())?,
        };

        self.phase = Phase::Classifying;
        let features = self.normalizer.normalize(&session);
        let label = self.classifier.predict(&features);
        info!(
            "Gesto predicho: {} ({} muestras, {} usadas)",
            label,
            session.len(),
            features.rows_used()
        );

        self.phase = Phase::Dispatching;
        if self.shutdown_requested() {
            return Err(TransportError::Interrupted);
        }
        match self.dispatcher.dispatch(&mut self.drone, label) {
            Ok(DispatchOutcome::Ignored(_)) => {}
            Ok(outcome) => log::debug!("Despacho: {:?}", outcome),
            Err(e) => error!("{}", e),
        }

        self.phase = Phase::Resetting;
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.reset() {
                warn!("No se pudo reiniciar {:?}: {}", recorder.path(), e);
            }
        }
        self.sessions += 1;
        Ok(())
    }

    /// Devuelve true si `land` respondió ok. Nunca envía un segundo `land`.
    fn land_once(&mut self) -> bool {
        if !self.airborne || self.land_attempted {
            return false;
        }
        self.land_attempted = true;
        self.phase = Phase::Landing;

        match self.drone.land() {
            Ok(()) => {
                info!("El dron aterrizó correctamente");
                true
            }
            Err(e) => {
                error!("Error al aterrizar el dron: {}", e);
                false
            }
        }
    }
}

impl<A: Actuator, M: GestureModel> Drop for SessionController<A, M> {
    fn drop(&mut self) {
        if self.airborne && !self.land_attempted {
            warn!("Controlador destruido con el dron en el aire");
            self.land_once();
        }
    }
}
