use crate::transport::{LineSource, TransportError};
use crate::types::{Sample, Session, END_MARKER, START_MARKER};
use log::{debug, info, trace};

/// Recibe cada muestra aceptada mientras se captura una sesión
pub trait SampleSink {
    fn on_sample(&mut self, sample: &Sample);
}

impl SampleSink for () {
    fn on_sample(&mut self, _sample: &Sample) {}
}

impl SampleSink for Vec<Sample> {
    fn on_sample(&mut self, sample: &Sample) {
        self.push(*sample);
    }
}

/// Estados del framing START/END
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Descartando todo hasta ver START
    WaitingForStart,
    /// Acumulando muestras hasta ver END
    Collecting,
}

/// Contadores de líneas descartadas (diagnóstico, no afectan a la sesión)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    pub discarded_before_start: usize,
    pub malformed: usize,
    pub undecodable: usize,
}

/// Trocea el stream de líneas del ESP32 en sesiones START..END.
///
/// Ninguna de las dos fases tiene timeout: se bloquea hasta ver el marcador
/// o hasta que el transporte falle, y ese error se devuelve tal cual.
pub struct Windower {
    state: State,
    stats: WindowStats,
}

impl Windower {
    pub fn new() -> Self {
        Self {
            state: State::WaitingForStart,
            stats: WindowStats::default(),
        }
    }

    /// Fase de armado: descarta líneas hasta una que sea exactamente `START`
    pub fn wait_for_start<S>(&mut self, source: &mut S) -> Result<(), TransportError>
    where
        S: LineSource + ?Sized,
    {
        self.state = State::WaitingForStart;
        self.stats = WindowStats::default();

        loop {
            match source.read_line() {
                Ok(line) if line == START_MARKER => {
                    info!("START detectado, capturando datos IMU...");
                    self.state = State::Collecting;
                    return Ok(());
                }
                Ok(line) => {
                    trace!("Descartada antes de START: {:?}", line);
                    self.stats.discarded_before_start += 1;
                }
                Err(e) if e.is_skippable() => {
                    self.stats.undecodable += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fase de captura: acumula muestras válidas hasta `END`.
    /// Las líneas mal formadas se ignoran sin cortar la captura.
    pub fn collect<S, K>(&mut self, source: &mut S, sink: &mut K) -> Result<Session, TransportError>
    where
        S: LineSource + ?Sized,
        K: SampleSink + ?Sized,
    {
        let mut session = Session::new();

        loop {
            match source.read_line() {
                Ok(line) if line == END_MARKER => {
                    info!("END detectado: {} muestras", session.len());
                    debug!("Líneas descartadas: {:?}", self.stats);
                    self.state = State::WaitingForStart;
                    return Ok(session);
                }
                Ok(line) => match Sample::parse_line(&line) {
                    Some(sample) => {
                        trace!("Dato recibido: {}", line);
                        sink.on_sample(&sample);
                        session.push(sample);
                    }
                    None => {
                        trace!("Línea mal formada ignorada: {:?}", line);
                        self.stats.malformed += 1;
                    }
                },
                Err(e) if e.is_skippable() => {
                    self.stats.undecodable += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Ambas fases seguidas, sin sink
    pub fn await_session<S>(&mut self, source: &mut S) -> Result<Session, TransportError>
    where
        S: LineSource + ?Sized,
    {
        self.wait_for_start(source)?;
        self.collect(source, &mut ())
    }

    pub fn is_collecting(&self) -> bool {
        self.state == State::Collecting
    }

    pub fn stats(&self) -> WindowStats {
        self.stats
    }
}

impl Default for Windower {
    fn default() -> Self {
        Self::new()
    }
}
