use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use log::{debug, info, warn};
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, BufRead, BufReader};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    /// Línea que no es UTF-8 válido o supera `MAX_LINE_BYTES`. Se descarta y
    /// se sigue leyendo.
    #[error("Línea no decodificable ({bytes} bytes)")]
    Decode { bytes: usize },

    #[error("El stream de datos se cerró")]
    Closed,

    #[error("Error de IO en el transporte: {0}")]
    Io(#[from] io::Error),

    #[error("Error en el puerto serie: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Interrumpido por el operador")]
    Interrupted,
}

impl TransportError {
    /// Errores que sólo afectan a una línea
    pub fn is_skippable(&self) -> bool {
        matches!(self, TransportError::Decode { .. })
    }

    /// Errores tras los cuales el stream ya no sirve
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Closed | TransportError::Io(_) | TransportError::Serial(_)
        )
    }
}

/// Fuente de líneas de texto. `read_line` bloquea hasta tener una línea
/// completa, sin límite de tiempo: el operador marca el ritmo con START/END.
pub trait LineSource {
    fn read_line(&mut self) -> Result<String, TransportError>;
}

impl<S: LineSource + ?Sized> LineSource for Box<S> {
    fn read_line(&mut self) -> Result<String, TransportError> {
        (**self).read_line()
    }
}

/// Longitud máxima de una línea; una muestra ocupa menos de 100 bytes
pub const MAX_LINE_BYTES: usize = 4096;

/// Lector de líneas sobre cualquier `BufRead` (puerto serie, fichero, stdin).
///
/// Los timeouts de lectura del puerto no terminan la línea: los bytes ya
/// leídos se conservan y se vuelve a esperar.
pub struct ReaderLineSource<R> {
    reader: R,
    pending: Vec<u8>,
}

impl<R: BufRead> ReaderLineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::with_capacity(128),
        }
    }

    fn decode(raw: Vec<u8>) -> Result<String, TransportError> {
        let bytes = raw.len();
        String::from_utf8(raw)
            .map(|line| line.trim().to_string())
            .map_err(|_| TransportError::Decode { bytes })
    }
}

impl<R: BufRead> LineSource for ReaderLineSource<R> {
    fn read_line(&mut self) -> Result<String, TransportError> {
        loop {
            let available = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e.into()),
            };

            if available.is_empty() {
                if self.pending.is_empty() {
                    return Err(TransportError::Closed);
                }
                return Self::decode(std::mem::take(&mut self.pending));
            }

            let newline = available.iter().position(|&b| b == b'\n');
            let used = newline.map_or(available.len(), |i| i + 1);
            self.pending.extend_from_slice(&available[..used]);
            self.reader.consume(used);

            // Ruido sin saltos de línea: se descarta como línea ilegible
            if self.pending.len() > MAX_LINE_BYTES {
                let bytes = self.pending.len();
                self.pending.clear();
                return Err(TransportError::Decode { bytes });
            }
            if newline.is_some() {
                return Self::decode(std::mem::take(&mut self.pending));
            }
        }
    }
}

pub type SerialLineSource = ReaderLineSource<BufReader<Box<dyn SerialPort>>>;

/// Abre el puerto serie del ESP32 y descarta lo que hubiera en el buffer
pub fn open_serial(
    port: &str,
    baud_rate: u32,
    read_timeout: Duration,
) -> Result<SerialLineSource, TransportError> {
    let serial = serialport::new(port, baud_rate)
        .timeout(read_timeout)
        .open()?;
    serial.clear(ClearBuffer::Input)?;
    info!("Conectado al ESP32 en {} ({} baudios)", port, baud_rate);
    Ok(ReaderLineSource::new(BufReader::new(serial)))
}

pub type LineResult = Result<String, TransportError>;

/// Lanza un hilo que lee `source` y reenvía cada línea por un canal acotado.
/// El hilo termina tras reenviar un error fatal o cuando se cierra el receptor.
pub fn spawn_reader<S>(mut source: S, capacity: usize) -> Receiver<LineResult>
where
    S: LineSource + Send + 'static,
{
    let (tx, rx) = bounded::<LineResult>(capacity);

    std::thread::spawn(move || loop {
        let result = source.read_line();
        let fatal = matches!(&result, Err(e) if e.is_fatal());
        if let Err(e) = &result {
            if fatal {
                warn!("Lector del transporte detenido: {}", e);
            }
        }
        if tx.send(result).is_err() || fatal {
            debug!("Hilo lector terminado");
            break;
        }
    });

    rx
}

/// Canal de apagado: el handler de Ctrl+C envía, el bucle de sesión recibe
pub fn shutdown_channel() -> (Sender<()>, Receiver<()>) {
    bounded(1)
}

/// Líneas reenviadas por `spawn_reader`, compitiendo con la señal de apagado.
/// Una petición de apagado pendiente siempre gana a una línea pendiente, así la
/// interrupción llega aunque el lector esté bloqueado o el canal lleno.
pub struct ChannelLineSource {
    lines: Receiver<LineResult>,
    shutdown: Receiver<()>,
}

impl ChannelLineSource {
    pub fn new(lines: Receiver<LineResult>, shutdown: Receiver<()>) -> Self {
        Self { lines, shutdown }
    }
}

impl LineSource for ChannelLineSource {
    fn read_line(&mut self) -> Result<String, TransportError> {
        loop {
            if self.shutdown.try_recv().is_ok() {
                return Err(TransportError::Interrupted);
            }

            let shutdown_gone = select! {
                recv(self.shutdown) -> msg => match msg {
                    Ok(()) => return Err(TransportError::Interrupted),
                    Err(_) => true,
                },
                recv(self.lines) -> msg => {
                    return msg.unwrap_or(Err(TransportError::Closed));
                }
            };

            // Nadie puede pedir apagado ya: esperar sólo líneas
            if shutdown_gone {
                self.shutdown = never();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    #[test]
    fn test_reader_strips_line_endings() {
        let mut source = ReaderLineSource::new(Cursor::new(b"START\r\n 1,2,3 \nEND".to_vec()));
        assert_eq!(source.read_line().unwrap(), "START");
        assert_eq!(source.read_line().unwrap(), "1,2,3");
        assert_eq!(source.read_line().unwrap(), "END");
        assert!(matches!(source.read_line(), Err(TransportError::Closed)));
    }

    #[test]
    fn test_invalid_utf8_is_skippable() {
        let mut source = ReaderLineSource::new(Cursor::new(b"\xff\xfe\nEND\n".to_vec()));
        let err = source.read_line().unwrap_err();
        assert!(err.is_skippable());
        assert!(!err.is_fatal());
        assert_eq!(source.read_line().unwrap(), "END");
    }

    #[test]
    fn test_runaway_line_is_skippable() {
        let mut data = vec![b'x'; MAX_LINE_BYTES * 2];
        data.extend_from_slice(b"\nEND\n");
        let mut source = ReaderLineSource::new(Cursor::new(data));

        let err = source.read_line().unwrap_err();
        assert!(err.is_skippable());
        assert_eq!(source.read_line().unwrap(), "END");
    }

    #[test]
    fn test_endless_noise_does_not_hang() {
        let mut source = ReaderLineSource::new(BufReader::new(io::repeat(b'~')));
        for _ in 0..3 {
            assert!(matches!(
                source.read_line(),
                Err(TransportError::Decode { .. })
            ));
        }
        assert!(source.pending.len() <= MAX_LINE_BYTES);
    }

    /// Simula un puerto serie que agota el timeout a mitad de línea
    struct StutteringPort {
        chunks: Vec<Option<&'static [u8]>>,
    }

    impl Read for StutteringPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                return Ok(0);
            }
            match self.chunks.remove(0) {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "timeout")),
            }
        }
    }

    #[test]
    fn test_timeouts_keep_partial_line() {
        let port = StutteringPort {
            chunks: vec![None, Some(b"1,0,0"), None, None, Some(b",0,0,0,0\n")],
        };
        let mut source = ReaderLineSource::new(BufReader::new(port));
        assert_eq!(source.read_line().unwrap(), "1,0,0,0,0,0,0");
        assert!(matches!(source.read_line(), Err(TransportError::Closed)));
    }

    #[test]
    fn test_hard_io_error_is_fatal() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
            }
        }

        let mut source = ReaderLineSource::new(BufReader::new(Broken));
        let err = source.read_line().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_channel_source_shutdown_wins() {
        let (line_tx, line_rx) = bounded(4);
        let (stop_tx, stop_rx) = shutdown_channel();
        let mut source = ChannelLineSource::new(line_rx, stop_rx);

        line_tx.send(Ok("START".to_string())).unwrap();
        assert_eq!(source.read_line().unwrap(), "START");

        line_tx.send(Ok("1,0,0,0,0,0,0".to_string())).unwrap();
        stop_tx.send(()).unwrap();
        assert!(matches!(
            source.read_line(),
            Err(TransportError::Interrupted)
        ));
    }

    #[test]
    fn test_channel_source_interrupts_blocked_read() {
        let (_line_tx, line_rx) = bounded::<LineResult>(4);
        let (stop_tx, stop_rx) = shutdown_channel();
        let mut source = ChannelLineSource::new(line_rx, stop_rx);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stop_tx.send(()).unwrap();
        });

        assert!(matches!(
            source.read_line(),
            Err(TransportError::Interrupted)
        ));
        handle.join().unwrap();
    }

    #[test]
    fn test_channel_source_closed_when_reader_gone() {
        let (line_tx, line_rx) = bounded::<LineResult>(4);
        let (stop_tx, stop_rx) = shutdown_channel();
        drop(stop_tx);
        let mut source = ChannelLineSource::new(line_rx, stop_rx);

        line_tx.send(Ok("END".to_string())).unwrap();
        drop(line_tx);
        assert_eq!(source.read_line().unwrap(), "END");
        assert!(matches!(source.read_line(), Err(TransportError::Closed)));
    }

    #[test]
    fn test_spawn_reader_forwards_until_fatal() {
        let source = ReaderLineSource::new(Cursor::new(b"START\nEND\n".to_vec()));
        let rx = spawn_reader(source, 8);
        assert_eq!(rx.recv().unwrap().unwrap(), "START");
        assert_eq!(rx.recv().unwrap().unwrap(), "END");
        assert!(matches!(rx.recv().unwrap(), Err(TransportError::Closed)));
        assert!(rx.recv().is_err());
    }
}
