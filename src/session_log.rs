use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, Writer};
use log::{debug, warn};
use thiserror::Error;

use crate::types::{Sample, Session, LINE_FIELDS, SESSION_HEADER};
use crate::windower::SampleSink;

#[derive(Error, Debug)]
pub enum SessionLogError {
    #[error("IO error en {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error en {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// CSV con las muestras crudas de la sesión en curso. Se sobrescribe en cada
/// sesión y vuelve a quedar sólo con el encabezado al terminar. Sirve para
/// auditar/depurar; la clasificación trabaja con la sesión en memoria.
pub struct SessionRecorder {
    path: PathBuf,
    writer: Writer<File>,
    rows: usize,
}

impl SessionRecorder {
    /// Crea (o trunca) el fichero y escribe el encabezado
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SessionLogError> {
        let path = path.as_ref().to_path_buf();
        let writer = Self::open_with_header(&path)?;
        debug!("Archivo {:?} creado", path);
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    fn open_with_header(path: &Path) -> Result<Writer<File>, SessionLogError> {
        let csv_err = |source| SessionLogError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut writer = Writer::from_path(path).map_err(csv_err)?;
        writer.write_record(SESSION_HEADER).map_err(csv_err)?;
        writer.flush().map_err(|source| SessionLogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(writer)
    }

    /// Añade una fila y hace flush (el fichero se puede seguir en vivo)
    pub fn append(&mut self, sample: &Sample) -> Result<(), SessionLogError> {
        let record = [
            sample.time.to_string(),
            sample.acc[0].to_string(),
            sample.acc[1].to_string(),
            sample.acc[2].to_string(),
            sample.gyro[0].to_string(),
            sample.gyro[1].to_string(),
            sample.gyro[2].to_string(),
        ];

        self.writer
            .write_record(&record)
            .map_err(|source| SessionLogError::Csv {
                path: self.path.clone(),
                source,
            })?;
        self.writer.flush().map_err(|source| SessionLogError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.rows += 1;
        Ok(())
    }

    /// Deja el fichero sólo con el encabezado
    pub fn reset(&mut self) -> Result<(), SessionLogError> {
        self.writer = Self::open_with_header(&self.path)?;
        self.rows = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Filas escritas desde el último reset
    pub fn rows(&self) -> usize {
        self.rows
    }
}

impl SampleSink for SessionRecorder {
    fn on_sample(&mut self, sample: &Sample) {
        // El registro es opcional: un fallo aquí no corta la captura
        if let Err(e) = self.append(sample) {
            warn!("No se pudo registrar la muestra: {}", e);
        }
    }
}

/// Carga una sesión grabada (encabezado + filas time,acc_x..gyro_z)
pub fn load_session(path: impl AsRef<Path>) -> Result<Session> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("No se pudo abrir el CSV {:?}", path))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Encabezado inválido en {:?}", path))?;
    if headers.len() != LINE_FIELDS {
        bail!(
            "El CSV {:?} tiene {} columnas, se esperaban {}",
            path,
            headers.len(),
            LINE_FIELDS
        );
    }

    let mut session = Session::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record =
            result.with_context(|| format!("Fila {} inválida en {:?}", row_idx + 1, path))?;
        if record.len() != LINE_FIELDS {
            bail!("La fila {} no tiene {} columnas", row_idx + 1, LINE_FIELDS);
        }

        let time: f64 = record[0]
            .parse()
            .with_context(|| format!("time inválido en fila {}", row_idx + 1))?;
        let mut channels = [0.0f32; LINE_FIELDS - 1];
        for (col, slot) in channels.iter_mut().enumerate() {
            *slot = record[col + 1].parse().with_context(|| {
                format!("{} inválido en fila {}", SESSION_HEADER[col + 1], row_idx + 1)
            })?;
        }

        session.push(Sample::new(
            time,
            [channels[0], channels[1], channels[2]],
            [channels[3], channels[4], channels[5]],
        ));
    }

    Ok(session)
}
